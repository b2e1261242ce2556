//! Concurrent-safe scalar aggregators.
//!
//! An aggregator is a named value shared by every vertex of a graph across
//! a superstep. All four operations (`get`, `set`, `aggregate`, `delta`)
//! must be safe to call from many compute-worker tasks at once without the
//! caller taking any external lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// The two reference aggregator kinds. Closed set: a [`crate::error::GraphError::AggregatorTypeMismatch`]
/// is raised if a `Set`/`Aggregate` call's value doesn't match the
/// aggregator's own kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregatorValue {
    Int(i64),
    Float(f64),
}

impl AggregatorValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AggregatorValue::Int(_) => "int",
            AggregatorValue::Float(_) => "float",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AggregatorValue::Int(v) => Some(*v),
            AggregatorValue::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AggregatorValue::Int(v) => Some(*v as f64),
            AggregatorValue::Float(v) => Some(*v),
        }
    }
}

/// Raised when a `Set`/`Aggregate` call's value kind doesn't match the
/// aggregator's own kind. The graph layer wraps this with the aggregator's
/// registered name to produce a [`crate::error::GraphError::AggregatorTypeMismatch`].
#[derive(Debug, Clone, Copy)]
pub struct KindMismatch {
    pub expected: &'static str,
    pub actual: &'static str,
}

pub type AggResult<T> = std::result::Result<T, KindMismatch>;

/// A named, concurrently-combinable value.
pub trait Aggregator: Send + Sync + std::fmt::Debug {
    /// Current value.
    fn get(&self) -> AggregatorValue;

    /// Overwrite both the current *and* previous value — used to establish
    /// a new baseline after a distributed reduction broadcast.
    fn set(&self, value: AggregatorValue) -> AggResult<()>;

    /// Combine `value` into the current value. Must be associative and
    /// commutative so that per-worker partial aggregation order never
    /// affects the result.
    fn aggregate(&self, value: AggregatorValue) -> AggResult<()>;

    /// Atomically return `current − previous` and advance `previous` to
    /// `current`. Two successive `delta()` calls with no intervening
    /// `aggregate()` return a zero delta.
    fn delta(&self) -> AggregatorValue;
}

/// Integer-sum aggregator. `delta()` is implemented as a lock-free
/// compare-and-swap loop on `previous`.
#[derive(Debug)]
pub struct IntSumAggregator {
    current: AtomicI64,
    previous: AtomicI64,
}

impl IntSumAggregator {
    pub fn new(initial: i64) -> Self {
        Self {
            current: AtomicI64::new(initial),
            previous: AtomicI64::new(initial),
        }
    }
}

impl Default for IntSumAggregator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Aggregator for IntSumAggregator {
    fn get(&self) -> AggregatorValue {
        AggregatorValue::Int(self.current.load(Ordering::SeqCst))
    }

    fn set(&self, value: AggregatorValue) -> AggResult<()> {
        let v = value.as_i64().ok_or(KindMismatch { expected: "int", actual: value.kind() })?;
        self.current.store(v, Ordering::SeqCst);
        self.previous.store(v, Ordering::SeqCst);
        Ok(())
    }

    fn aggregate(&self, value: AggregatorValue) -> AggResult<()> {
        let v = value.as_i64().ok_or(KindMismatch { expected: "int", actual: value.kind() })?;
        self.current.fetch_add(v, Ordering::SeqCst);
        Ok(())
    }

    fn delta(&self) -> AggregatorValue {
        loop {
            let prev = self.previous.load(Ordering::SeqCst);
            let cur = self.current.load(Ordering::SeqCst);
            if self
                .previous
                .compare_exchange(prev, cur, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return AggregatorValue::Int(cur - prev);
            }
        }
    }
}

/// Floating-point-sum aggregator. `f64` has no native lock-free CAS on
/// stable Rust, so the four operations share one short-held mutex instead
/// of the integer aggregator's atomics; the "no external locking" contract
/// still holds at the public API — the lock is entirely internal.
/// Tolerates ULP-level non-determinism across runs.
#[derive(Debug)]
pub struct Float64SumAggregator {
    state: Mutex<(f64, f64)>, // (current, previous)
}

impl Float64SumAggregator {
    pub fn new(initial: f64) -> Self {
        Self { state: Mutex::new((initial, initial)) }
    }
}

impl Default for Float64SumAggregator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Aggregator for Float64SumAggregator {
    fn get(&self) -> AggregatorValue {
        AggregatorValue::Float(self.state.lock().unwrap().0)
    }

    fn set(&self, value: AggregatorValue) -> AggResult<()> {
        let v = value.as_f64().ok_or(KindMismatch { expected: "float", actual: value.kind() })?;
        let mut state = self.state.lock().unwrap();
        *state = (v, v);
        Ok(())
    }

    fn aggregate(&self, value: AggregatorValue) -> AggResult<()> {
        let v = value.as_f64().ok_or(KindMismatch { expected: "float", actual: value.kind() })?;
        self.state.lock().unwrap().0 += v;
        Ok(())
    }

    fn delta(&self) -> AggregatorValue {
        let mut state = self.state.lock().unwrap();
        let delta = state.0 - state.1;
        state.1 = state.0;
        AggregatorValue::Float(delta)
    }
}
