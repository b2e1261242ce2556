//! Error type for the pipeline engine.

use thiserror::Error;

/// Errors raised by a pipeline run. A stage that fails is wrapped with its
/// index for diagnostics; a pipeline that collects more than one stage
/// failure (possible since stages run concurrently) folds them into
/// [`PipelineError::Multi`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline's context was cancelled — either by the caller or
    /// because another stage failed first.
    #[error("pipeline cancelled")]
    Cancelled,

    /// Stage `stage` (0-indexed, source and sink excluded) returned an
    /// error from its processor.
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// More than one error was observed during a single run.
    #[error("{} pipeline errors occurred", .0.len())]
    Multi(Vec<PipelineError>),
}

impl PipelineError {
    pub fn stage(stage: usize, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Stage { stage, source: Box::new(source) }
    }

    /// The first underlying error — itself if not [`PipelineError::Multi`],
    /// otherwise the first element collected (or `None` if empty, which
    /// should not occur in practice since `Multi` is only ever constructed
    /// from a non-empty error channel drain).
    pub fn first(&self) -> Option<&PipelineError> {
        match self {
            PipelineError::Multi(errors) => errors.first(),
            other => Some(other),
        }
    }
}

/// Folds a drained error channel into an `Option<PipelineError>`: `None` if
/// empty, the lone error if exactly one, `Multi` otherwise.
pub fn combine(mut errors: Vec<PipelineError>) -> Option<PipelineError> {
    match errors.len() {
        0 => None,
        1 => Some(errors.remove(0)),
        _ => Some(PipelineError::Multi(errors)),
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn combine_empty_is_none() {
        assert!(combine(vec![]).is_none());
    }

    #[test]
    fn combine_single_is_unwrapped() {
        let err = combine(vec![PipelineError::stage(0, Boom)]).unwrap();
        assert!(matches!(err, PipelineError::Stage { stage: 0, .. }));
    }

    #[test]
    fn combine_multiple_wraps_in_multi() {
        let err = combine(vec![PipelineError::stage(0, Boom), PipelineError::stage(1, Boom)]).unwrap();
        match err {
            PipelineError::Multi(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected Multi, got {other:?}"),
        }
    }

    #[test]
    fn first_unwraps_multi_and_passes_through_singles() {
        let single = PipelineError::stage(3, Boom);
        assert!(matches!(single.first().unwrap(), PipelineError::Stage { stage: 3, .. }));

        let multi = PipelineError::Multi(vec![PipelineError::stage(1, Boom), PipelineError::stage(2, Boom)]);
        assert!(matches!(multi.first().unwrap(), PipelineError::Stage { stage: 1, .. }));
    }
}
