//! The distributed job loop: [`master`] drives the reduce/broadcast
//! side, [`worker`] drives the per-partition compute side. Both sides
//! rendezvous through a [`crate::barrier::StepBarrier`] and talk over a
//! [`crate::stream::Stream`].

pub mod master;
pub mod worker;
