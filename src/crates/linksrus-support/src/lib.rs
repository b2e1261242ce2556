//! Ambient stack shared by the Links R Us pipeline and BSP engines.
//!
//! This crate carries no domain knowledge of graphs or pipelines; it only
//! provides the cross-cutting concerns every other crate in the workspace
//! needs: error-chain formatting, `tracing`-based timing helpers, and a
//! small environment/config-loading layer.

pub mod config;
pub mod error;
pub mod logging;
