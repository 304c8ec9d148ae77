//! Reconcile pipelines
//!
//! A reconcile is a tree of small idempotent steps run strictly in order
//! against one [`Context`]. The first failing step aborts the run and its
//! error is returned unchanged; retrying is left to the controller, which
//! requeues the whole reconcile.

#![deny(missing_docs)]

pub mod context;
pub mod pipeline;

pub use context::{Context, Key};
pub use pipeline::{Branch, Node, Pipeline, RunReport, Step, StepFuture};
