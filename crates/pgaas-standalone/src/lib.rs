//! Lifecycle controller for `PostgresqlStandalone` instances.
//!
//! A reconcile selects one of three pipelines (create, update, delete) from
//! the instance's finalizer and deletion timestamp and runs it against a
//! fresh [`pgaas_pipeline::Context`]. The pipelines are built from small,
//! idempotent steps in [`steps`], each converging one dependent resource.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod helm;
pub mod keys;
pub mod naming;
pub mod pipelines;
pub mod status;
pub mod steps;

#[cfg(test)]
mod fixtures;

pub use controller::{
    error_policy, reconcile, release_to_instance, select_phase, ControllerContext,
    ControllerContextBuilder, Phase, ReconcileSettings,
};
