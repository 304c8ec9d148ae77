//! Standalone PostgreSQL operator: startup, CRD installation and the
//! controller runner. The binary in `main.rs` wires these together.

#![deny(missing_docs)]

pub mod cli;
pub mod controller_runner;
pub mod crds;
