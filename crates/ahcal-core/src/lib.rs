#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ahcal-core** – Event store, algorithm contract and run configuration.
//!
//! This crate defines the per-event blackboard through which the
//! reconstruction algorithms communicate, the `Algorithm` trait every
//! pipeline stage implements, the process-wide algorithm registry the
//! pipeline factory draws from, and the YAML run configuration. All
//! execution is synchronous and deterministic: one event at a time, one
//! algorithm after the other.

pub mod alg;
pub mod config;
pub mod context;
pub mod registry;
pub mod store;

pub use alg::Algorithm;
pub use context::{Conditions, RunConfig, RunContext};
pub use store::{EventStore, StoreError};
