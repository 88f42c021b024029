#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ahcal-types** – Shared event data model for the AHCAL offline
//! reconstruction.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It holds the event data model (raw hits, trigger records, calibrated
//! hits, tracks), the fixed detector geometry tables and the reference
//! calibration constants. It makes no assumptions about I/O or storage.

pub mod edm;
pub mod geometry;
pub mod reference;

pub use edm::{RawHit, RecoHit, SimpleFittedTrack, TluRawData, Track};
