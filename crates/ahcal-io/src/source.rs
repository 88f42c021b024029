//! The event-source contract.

use anyhow::Result;

use ahcal_core::EventStore;

/// Produces events by filling the store with raw records.
///
/// The pipeline drives a source until it returns `Ok(false)`; errors are
/// fatal for the current input file.
pub trait EventSource {
    /// Fill `store` with the next event. Returns `Ok(false)` at end of
    /// input.
    fn next_event(&mut self, store: &mut EventStore) -> Result<bool>;

    /// Total number of entries, when the input knows it up front.
    fn entries(&self) -> Option<i64> {
        None
    }
}
