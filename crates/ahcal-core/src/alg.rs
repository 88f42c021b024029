//! The algorithm contract.

use anyhow::Result;

use crate::store::EventStore;

/// One stage of the reconstruction pipeline.
///
/// Algorithms are constructed by the factory with their configuration
/// already parsed, then driven through `initialize` → `execute` (once per
/// event) → `finalize`. They communicate exclusively through the
/// [`EventStore`]; any cross-event state is private to the instance.
pub trait Algorithm {
    /// Pretty name, used in log lines.
    fn name(&self) -> &str;

    /// Called once before the first event of a file.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once per event, in the order the pipeline declares.
    fn execute(&mut self, store: &mut EventStore) -> Result<()>;

    /// Called once after the last event of a file.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}
