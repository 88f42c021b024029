#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ahcal-io** – Columnar I/O layer of the AHCAL offline reconstruction.
//!
//! Structured event records are flattened into parallel per-field columns
//! of a tabular dataset, one row per event. The pieces, bottom up:
//!
//! - [`file`]: the column container - named tables of typed columns,
//!   written and read as one unit;
//! - [`writer`] / [`reader`]: entry-wise access with stable, typed column
//!   buffers owned by the I/O object;
//! - [`descriptor`]: per-record field descriptors replacing compile-time
//!   reflection;
//! - [`registry`]: per-run writer/reader registries plus the process-wide
//!   type registry that maps a type name to its registrars;
//! - [`source`] and the concrete readers: event sources that fill the
//!   [`EventStore`](ahcal_core::EventStore) per entry;
//! - [`writer_alg`]: the pipeline stage that persists every registered
//!   payload of the store.

pub mod cut;
pub mod descriptor;
pub mod edm;
pub mod error;
pub mod file;
pub mod reader;
pub mod registry;
pub mod source;
pub mod writer;
pub mod writer_alg;

pub mod binary_reader;
pub mod column_input;
pub mod raw_reader;

pub use descriptor::{Field, Record, SeqField};
pub use error::IoError;
pub use file::{Cell, Table};
pub use reader::TableReader;
pub use registry::{ReaderRegistry, WriterRegistry};
pub use source::EventSource;
pub use writer::TableWriter;

use once_cell::sync::OnceCell;

static BUILTIN: OnceCell<()> = OnceCell::new();

/// Install the builtin I/O types and the column-writer algorithm.
///
/// Idempotent; the pipeline runtime calls this before assembling a job.
pub fn register_builtin() -> Result<(), IoError> {
    if BUILTIN.set(()).is_err() {
        return Ok(());
    }
    edm::register_builtin_records()?;
    writer_alg::register_writer_alg()?;
    Ok(())
}
