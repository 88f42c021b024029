//! Entry-wise table writer.
//!
//! The writer owns one staging slot per column. Field descriptors assign
//! into the slots through [`get_or_make_column`](TableWriter::get_or_make_column);
//! [`fill`](TableWriter::fill) then appends every slot as one row. The
//! file is produced by [`finish`](TableWriter::finish); dropping an
//! unfinished writer still attempts the write so the dataset is released
//! on every exit path.

use std::any::Any;
use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::{debug, error};

use crate::error::IoError;
use crate::file::{self, Cell, ColumnData, FileData, TableData};

trait StagedColumn: Send {
    fn type_tag(&self) -> &'static str;
    fn staged_any_mut(&mut self) -> &mut dyn Any;
    fn append_staged(&mut self);
    fn backfill(&mut self, rows: usize);
    fn encode(&self, name: &str) -> Result<Vec<Vec<u8>>, IoError>;
}

struct Typed<T: Cell> {
    staged: T,
    cells: Vec<T>,
}

impl<T: Cell> StagedColumn for Typed<T> {
    fn type_tag(&self) -> &'static str {
        file::cell_tag::<T>()
    }

    fn staged_any_mut(&mut self) -> &mut dyn Any {
        &mut self.staged
    }

    fn append_staged(&mut self) {
        self.cells.push(self.staged.clone());
    }

    fn backfill(&mut self, rows: usize) {
        self.cells.resize(rows, T::default());
    }

    fn encode(&self, name: &str) -> Result<Vec<Vec<u8>>, IoError> {
        let mut out = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            out.push(file::encode_cell(cell, name)?);
        }
        Ok(out)
    }
}

/// Writer of one tabular dataset with per-field typed column buffers.
pub struct TableWriter {
    path: PathBuf,
    table_name: String,
    columns: IndexMap<String, Box<dyn StagedColumn>>,
    rows: u64,
    finished: bool,
}

impl TableWriter {
    /// Create the output file and an empty table named `table_name`.
    ///
    /// The file is created immediately so an unwritable destination fails
    /// the job before any event is processed.
    pub fn create(path: impl Into<PathBuf>, table_name: &str) -> Result<Self, IoError> {
        let path = path.into();
        std::fs::File::create(&path).map_err(|e| IoError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            path,
            table_name: table_name.to_owned(),
            columns: IndexMap::new(),
            rows: 0,
            finished: false,
        })
    }

    /// Get or create the staging slot of column `name`.
    ///
    /// The first request declares the column with the cell type `T`;
    /// later requests must use the same `T` or fail. Columns declared
    /// after rows were already filled are backfilled with default cells.
    pub fn get_or_make_column<T: Cell>(&mut self, name: &str) -> Result<&mut T, IoError> {
        if !self.columns.contains_key(name) {
            let mut col = Typed::<T> {
                staged: T::default(),
                cells: Vec::new(),
            };
            col.backfill(self.rows as usize);
            debug!(column = name, r#type = file::cell_tag::<T>(), "created column");
            self.columns.insert(name.to_owned(), Box::new(col));
        }
        let col = self
            .columns
            .get_mut(name)
            .ok_or_else(|| IoError::MissingColumn(name.to_owned()))?;
        let existing = col.type_tag();
        col.staged_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| IoError::ColumnTypeMismatch {
                name: name.to_owned(),
                existing: existing.to_owned(),
                requested: file::cell_tag::<T>(),
            })
    }

    /// Append the current staging slots as one row.
    pub fn fill(&mut self) {
        for col in self.columns.values_mut() {
            col.append_staged();
        }
        self.rows += 1;
    }

    /// Number of rows filled so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Encode and write the table. Idempotent.
    pub fn finish(&mut self) -> Result<(), IoError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let mut columns = Vec::with_capacity(self.columns.len());
        for (name, col) in &self.columns {
            columns.push(ColumnData {
                name: name.clone(),
                type_tag: col.type_tag().to_owned(),
                cells: col.encode(name)?,
            });
        }
        let data = FileData {
            tables: vec![TableData {
                name: self.table_name.clone(),
                rows: self.rows,
                columns,
            }],
        };
        file::write_file(&self.path, &data)?;
        debug!(path = %self.path.display(), rows = self.rows, "wrote table");
        Ok(())
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(path = %self.path.display(), error = %e, "failed to write table on drop");
        }
    }
}
