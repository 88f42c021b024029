//! Entry-wise table reader.
//!
//! Columns are bound lazily: the first [`value`](TableReader::value) for a
//! column decodes it and attaches a typed buffer. Reads refer to the entry
//! positioned by the last [`read_entry`](TableReader::read_entry) or
//! [`next`](TableReader::next); when a column is bound after an entry was
//! already read, the current entry is re-read for that column so late
//! bindings are populated.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::IoError;
use crate::file::{self, Cell, ColumnData};

trait BoundColumn: Send {
    fn type_id(&self) -> TypeId;
    fn type_tag(&self) -> &'static str;
    fn refresh(&mut self, row: usize);
    fn current_any(&self) -> &dyn Any;
}

struct TypedBound<T: Cell> {
    cells: Vec<T>,
    current: T,
}

impl<T: Cell> BoundColumn for TypedBound<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_tag(&self) -> &'static str {
        file::cell_tag::<T>()
    }

    fn refresh(&mut self, row: usize) {
        if let Some(cell) = self.cells.get(row) {
            self.current = cell.clone();
        }
    }

    fn current_any(&self) -> &dyn Any {
        &self.current
    }
}

/// Reader of one tabular dataset with lazily bound typed column buffers.
pub struct TableReader {
    path: PathBuf,
    rows: i64,
    raw: HashMap<String, ColumnData>,
    bound: IndexMap<String, Box<dyn BoundColumn>>,
    // Index of the next entry; the current entry is `entry - 1`.
    entry: i64,
}

impl TableReader {
    /// Open `path` and attach to the table named `table_name`.
    pub fn open(path: impl AsRef<Path>, table_name: &str) -> Result<Self, IoError> {
        let path = path.as_ref();
        let data = file::read_file(path)?;
        let table = data
            .tables
            .into_iter()
            .find(|t| t.name == table_name)
            .ok_or_else(|| IoError::MissingTable(table_name.to_owned()))?;
        let rows = table.rows as i64;
        let raw = table
            .columns
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Ok(Self {
            path: path.to_owned(),
            rows,
            raw,
            bound: IndexMap::new(),
            entry: 0,
        })
    }

    /// Number of entries of the table.
    pub fn entries(&self) -> i64 {
        self.rows
    }

    /// The entry the buffers currently hold, -1 before the first read.
    pub fn current_entry(&self) -> i64 {
        self.entry - 1
    }

    /// Position the buffers at entry `i`. Returns false when `i` is out of
    /// range.
    pub fn read_entry(&mut self, i: i64) -> bool {
        if i < 0 || i >= self.rows {
            return false;
        }
        for col in self.bound.values_mut() {
            col.refresh(i as usize);
        }
        self.entry = i + 1;
        true
    }

    /// Advance to the next entry. Returns false at end of table.
    pub fn next(&mut self) -> bool {
        if self.entry >= self.rows {
            return false;
        }
        let i = self.entry;
        self.read_entry(i)
    }

    /// Whether the table has a column named `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }

    /// Cell of column `name` at the current entry, binding the column on
    /// first use.
    pub fn value<T: Cell>(&mut self, name: &str) -> Result<&T, IoError> {
        self.bind::<T>(name)?;
        let col = self
            .bound
            .get(name)
            .ok_or_else(|| IoError::MissingColumn(name.to_owned()))?;
        let existing = col.type_tag();
        col.current_any()
            .downcast_ref::<T>()
            .ok_or_else(|| IoError::ColumnTypeMismatch {
                name: name.to_owned(),
                existing: existing.to_owned(),
                requested: file::cell_tag::<T>(),
            })
    }

    /// Cell of a numeric column at the current entry, widened to `f64`.
    /// Used by `cut` predicate evaluation, where the column type is only
    /// known from the file.
    pub fn numeric_value(&mut self, name: &str) -> Result<f64, IoError> {
        let tag = self
            .raw
            .get(name)
            .map(|c| c.type_tag.clone())
            .or_else(|| {
                self.bound
                    .get(name)
                    .map(|c| c.type_tag().to_owned())
            })
            .ok_or_else(|| IoError::MissingColumn(name.to_owned()))?;
        if tag == file::cell_tag::<f64>() {
            Ok(*self.value::<f64>(name)?)
        } else if tag == file::cell_tag::<f32>() {
            Ok(f64::from(*self.value::<f32>(name)?))
        } else if tag == file::cell_tag::<i32>() {
            Ok(f64::from(*self.value::<i32>(name)?))
        } else if tag == file::cell_tag::<i64>() {
            Ok(*self.value::<i64>(name)? as f64)
        } else if tag == file::cell_tag::<u16>() {
            Ok(f64::from(*self.value::<u16>(name)?))
        } else {
            Err(IoError::ColumnTypeMismatch {
                name: name.to_owned(),
                existing: tag,
                requested: "numeric",
            })
        }
    }

    fn bind<T: Cell>(&mut self, name: &str) -> Result<(), IoError> {
        if let Some(col) = self.bound.get(name) {
            if col.type_id() != TypeId::of::<T>() {
                return Err(IoError::ColumnTypeMismatch {
                    name: name.to_owned(),
                    existing: col.type_tag().to_owned(),
                    requested: file::cell_tag::<T>(),
                });
            }
            return Ok(());
        }
        let raw = self
            .raw
            .get(name)
            .ok_or_else(|| IoError::MissingColumn(name.to_owned()))?;
        if raw.type_tag != file::cell_tag::<T>() {
            return Err(IoError::ColumnTypeMismatch {
                name: name.to_owned(),
                existing: raw.type_tag.clone(),
                requested: file::cell_tag::<T>(),
            });
        }
        let mut cells = Vec::with_capacity(raw.cells.len());
        for bytes in &raw.cells {
            cells.push(file::decode_cell::<T>(bytes, name)?);
        }
        let mut col = TypedBound::<T> {
            cells,
            current: T::default(),
        };
        if self.entry > 0 {
            // A binding added after an entry was read must observe it.
            col.refresh((self.entry - 1) as usize);
            debug!(
                column = name,
                entry = self.entry - 1,
                path = %self.path.display(),
                "re-read entry after binding"
            );
        }
        self.bound.insert(name.to_owned(), Box::new(col));
        Ok(())
    }
}
