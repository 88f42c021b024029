//! The column container file.
//!
//! A file holds named tables; a table is a row count plus an ordered list
//! of columns; a column is a name, a type tag and one encoded cell per
//! row. The container is written and read as one unit - entry-wise access
//! on top of it is provided by [`TableWriter`](crate::TableWriter) and
//! [`TableReader`](crate::TableReader).
//!
//! The type tag is the cell's `std::any::type_name`. It exists so that a
//! mismatched binding fails with a typed error instead of a decode
//! failure; descriptor stability is only required across runs of the same
//! binary.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::IoError;

const MAGIC: &[u8; 4] = b"ACF1";

/// Cell value storable in a column.
///
/// Blanket-implemented; sequence columns are simply columns of `Vec<T>`.
pub trait Cell: Clone + Default + Serialize + DeserializeOwned + Send + 'static {}

impl<T> Cell for T where T: Clone + Default + Serialize + DeserializeOwned + Send + 'static {}

pub(crate) fn cell_tag<T: Cell>() -> &'static str {
    std::any::type_name::<T>()
}

pub(crate) fn encode_cell<T: Cell>(value: &T, column: &str) -> Result<Vec<u8>, IoError> {
    bincode::serialize(value).map_err(|e| IoError::Codec {
        name: column.to_owned(),
        reason: e.to_string(),
    })
}

pub(crate) fn decode_cell<T: Cell>(bytes: &[u8], column: &str) -> Result<T, IoError> {
    bincode::deserialize(bytes).map_err(|e| IoError::Codec {
        name: column.to_owned(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ColumnData {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) cells: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub(crate) name: String,
    pub(crate) rows: u64,
    pub(crate) columns: Vec<ColumnData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct FileData {
    pub(crate) tables: Vec<TableData>,
}

/// An in-memory table under construction, for bulk writers that produce
/// whole columns at once (calibration outputs, summary tables).
#[derive(Debug, Clone)]
pub struct Table {
    data: TableData,
}

impl Table {
    /// Create an empty table named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            data: TableData {
                name: name.into(),
                rows: 0,
                columns: Vec::new(),
            },
        }
    }

    /// Append a full column. Every column of a table must have the same
    /// number of rows.
    pub fn push_column<T: Cell>(&mut self, name: &str, values: &[T]) -> Result<(), IoError> {
        if !self.data.columns.is_empty() && self.data.rows != values.len() as u64 {
            return Err(IoError::RowCountMismatch {
                name: name.to_owned(),
                got: values.len() as u64,
                expected: self.data.rows,
            });
        }
        let mut cells = Vec::with_capacity(values.len());
        for v in values {
            cells.push(encode_cell(v, name)?);
        }
        self.data.rows = values.len() as u64;
        self.data.columns.push(ColumnData {
            name: name.to_owned(),
            type_tag: cell_tag::<T>().to_owned(),
            cells,
        });
        Ok(())
    }

    /// Number of rows of the table.
    pub fn rows(&self) -> u64 {
        self.data.rows
    }

    pub(crate) fn into_data(self) -> TableData {
        self.data
    }

    pub(crate) fn from_data(data: TableData) -> Self {
        Self { data }
    }
}

/// Write `tables` to `path`, replacing any existing file.
pub fn write_tables(path: impl AsRef<Path>, tables: Vec<Table>) -> Result<(), IoError> {
    let path = path.as_ref();
    let data = FileData {
        tables: tables.into_iter().map(Table::into_data).collect(),
    };
    write_file(path, &data)
}

pub(crate) fn write_file(path: &Path, data: &FileData) -> Result<(), IoError> {
    let bytes = bincode::serialize(data).map_err(|e| IoError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut f = fs::File::create(path).map_err(|e| IoError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    let write = |e| IoError::Write {
        path: path.display().to_string(),
        source: e,
    };
    f.write_all(MAGIC).map_err(write)?;
    f.write_all(&bytes).map_err(write)?;
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<FileData, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(IoError::BadMagic(path.display().to_string()));
    }
    bincode::deserialize(&bytes[MAGIC.len()..]).map_err(|e| IoError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_roundtrip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.root");

        let mut mip = Table::new("mip");
        mip.push_column::<i32>("cellid", &[100_000, 100_001]).unwrap();
        mip.push_column::<f64>("MPV", &[312.5, 298.0]).unwrap();
        let mut dac = Table::new("dac");
        dac.push_column::<i32>("cellid", &[100_000]).unwrap();
        write_tables(&path, vec![mip, dac]).unwrap();

        let data = read_file(&path).unwrap();
        assert_eq!(data.tables.len(), 2);
        let t = &data.tables[0];
        assert_eq!(t.name, "mip");
        assert_eq!(t.rows, 2);
        assert_eq!(t.columns.len(), 2);
        let mpv: f64 = decode_cell(&t.columns[1].cells[1], "MPV").unwrap();
        assert_eq!(mpv, 298.0);
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let mut t = Table::new("t");
        t.push_column::<i32>("a", &[1, 2, 3]).unwrap();
        let err = t.push_column::<i32>("b", &[1]).unwrap_err();
        assert!(matches!(err, IoError::RowCountMismatch { .. }));
    }

    #[test]
    fn non_column_files_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.root");
        fs::write(&path, b"definitely not a column file").unwrap();
        assert!(matches!(read_file(&path), Err(IoError::BadMagic(_))));
    }
}
