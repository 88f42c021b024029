//! Typed failures of the columnar I/O layer.

/// Errors produced while writing or reading column files.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// A file could not be opened or created.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A file could not be written.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file does not start with the column-file magic.
    #[error("not a column file: {0}")]
    BadMagic(String),
    /// The file payload could not be decoded.
    #[error("malformed column file '{path}': {reason}")]
    Corrupt {
        /// Offending path.
        path: String,
        /// Decoder diagnostic.
        reason: String,
    },
    /// The requested table is not present in the file.
    #[error("table '{0}' not found")]
    MissingTable(String),
    /// The requested column is not present in the table.
    #[error("column '{0}' not found")]
    MissingColumn(String),
    /// A column was requested with a type different from its first binding
    /// or its persisted type.
    #[error("column '{name}' requested with different type (existing={existing}, requested={requested})")]
    ColumnTypeMismatch {
        /// Offending column.
        name: String,
        /// Established type of the column.
        existing: String,
        /// Type of the failed request.
        requested: &'static str,
    },
    /// Two columns that must be row-aligned have different lengths.
    #[error("column '{name}' has {got} rows, expected {expected}")]
    RowCountMismatch {
        /// Offending column.
        name: String,
        /// Rows found.
        got: u64,
        /// Rows required.
        expected: u64,
    },
    /// A cell failed to encode or decode.
    #[error("codec failure in column '{name}': {reason}")]
    Codec {
        /// Offending column.
        name: String,
        /// Codec diagnostic.
        reason: String,
    },
    /// A `cut` expression could not be parsed or evaluated.
    #[error("invalid cut expression '{expr}': {reason}")]
    BadCut {
        /// The expression as configured.
        expr: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// Two modules registered the same I/O type name.
    #[error("duplicate I/O type registration for '{0}'")]
    DuplicateRegistration(String),
    /// Lookup of an I/O type name that was never registered.
    #[error("unknown I/O type '{0}'")]
    UnknownType(String),
    /// A registry dispatched a payload whose runtime type does not match
    /// the registered record type.
    #[error("payload type mismatch in registry dispatch for '{0}'")]
    PayloadType(String),
    /// The process-wide registry lock was poisoned.
    #[error("I/O type registry lock poisoned")]
    Poisoned,
    /// A frame of the binary raw stream is truncated or undecodable.
    #[error("bad frame at entry {entry}: {reason}")]
    BadFrame {
        /// Index of the offending frame.
        entry: i64,
        /// Decoder diagnostic.
        reason: String,
    },
    /// Forwarded algorithm-registry failure.
    #[error(transparent)]
    AlgRegistry(#[from] ahcal_core::registry::RegistryError),
}
