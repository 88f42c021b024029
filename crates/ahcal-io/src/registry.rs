//! Writer/reader registries and the process-wide I/O type registry.
//!
//! A [`WriterRegistry`] maps the runtime type identity of a store payload
//! to a closure that flattens it into columns; a [`ReaderRegistry`] maps a
//! type name to a closure that rebuilds the payload from columns. The
//! global type registry maps a public type name to the registrar functions
//! for both directions plus a read-and-put that feeds an
//! [`EventStore`](ahcal_core::EventStore) directly. Entries are installed
//! by an explicit registration routine before the pipeline is assembled;
//! duplicate names are errors.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::debug;

use ahcal_core::EventStore;

use crate::descriptor::Record;
use crate::error::IoError;
use crate::reader::TableReader;
use crate::writer::TableWriter;

//─────────────────────────────
//  Per-run writer registry
//─────────────────────────────

type WriterFn =
    Box<dyn Fn(&str, &(dyn Any + Send), &mut TableWriter) -> Result<(), IoError> + Send + Sync>;

/// Per-run map from payload type identity to its column writer.
#[derive(Default)]
pub struct WriterRegistry {
    writers: HashMap<TypeId, WriterFn>,
}

impl WriterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writer for a scalar payload of `R`.
    pub fn register_record<R: Record>(&mut self) {
        let fields = R::fields();
        debug!(r#type = std::any::type_name::<R>(), "registered writer");
        self.writers.insert(
            TypeId::of::<R>(),
            Box::new(move |key, any, out| {
                let obj = any
                    .downcast_ref::<R>()
                    .ok_or_else(|| IoError::PayloadType(std::any::type_name::<R>().to_owned()))?;
                for f in &fields {
                    f.write(obj, out, key)?;
                }
                Ok(())
            }),
        );
    }

    /// Register the writer for a `Vec<R>` payload.
    pub fn register_record_vec<R: Record>(&mut self) {
        if self.writers.contains_key(&TypeId::of::<Vec<R>>()) {
            return;
        }
        let fields = R::seq_fields();
        self.writers.insert(
            TypeId::of::<Vec<R>>(),
            Box::new(move |key, any, out| {
                let vec = any
                    .downcast_ref::<Vec<R>>()
                    .ok_or_else(|| IoError::PayloadType(std::any::type_name::<Vec<R>>().to_owned()))?;
                let refs: Vec<&R> = vec.iter().collect();
                for f in &fields {
                    f.write(&refs, out, key)?;
                }
                Ok(())
            }),
        );
    }

    /// Whether a writer exists for the payload type.
    pub fn can_write(&self, type_id: TypeId) -> bool {
        self.writers.contains_key(&type_id)
    }

    /// Flatten one payload into the columns under `key`.
    pub fn write_any(
        &self,
        key: &str,
        type_id: TypeId,
        payload: &(dyn Any + Send),
        out: &mut TableWriter,
    ) -> Result<(), IoError> {
        let writer = self
            .writers
            .get(&type_id)
            .ok_or_else(|| IoError::UnknownType(key.to_owned()))?;
        writer(key, payload, out)
    }
}

//─────────────────────────────
//  Per-run reader registry
//─────────────────────────────

type ReaderFn =
    Box<dyn Fn(&str, &mut TableReader) -> Result<Box<dyn Any + Send>, IoError> + Send + Sync>;

/// Per-run map from type name to its column reader.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: HashMap<String, ReaderFn>,
}

impl ReaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the reader for a scalar payload of `R` under `type_name`.
    pub fn register_record<R: Record>(&mut self, type_name: &str) {
        let fields = R::fields();
        self.readers.insert(
            type_name.to_owned(),
            Box::new(move |prefix, input| {
                let mut obj = R::default();
                for f in &fields {
                    f.read(&mut obj, input, prefix)?;
                }
                Ok(Box::new(obj))
            }),
        );
    }

    /// Register the reader for a `Vec<R>` payload under `type_name`.
    pub fn register_record_vec<R: Record>(&mut self, type_name: &str) {
        let fields = R::seq_fields();
        self.readers.insert(
            type_name.to_owned(),
            Box::new(move |prefix, input| {
                let mut vec: Vec<R> = Vec::new();
                if let Some(first) = fields.first() {
                    // The first field's column sizes the record list.
                    let n = first.len(input, prefix)?;
                    debug!(prefix, rows = n, "sized sequence payload");
                    vec.resize(n, R::default());
                    for f in &fields {
                        f.read(&mut vec, input, prefix)?;
                    }
                }
                Ok(Box::new(vec))
            }),
        );
    }

    /// Read the payload registered under `type_name` from the columns
    /// under `prefix`.
    pub fn read_any(
        &self,
        type_name: &str,
        prefix: &str,
        input: &mut TableReader,
    ) -> Result<Box<dyn Any + Send>, IoError> {
        let reader = self
            .readers
            .get(type_name)
            .ok_or_else(|| IoError::UnknownType(type_name.to_owned()))?;
        reader(prefix, input)
    }

    /// Typed convenience over [`read_any`](Self::read_any).
    pub fn read<T: Send + 'static>(
        &self,
        type_name: &str,
        prefix: &str,
        input: &mut TableReader,
    ) -> Result<T, IoError> {
        let any = self.read_any(type_name, prefix, input)?;
        any.downcast::<T>()
            .map(|b| *b)
            .map_err(|_| IoError::PayloadType(type_name.to_owned()))
    }
}

//─────────────────────────────
//  Process-wide type registry
//─────────────────────────────

/// Registrar functions installed per public type name.
#[derive(Clone, Copy)]
pub struct IoTypeEntry {
    register_writer: fn(&mut WriterRegistry),
    register_reader: fn(&mut ReaderRegistry, &str),
    read_and_put: fn(
        &mut EventStore,
        &ReaderRegistry,
        &mut TableReader,
        &str,
        &str,
    ) -> Result<(), IoError>,
}

static IO_TYPES: Lazy<RwLock<HashMap<String, IoTypeEntry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn writer_reg_record<R: Record>(reg: &mut WriterRegistry) {
    reg.register_record::<R>();
}

fn writer_reg_record_vec<R: Record>(reg: &mut WriterRegistry) {
    reg.register_record_vec::<R>();
}

fn reader_reg_record<R: Record>(reg: &mut ReaderRegistry, type_name: &str) {
    reg.register_record::<R>(type_name);
}

fn reader_reg_record_vec<R: Record>(reg: &mut ReaderRegistry, type_name: &str) {
    reg.register_record_vec::<R>(type_name);
}

fn readput_record<R: Record>(
    store: &mut EventStore,
    readers: &ReaderRegistry,
    input: &mut TableReader,
    type_name: &str,
    key: &str,
) -> Result<(), IoError> {
    let obj: R = readers.read(type_name, key, input)?;
    store.put(key, obj);
    Ok(())
}

fn readput_record_vec<R: Record>(
    store: &mut EventStore,
    readers: &ReaderRegistry,
    input: &mut TableReader,
    type_name: &str,
    key: &str,
) -> Result<(), IoError> {
    let vec: Vec<R> = readers.read(type_name, key, input)?;
    store.put(key, vec);
    Ok(())
}

fn insert_entry(name: &str, entry: IoTypeEntry) -> Result<(), IoError> {
    let mut types = IO_TYPES.write().map_err(|_| IoError::Poisoned)?;
    if types.contains_key(name) {
        return Err(IoError::DuplicateRegistration(name.to_owned()));
    }
    types.insert(name.to_owned(), entry);
    Ok(())
}

/// Register a scalar record type under `name`.
pub fn register_record_type<R: Record>(name: &str) -> Result<(), IoError> {
    insert_entry(
        name,
        IoTypeEntry {
            register_writer: writer_reg_record::<R>,
            register_reader: reader_reg_record::<R>,
            read_and_put: readput_record::<R>,
        },
    )
}

/// Register a sequence-of-record type under `name`.
pub fn register_record_vec_type<R: Record>(name: &str) -> Result<(), IoError> {
    insert_entry(
        name,
        IoTypeEntry {
            register_writer: writer_reg_record_vec::<R>,
            register_reader: reader_reg_record_vec::<R>,
            read_and_put: readput_record_vec::<R>,
        },
    )
}

fn lookup(name: &str) -> Result<IoTypeEntry, IoError> {
    let types = IO_TYPES.read().map_err(|_| IoError::Poisoned)?;
    types
        .get(name)
        .copied()
        .ok_or_else(|| IoError::UnknownType(name.to_owned()))
}

/// Add the writer of type `name` to a per-run writer registry.
pub fn add_writer_for(name: &str, reg: &mut WriterRegistry) -> Result<(), IoError> {
    (lookup(name)?.register_writer)(reg);
    Ok(())
}

/// Add the reader of type `name` to a per-run reader registry.
pub fn add_reader_for(name: &str, reg: &mut ReaderRegistry) -> Result<(), IoError> {
    (lookup(name)?.register_reader)(reg, name);
    Ok(())
}

/// Read the payload of type `name` under `key` and put it on the store.
pub fn read_and_put(
    name: &str,
    store: &mut EventStore,
    readers: &ReaderRegistry,
    input: &mut TableReader,
    key: &str,
) -> Result<(), IoError> {
    (lookup(name)?.read_and_put)(store, readers, input, name, key)
}
