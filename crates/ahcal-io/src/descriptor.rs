//! Field descriptors.
//!
//! A record type describes itself as an ordered list of `(name, write,
//! read)` fields; the list replaces compile-time reflection. The full
//! column name is `<prefix>.<field name>` where the prefix is the event
//! store key of the payload. Descriptors must return the same sequence in
//! the same order on every call; appending a field appends a column and is
//! backward compatible.

use crate::error::IoError;
use crate::file::Cell;
use crate::reader::TableReader;
use crate::writer::TableWriter;

type WriteFn<T> = Box<dyn Fn(&T, &mut TableWriter, &str) -> Result<(), IoError> + Send + Sync>;
type ReadFn<T> = Box<dyn Fn(&mut T, &mut TableReader, &str) -> Result<(), IoError> + Send + Sync>;

type SeqWriteFn<T> = Box<dyn Fn(&[&T], &mut TableWriter, &str) -> Result<(), IoError> + Send + Sync>;
type SeqReadFn<T> = Box<dyn Fn(&mut [T], &mut TableReader, &str) -> Result<(), IoError> + Send + Sync>;
type SeqLenFn = Box<dyn Fn(&mut TableReader, &str) -> Result<usize, IoError> + Send + Sync>;

/// One field of a scalar record: a column suffix plus the write and read
/// closures that move the field between the record and its column.
pub struct Field<T> {
    name: &'static str,
    write: WriteFn<T>,
    read: ReadFn<T>,
}

impl<T> Field<T> {
    /// Describe a field through its accessor pair.
    pub fn new<F, G, S>(name: &'static str, get: G, set: S) -> Self
    where
        F: Cell,
        G: Fn(&T) -> F + Copy + Send + Sync + 'static,
        S: Fn(&mut T, F) + Copy + Send + Sync + 'static,
    {
        let write: WriteFn<T> = Box::new(move |obj, out, prefix| {
            let column = format!("{prefix}.{name}");
            *out.get_or_make_column::<F>(&column)? = get(obj);
            Ok(())
        });
        let read: ReadFn<T> = Box::new(move |obj, input, prefix| {
            let column = format!("{prefix}.{name}");
            let value = input.value::<F>(&column)?.clone();
            set(obj, value);
            Ok(())
        });
        Self { name, write, read }
    }

    /// Column suffix of the field.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Assign the field of `obj` into its column slot.
    pub fn write(&self, obj: &T, out: &mut TableWriter, prefix: &str) -> Result<(), IoError> {
        (self.write)(obj, out, prefix)
    }

    /// Assign the current column cell into the field of `obj`.
    pub fn read(&self, obj: &mut T, input: &mut TableReader, prefix: &str) -> Result<(), IoError> {
        (self.read)(obj, input, prefix)
    }
}

/// One field of a sequence-of-record payload. The column holds one
/// sequence of scalars per row; `len` sizes the record list on read.
pub struct SeqField<T> {
    name: &'static str,
    write: SeqWriteFn<T>,
    read: SeqReadFn<T>,
    len: SeqLenFn,
}

impl<T> SeqField<T> {
    /// Describe a sequence field through its accessor pair.
    pub fn new<F, G, S>(name: &'static str, get: G, set: S) -> Self
    where
        F: Cell,
        G: Fn(&T) -> F + Copy + Send + Sync + 'static,
        S: Fn(&mut T, F) + Copy + Send + Sync + 'static,
    {
        let write: SeqWriteFn<T> = Box::new(move |objs, out, prefix| {
            let column = format!("{prefix}.{name}");
            let buf = out.get_or_make_column::<Vec<F>>(&column)?;
            buf.clear();
            buf.reserve(objs.len());
            for obj in objs {
                buf.push(get(obj));
            }
            Ok(())
        });
        let read: SeqReadFn<T> = Box::new(move |objs, input, prefix| {
            let column = format!("{prefix}.{name}");
            let cells = input.value::<Vec<F>>(&column)?.clone();
            for (obj, value) in objs.iter_mut().zip(cells) {
                set(obj, value);
            }
            Ok(())
        });
        let len: SeqLenFn = Box::new(move |input, prefix| {
            let column = format!("{prefix}.{name}");
            Ok(input.value::<Vec<F>>(&column)?.len())
        });
        Self {
            name,
            write,
            read,
            len,
        }
    }

    /// Column suffix of the field.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Write the field of every record into the sequence column.
    pub fn write(&self, objs: &[&T], out: &mut TableWriter, prefix: &str) -> Result<(), IoError> {
        (self.write)(objs, out, prefix)
    }

    /// Distribute the sequence column over the preallocated records.
    pub fn read(
        &self,
        objs: &mut [T],
        input: &mut TableReader,
        prefix: &str,
    ) -> Result<(), IoError> {
        (self.read)(objs, input, prefix)
    }

    /// Number of records stored at the current entry.
    pub fn len(&self, input: &mut TableReader, prefix: &str) -> Result<usize, IoError> {
        (self.len)(input, prefix)
    }
}

/// A record type with a field descriptor.
pub trait Record: Clone + Default + Send + 'static {
    /// Ordered field list for a scalar payload of this type.
    fn fields() -> Vec<Field<Self>>
    where
        Self: Sized;

    /// Ordered field list for a sequence-of-record payload. Types that are
    /// only persisted as scalar records keep the default empty list.
    fn seq_fields() -> Vec<SeqField<Self>>
    where
        Self: Sized,
    {
        Vec::new()
    }
}
