use core::fmt;
use core::ptr::NonNull;
use std::any::Any;
use std::sync::Arc;

use crate::bridge::{POINTER_TYPE, Registration};
use crate::error::Result;
use crate::provider::{RawBytes, Sqlite3Api, ValueType};

/// Owned SQLite value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Arbitrary bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Storage class of this value.
    pub fn value_type(&self) -> ValueType {
        self.as_ref().value_type()
    }

    /// Borrow as a `ValueRef`.
    pub fn as_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Float(v) => ValueRef::Float(*v),
            Value::Text(v) => ValueRef::Text(v),
            Value::Blob(v) => ValueRef::Blob(v),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_ref().as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_ref().as_f64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_ref().as_str()
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        self.as_ref().as_blob()
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Borrowed SQLite value view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueRef<'a> {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    Text(&'a str),
    /// Bytes.
    Blob(&'a [u8]),
}

impl<'a> ValueRef<'a> {
    /// Storage class of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueRef::Null => ValueType::Null,
            ValueRef::Integer(_) => ValueType::Integer,
            ValueRef::Float(_) => ValueType::Float,
            ValueRef::Text(_) => ValueType::Text,
            ValueRef::Blob(_) => ValueType::Blob,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ValueRef::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueRef::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            ValueRef::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&'a [u8]> {
        match self {
            ValueRef::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Copy into an owned `Value`.
    pub fn to_owned(&self) -> Value {
        match *self {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Float(v) => Value::Float(v),
            ValueRef::Text(v) => Value::Text(v.to_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }

    /// Text view over engine-owned bytes; invalid UTF-8 is surfaced as a blob.
    ///
    /// # Safety
    /// `raw` must stay valid for `'a`.
    pub unsafe fn from_raw_text(raw: RawBytes) -> ValueRef<'a> {
        let bytes = unsafe { raw.as_slice() };
        match core::str::from_utf8(bytes) {
            Ok(text) => ValueRef::Text(text),
            Err(_) => ValueRef::Blob(bytes),
        }
    }

    /// # Safety
    /// `raw` must stay valid for `'a`.
    pub unsafe fn from_raw_blob(raw: RawBytes) -> ValueRef<'a> {
        ValueRef::Blob(unsafe { raw.as_slice() })
    }
}

/// Read-only view over one native argument cell.
///
/// Valid only for the callback invocation that produced it. Accessors apply
/// the engine's own type coercions, so `int64` on a text cell parses it.
pub struct Arg<'a, P: Sqlite3Api> {
    api: &'a P,
    raw: NonNull<P::Value>,
}

impl<P: Sqlite3Api> Clone for Arg<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Sqlite3Api> Copy for Arg<'_, P> {}

impl<'a, P: Sqlite3Api> Arg<'a, P> {
    /// # Safety
    /// `raw` must be a live value cell for the duration of `'a`.
    pub unsafe fn from_raw(api: &'a P, raw: NonNull<P::Value>) -> Self {
        Self { api, raw }
    }

    /// Raw native cell.
    pub fn as_ptr(&self) -> NonNull<P::Value> {
        self.raw
    }

    /// Declared storage class of the cell.
    pub fn value_type(&self) -> ValueType {
        unsafe { self.api.value_type(self.raw) }
    }

    pub fn is_null(&self) -> bool {
        self.value_type() == ValueType::Null
    }

    /// 32-bit integer view (truncating like the engine does).
    pub fn int(&self) -> i32 {
        self.int64() as i32
    }

    pub fn int64(&self) -> i64 {
        unsafe { self.api.value_int64(self.raw) }
    }

    pub fn float(&self) -> f64 {
        unsafe { self.api.value_double(self.raw) }
    }

    /// Text view; fails when the cell's bytes are not UTF-8.
    pub fn text(&self) -> Result<&'a str> {
        let raw = unsafe { self.api.value_text(self.raw) };
        Ok(core::str::from_utf8(unsafe { raw.as_slice() })?)
    }

    pub fn blob(&self) -> &'a [u8] {
        unsafe { self.api.value_blob(self.raw).as_slice() }
    }

    /// Size in bytes of the text or blob representation.
    pub fn len(&self) -> usize {
        unsafe { self.api.value_bytes(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Application-defined subtype tag attached by the producer of the value.
    pub fn subtype(&self) -> u32 {
        unsafe { self.api.value_subtype(self.raw) }
    }

    /// True inside `xUpdate` when the column is unchanged by the statement.
    pub fn nochange(&self) -> bool {
        unsafe { self.api.value_nochange(self.raw) }
    }

    /// Value passed as a pointer by [`Context::set_pointer`] or
    /// [`Statement::bind_pointer`].
    ///
    /// `None` when the cell carries no bridge pointer or one holding another
    /// type.
    ///
    /// [`Context::set_pointer`]: crate::Context::set_pointer
    /// [`Statement::bind_pointer`]: crate::Statement::bind_pointer
    pub fn pointer<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let ptr = unsafe { self.api.value_pointer(self.raw, POINTER_TYPE) };
        unsafe { Registration::<P>::pointee(ptr) }
    }

    /// Typed view following the declared storage class.
    pub fn to_value_ref(&self) -> ValueRef<'a> {
        match self.value_type() {
            ValueType::Null => ValueRef::Null,
            ValueType::Integer => ValueRef::Integer(self.int64()),
            ValueType::Float => ValueRef::Float(self.float()),
            ValueType::Text => unsafe { ValueRef::from_raw_text(self.api.value_text(self.raw)) },
            ValueType::Blob => unsafe { ValueRef::from_raw_blob(self.api.value_blob(self.raw)) },
        }
    }

    pub fn to_value(&self) -> Value {
        self.to_value_ref().to_owned()
    }

    /// Type-aware key equality used to tell an in-place update from a
    /// key-changing replace.
    ///
    /// The comparison follows the storage class of `self`; NULL never equals
    /// anything.
    pub fn same_key(&self, other: &Arg<'_, P>) -> bool {
        match self.value_type() {
            ValueType::Integer => self.int64() == other.int64(),
            ValueType::Float => self.float() == other.float(),
            ValueType::Text => matches!((self.text(), other.text()), (Ok(a), Ok(b)) if a == b),
            ValueType::Blob => self.blob() == other.blob(),
            ValueType::Null => false,
        }
    }
}

impl<P: Sqlite3Api> fmt::Debug for Arg<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Arg").field(&self.to_value_ref()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueRef};
    use crate::provider::{RawBytes, ValueType};

    #[test]
    fn invalid_utf8_text_reads_as_blob() {
        let bytes = [0xffu8, 0xfe];
        let raw = RawBytes {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        };
        let value = unsafe { ValueRef::from_raw_text(raw) };
        assert_eq!(value, ValueRef::Blob(&bytes));
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::Float(1.5).value_type(), ValueType::Float);
    }
}
