use core::ptr::NonNull;

use crate::error::{Error, ErrorCode, Result};
use crate::provider::{RawBytes, Sqlite3Api, ValueType};
use crate::statement::Statement;
use crate::value::{Value, ValueRef};

/// The row a [`Statement::step`] just produced.
///
/// Borrowed text and blob views stay valid until the next step or reset.
pub struct Row<'s, 'c, P: Sqlite3Api> {
    stmt: &'s Statement<'c, P>,
}

impl<'s, 'c, P: Sqlite3Api> Row<'s, 'c, P> {
    pub(crate) fn new(stmt: &'s Statement<'c, P>) -> Self {
        Self { stmt }
    }

    fn api(&self) -> &'static P {
        self.stmt.api()
    }

    fn raw(&self) -> NonNull<P::Stmt> {
        self.stmt.stmt
    }

    pub fn column_count(&self) -> i32 {
        self.stmt.column_count()
    }

    pub fn column_name(&self, col: i32) -> Option<&str> {
        self.stmt.column_name(col)
    }

    /// Storage class of column `col` in this row.
    pub fn column_type(&self, col: i32) -> ValueType {
        unsafe { self.api().column_type(self.raw(), col) }
    }

    pub fn column_int64(&self, col: i32) -> i64 {
        unsafe { self.api().column_int64(self.raw(), col) }
    }

    pub fn column_double(&self, col: i32) -> f64 {
        unsafe { self.api().column_double(self.raw(), col) }
    }

    pub fn column_text_raw(&self, col: i32) -> RawBytes {
        unsafe { self.api().column_text(self.raw(), col) }
    }

    pub fn column_blob_raw(&self, col: i32) -> RawBytes {
        unsafe { self.api().column_blob(self.raw(), col) }
    }

    /// Text of column `col`; `None` when the bytes are not UTF-8.
    pub fn column_text(&self, col: i32) -> Option<&str> {
        unsafe { self.column_text_raw(col).as_str() }
    }

    pub fn column_blob(&self, col: i32) -> &[u8] {
        unsafe { self.column_blob_raw(col).as_slice() }
    }

    /// Column `col` read according to its storage class.
    pub fn column_value_ref(&self, col: i32) -> ValueRef<'_> {
        match self.column_type(col) {
            ValueType::Null => ValueRef::Null,
            ValueType::Integer => ValueRef::Integer(self.column_int64(col)),
            ValueType::Float => ValueRef::Float(self.column_double(col)),
            ValueType::Text => unsafe { ValueRef::from_raw_text(self.column_text_raw(col)) },
            ValueType::Blob => unsafe { ValueRef::from_raw_blob(self.column_blob_raw(col)) },
        }
    }

    pub fn column_value(&self, col: i32) -> Value {
        self.column_value_ref(col).to_owned()
    }

    /// Value of the column called `name` (ASCII case-insensitive).
    pub fn value_named(&self, name: &str) -> Result<Value> {
        let col = self.stmt.column_index(name).ok_or_else(|| {
            Error::with_message(ErrorCode::Range, format!("no column named '{name}'"))
        })?;
        Ok(self.column_value(col))
    }

    /// Every column of the row, in result order.
    pub fn values(&self) -> Vec<Value> {
        (0..self.column_count()).map(|col| self.column_value(col)).collect()
    }
}
