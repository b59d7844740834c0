//! Bridge between the SQLite extension callback protocol and safe Rust handlers.
//!
//! The engine is reached through the [`Sqlite3Api`] provider SPI. A [`Bridge`]
//! built once per provider owns the handle registry, the aggregate context
//! store, named extensions and hook state; every native registration carries
//! a reference to it, so callbacks never touch process-wide globals.

mod aggregate;
mod bridge;
mod connection;
mod context;
mod error;
mod extension;
mod function;
mod handle;
mod provider;
mod row;
mod statement;
mod unlock;
mod value;
pub mod vtab;

pub use crate::aggregate::{Accumulator, AggregateStore, Slot};
pub use crate::bridge::{Bridge, BridgeOptions};
pub use crate::connection::{Connection, Limit};
pub use crate::context::Context;
pub use crate::error::{Error, ErrorCode, LOCKED_SHAREDCACHE, Result};
pub use crate::extension::{DEFAULT_EXTENSION, ExtensionInit};
pub use crate::function::{AggregateFunction, Function, ScalarFunction, WindowFunction};
pub use crate::handle::{Handle, HandleRegistry};
pub use crate::provider::{
    ApiVersion, FeatureSet, FunctionFlags, OpenFlags, OpenOptions, RawBytes, Sqlite3Api,
    Sqlite3Hooks, StepResult, ValueType, XCompare, XDestroy, XFinal, XFunc, XUnlockNotify,
    nul_in_name,
};
pub use crate::provider::{
    sqlite3_index_constraint, sqlite3_index_constraint_usage, sqlite3_index_info,
    sqlite3_index_orderby, sqlite3_module, sqlite3_vtab, sqlite3_vtab_cursor,
};
pub use crate::row::Row;
pub use crate::statement::Statement;
pub use crate::unlock::{UnlockNote, unlock_notify_callback};
pub use crate::value::{Arg, Value, ValueRef};
