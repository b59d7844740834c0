mod core;
mod hooks;

pub use self::core::Connection;
pub(crate) use self::hooks::HookTable;
pub use self::hooks::Limit;
