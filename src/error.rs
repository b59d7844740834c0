/// Extended result code reported when a shared-cache lock blocks the caller
/// and the engine can notify once the lock is released.
pub const LOCKED_SHAREDCACHE: i32 = 6 | (1 << 8);

/// Error returned by sqlite-bridge operations and by extension handlers.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{}", describe(.code, .message.as_deref()))]
pub struct Error {
    /// Primary SQLite-style result code for the failure.
    pub code: ErrorCode,
    /// Extended SQLite result code when one is known.
    pub extended: Option<i32>,
    /// Optional human-readable error message.
    pub message: Option<String>,
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLite result codes plus crate-specific conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Operation completed successfully.
    Ok,
    /// Generic SQL error.
    Error,
    /// Internal logic error.
    Internal,
    /// Access permission denied.
    Perm,
    /// Operation aborted.
    Abort,
    /// Database file is busy.
    Busy,
    /// Database object is locked.
    Locked,
    /// Memory allocation failed.
    NoMem,
    /// Attempt to write a read-only database or table.
    ReadOnly,
    /// Operation interrupted.
    Interrupt,
    /// Disk I/O error.
    IoErr,
    /// Database image is malformed.
    Corrupt,
    /// Requested operation not found.
    NotFound,
    /// Database or disk is full.
    Full,
    /// Unable to open database file.
    CantOpen,
    /// Locking protocol error.
    Protocol,
    /// Database is empty.
    Empty,
    /// Database schema changed.
    Schema,
    /// String or blob too large.
    TooBig,
    /// Constraint violation.
    Constraint,
    /// Datatype mismatch.
    Mismatch,
    /// API misuse.
    Misuse,
    /// Large-file support unavailable.
    NoLfs,
    /// Authorization denied.
    Auth,
    /// Auxiliary database format error.
    Format,
    /// Parameter or column index out of range.
    Range,
    /// File opened is not a database.
    NotADb,
    /// Informational notice.
    Notice,
    /// Warning condition.
    Warning,
    /// `sqlite3_step` produced a row.
    Row,
    /// `sqlite3_step` completed without row.
    Done,
    /// Requested optional capability is unavailable.
    FeatureUnavailable,
    /// Unknown or backend-specific result code.
    Unknown(i32),
}

impl ErrorCode {
    /// Decode a raw result code. Extended codes map by their primary low byte.
    pub const fn from_code(code: i32) -> ErrorCode {
        match code & 0xff {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Error,
            2 => ErrorCode::Internal,
            3 => ErrorCode::Perm,
            4 => ErrorCode::Abort,
            5 => ErrorCode::Busy,
            6 => ErrorCode::Locked,
            7 => ErrorCode::NoMem,
            8 => ErrorCode::ReadOnly,
            9 => ErrorCode::Interrupt,
            10 => ErrorCode::IoErr,
            11 => ErrorCode::Corrupt,
            12 => ErrorCode::NotFound,
            13 => ErrorCode::Full,
            14 => ErrorCode::CantOpen,
            15 => ErrorCode::Protocol,
            16 => ErrorCode::Empty,
            17 => ErrorCode::Schema,
            18 => ErrorCode::TooBig,
            19 => ErrorCode::Constraint,
            20 => ErrorCode::Mismatch,
            21 => ErrorCode::Misuse,
            22 => ErrorCode::NoLfs,
            23 => ErrorCode::Auth,
            24 => ErrorCode::Format,
            25 => ErrorCode::Range,
            26 => ErrorCode::NotADb,
            27 => ErrorCode::Notice,
            28 => ErrorCode::Warning,
            100 => ErrorCode::Row,
            101 => ErrorCode::Done,
            _ => ErrorCode::Unknown(code),
        }
    }

    /// Numeric primary code, if this condition has one.
    pub const fn code(self) -> Option<i32> {
        match self {
            ErrorCode::Ok => Some(0),
            ErrorCode::Error => Some(1),
            ErrorCode::Internal => Some(2),
            ErrorCode::Perm => Some(3),
            ErrorCode::Abort => Some(4),
            ErrorCode::Busy => Some(5),
            ErrorCode::Locked => Some(6),
            ErrorCode::NoMem => Some(7),
            ErrorCode::ReadOnly => Some(8),
            ErrorCode::Interrupt => Some(9),
            ErrorCode::IoErr => Some(10),
            ErrorCode::Corrupt => Some(11),
            ErrorCode::NotFound => Some(12),
            ErrorCode::Full => Some(13),
            ErrorCode::CantOpen => Some(14),
            ErrorCode::Protocol => Some(15),
            ErrorCode::Empty => Some(16),
            ErrorCode::Schema => Some(17),
            ErrorCode::TooBig => Some(18),
            ErrorCode::Constraint => Some(19),
            ErrorCode::Mismatch => Some(20),
            ErrorCode::Misuse => Some(21),
            ErrorCode::NoLfs => Some(22),
            ErrorCode::Auth => Some(23),
            ErrorCode::Format => Some(24),
            ErrorCode::Range => Some(25),
            ErrorCode::NotADb => Some(26),
            ErrorCode::Notice => Some(27),
            ErrorCode::Warning => Some(28),
            ErrorCode::Row => Some(100),
            ErrorCode::Done => Some(101),
            ErrorCode::FeatureUnavailable => None,
            ErrorCode::Unknown(code) => Some(code),
        }
    }
}

impl Error {
    /// Create an error with only a primary code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            extended: None,
            message: None,
        }
    }

    /// Create an error with a primary code and owned message text.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            extended: None,
            message: Some(message.into()),
        }
    }

    /// Create an error from a raw result code as returned by the engine.
    ///
    /// Codes carrying extended bits are recorded in `extended` as well.
    pub fn from_code(code: i32, message: Option<String>, extended: Option<i32>) -> Self {
        let extended = extended.or((code & !0xff != 0).then_some(code));
        Self {
            code: ErrorCode::from_code(code),
            extended,
            message,
        }
    }

    /// Create a capability error when a requested optional feature is unavailable.
    pub fn feature_unavailable(msg: &'static str) -> Self {
        Self {
            code: ErrorCode::FeatureUnavailable,
            extended: None,
            message: Some(msg.into()),
        }
    }

    /// Generic failure for broken callback contracts.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Misuse, message)
    }

    /// True for the shared-cache locked status that can be waited out.
    pub fn is_locked_shared_cache(&self) -> bool {
        self.code == ErrorCode::Locked && self.extended == Some(LOCKED_SHAREDCACHE)
    }

    /// Status code handed back to the engine.
    ///
    /// Conditions without a native code collapse to the generic error status.
    pub fn status(&self) -> i32 {
        match self.extended {
            Some(ext) if ext & 0xff == self.code.code().unwrap_or(-1) => ext,
            _ => self.code.code().filter(|c| *c != 0).unwrap_or(1),
        }
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_: core::str::Utf8Error) -> Self {
        Error::with_message(ErrorCode::Mismatch, "invalid utf-8 text")
    }
}

fn describe(code: &ErrorCode, message: Option<&str>) -> String {
    match (code, message) {
        (_, Some(msg)) => msg.to_owned(),
        (ErrorCode::Unknown(code), None) => format!("sqlite error code {code}"),
        (ErrorCode::FeatureUnavailable, None) => "feature unavailable".to_owned(),
        (code, None) => format!("sqlite error {code:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, LOCKED_SHAREDCACHE};

    #[test]
    fn error_code_mapping() {
        assert_eq!(ErrorCode::from_code(0), ErrorCode::Ok);
        assert_eq!(ErrorCode::from_code(19), ErrorCode::Constraint);
        assert_eq!(ErrorCode::from_code((8 << 8) | 19), ErrorCode::Constraint);
        assert_eq!(ErrorCode::from_code(LOCKED_SHAREDCACHE), ErrorCode::Locked);
        assert_eq!(ErrorCode::from_code(999), ErrorCode::Unknown(999));
    }

    #[test]
    fn extended_code_is_kept_from_raw_status() {
        let err = Error::from_code(LOCKED_SHAREDCACHE, None, None);
        assert!(err.is_locked_shared_cache());
        assert_eq!(err.status(), LOCKED_SHAREDCACHE);

        let plain = Error::from_code(6, None, None);
        assert!(!plain.is_locked_shared_cache());
        assert_eq!(plain.status(), 6);
    }

    #[test]
    fn status_falls_back_to_generic_error() {
        assert_eq!(Error::feature_unavailable("missing").status(), 1);
        assert_eq!(Error::new(ErrorCode::Ok).status(), 1);
        assert_eq!(Error::new(ErrorCode::ReadOnly).status(), 8);
    }

    #[test]
    fn display_prefers_message() {
        let err = Error::with_message(ErrorCode::Constraint, "duplicate key");
        assert_eq!(err.to_string(), "duplicate key");
        assert_eq!(Error::new(ErrorCode::Busy).to_string(), "sqlite error Busy");
        assert_eq!(
            Error::new(ErrorCode::FeatureUnavailable).to_string(),
            "feature unavailable"
        );
    }
}
