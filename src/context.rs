use core::cell::Cell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use std::any::Any;
use std::sync::Arc;

use crate::bridge::{Bridge, POINTER_TYPE, Registration, release_registration};
use crate::error::{Error, ErrorCode, Result};
use crate::provider::Sqlite3Api;
use crate::value::{Arg, Value, ValueRef};

/// Result sink for one function or column callback.
///
/// One terminal write per invocation is expected. If none happens the
/// trampoline stores SQL NULL.
pub struct Context<'a, P: Sqlite3Api> {
    bridge: &'a Arc<Bridge<P>>,
    api: &'static P,
    ctx: NonNull<P::Context>,
    written: Cell<bool>,
}

impl<'a, P: Sqlite3Api> Context<'a, P> {
    pub(crate) fn new(bridge: &'a Arc<Bridge<P>>, ctx: NonNull<P::Context>) -> Self {
        Self {
            bridge,
            api: bridge.api(),
            ctx,
            written: Cell::new(false),
        }
    }

    fn mark(&self) {
        if self.written.replace(true) {
            tracing::trace!("result overwritten within one callback");
        }
    }

    /// Whether a terminal write already happened.
    pub fn has_result(&self) -> bool {
        self.written.get()
    }

    pub fn set_null(&self) {
        self.mark();
        unsafe { self.api.result_null(self.ctx) }
    }

    pub fn set_int(&self, v: i32) {
        self.set_int64(i64::from(v))
    }

    pub fn set_int64(&self, v: i64) {
        self.mark();
        unsafe { self.api.result_int64(self.ctx, v) }
    }

    pub fn set_float(&self, v: f64) {
        self.mark();
        unsafe { self.api.result_double(self.ctx, v) }
    }

    pub fn set_text(&self, v: &str) {
        self.mark();
        unsafe { self.api.result_text(self.ctx, v) }
    }

    pub fn set_blob(&self, v: &[u8]) {
        self.mark();
        unsafe { self.api.result_blob(self.ctx, v) }
    }

    /// Blob of `len` zero bytes.
    pub fn set_zeroblob(&self, len: usize) {
        self.mark();
        unsafe { self.api.result_zeroblob(self.ctx, len) }
    }

    pub fn set_value(&self, value: ValueRef<'_>) {
        match value {
            ValueRef::Null => self.set_null(),
            ValueRef::Integer(v) => self.set_int64(v),
            ValueRef::Float(v) => self.set_float(v),
            ValueRef::Text(v) => self.set_text(v),
            ValueRef::Blob(v) => self.set_blob(v),
        }
    }

    pub fn set_owned(&self, value: Value) {
        self.set_value(value.as_ref())
    }

    /// Propagate an argument cell unchanged, subtype included.
    pub fn set_arg(&self, arg: &Arg<'_, P>) {
        self.mark();
        unsafe { self.api.result_value(self.ctx, arg.as_ptr()) }
    }

    /// Return `value` as a pointer value.
    ///
    /// SQL sees NULL; a function that receives the result reads it back with
    /// [`Arg::pointer`]. The value is released when the engine drops the
    /// result. Without backend support the result is a feature-unavailable
    /// error.
    pub fn set_pointer<T: Any + Send + Sync>(&self, value: T) {
        self.mark();
        let ptr = Registration::install(self.bridge, value);
        let out = unsafe {
            self.api
                .result_pointer(self.ctx, ptr, POINTER_TYPE, Some(release_registration::<P>))
        };
        if let Err(err) = out {
            self.set_error(&err);
        }
    }

    /// Tag the result with an application-defined subtype (for example JSON).
    ///
    /// Not a terminal write; pair it with one of the setters.
    pub fn set_subtype(&self, subtype: u32) {
        unsafe { self.api.result_subtype(self.ctx, subtype) }
    }

    /// Generic failure with a message.
    pub fn set_error_message(&self, msg: &str) {
        self.mark();
        unsafe { self.api.result_error(self.ctx, msg) }
    }

    /// Failure with a specific status code.
    pub fn set_error_code(&self, code: ErrorCode) {
        self.mark();
        let status = Error::new(code).status();
        unsafe { self.api.result_error_code(self.ctx, status) }
    }

    pub fn set_error_nomem(&self) {
        self.mark();
        unsafe { self.api.result_error_nomem(self.ctx) }
    }

    /// Report `err`: message first, then the specific code when it has one.
    pub fn set_error(&self, err: &Error) {
        match err.code {
            ErrorCode::NoMem => self.set_error_nomem(),
            code => {
                self.set_error_message(&err.to_string());
                if !matches!(
                    code,
                    ErrorCode::Error | ErrorCode::FeatureUnavailable | ErrorCode::Ok
                ) {
                    unsafe { self.api.result_error_code(self.ctx, err.status()) }
                }
            }
        }
    }

    /// Translate a caught handler outcome. `fill_null` writes NULL when the
    /// handler succeeded without producing a result.
    pub(crate) fn conclude(
        &self,
        outcome: std::thread::Result<Result<()>>,
        what: &'static str,
        fill_null: bool,
    ) {
        match outcome {
            Ok(Ok(())) => {
                if fill_null && !self.has_result() {
                    self.set_null();
                }
            }
            Ok(Err(err)) => {
                tracing::debug!(%err, what, "handler returned error");
                self.set_error(&err);
            }
            Err(payload) => {
                let msg = panic_message(&*payload);
                tracing::warn!(what, panic = %msg, "handler panicked");
                self.set_error_message(&format!("panic in {what}: {msg}"));
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

const INLINE_ARGS: usize = 8;

/// Argument vector that stays on the stack for small arities.
pub(crate) struct ArgBuffer<T: Copy> {
    inline: [MaybeUninit<T>; INLINE_ARGS],
    len: usize,
    heap: Option<Vec<T>>,
}

impl<T: Copy> ArgBuffer<T> {
    pub(crate) fn new(argc: usize) -> Self {
        Self {
            inline: [const { MaybeUninit::uninit() }; INLINE_ARGS],
            len: 0,
            heap: (argc > INLINE_ARGS).then(|| Vec::with_capacity(argc)),
        }
    }

    pub(crate) fn push(&mut self, value: T) {
        match &mut self.heap {
            Some(heap) => heap.push(value),
            None => {
                self.inline[self.len].write(value);
                self.len += 1;
            }
        }
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        match &self.heap {
            Some(heap) => heap.as_slice(),
            None => unsafe { core::slice::from_raw_parts(self.inline.as_ptr().cast::<T>(), self.len) },
        }
    }
}

/// Wrap a native `argv` as argument views.
///
/// # Safety
/// `argv` must hold `argc` value cells that stay valid for `'a`.
pub(crate) unsafe fn args_from_raw<'a, P: Sqlite3Api>(
    api: &'a P,
    argc: i32,
    argv: *mut *mut P::Value,
) -> Result<ArgBuffer<Arg<'a, P>>> {
    let argc = usize::try_from(argc).unwrap_or(0);
    let mut args = ArgBuffer::new(argc);
    if argc == 0 || argv.is_null() {
        return Ok(args);
    }
    let cells = unsafe { core::slice::from_raw_parts(argv, argc) };
    for (idx, cell) in cells.iter().enumerate() {
        let cell = NonNull::new(*cell)
            .ok_or_else(|| Error::misuse(format!("argument {idx} is a null value cell")))?;
        args.push(unsafe { Arg::from_raw(api, cell) });
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::{ArgBuffer, INLINE_ARGS, panic_message};

    #[test]
    fn arg_buffer_inline_and_heap() {
        let mut small = ArgBuffer::new(2);
        small.push(1);
        small.push(2);
        assert_eq!(small.as_slice(), &[1, 2]);

        let mut large = ArgBuffer::new(INLINE_ARGS + 1);
        for i in 0..=INLINE_ARGS {
            large.push(i);
        }
        assert_eq!(large.as_slice().len(), INLINE_ARGS + 1);
        assert_eq!(large.as_slice()[INLINE_ARGS], INLINE_ARGS);
    }

    #[test]
    fn panic_payloads_render() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&7u8), "unknown panic");
    }
}
