use core::cmp::Ordering;
use core::ffi::c_void;
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::aggregate::Accumulator;
use crate::bridge::{Registration, release_registration};
use crate::connection::Connection;
use crate::context::{Context, args_from_raw};
use crate::error::{Error, Result};
use crate::provider::{FeatureSet, FunctionFlags, Sqlite3Api, XFinal, XFunc};
use crate::value::{Arg, Value};

/// Function evaluated once per row.
pub trait ScalarFunction<P: Sqlite3Api>: Send + Sync + 'static {
    /// Compute the result for `args` and write it to `ctx`.
    fn apply(&self, ctx: &Context<'_, P>, args: &[Arg<'_, P>]) -> Result<()>;
}

/// Function folding a group of rows into one result.
pub trait AggregateFunction<P: Sqlite3Api>: Send + Sync + 'static {
    /// Per-group state.
    type Accumulator: Send + 'static;

    /// Fresh accumulator for a group that has seen no rows.
    fn init(&self) -> Self::Accumulator;
    fn step(&self, acc: &mut Self::Accumulator, args: &[Arg<'_, P>]) -> Result<()>;
    /// Produce the group's result. Leaving `ctx` untouched yields NULL.
    fn finalize(&self, ctx: &Context<'_, P>, acc: Self::Accumulator) -> Result<()>;
}

/// Aggregate usable over sliding window frames.
pub trait WindowFunction<P: Sqlite3Api>: AggregateFunction<P> {
    /// Undo the contribution of rows previously passed to `step`.
    fn inverse(&self, acc: &mut Self::Accumulator, args: &[Arg<'_, P>]) -> Result<()>;
    /// Current result without consuming the accumulator.
    fn value(&self, ctx: &Context<'_, P>, acc: &Self::Accumulator) -> Result<()>;
}

trait AccumulatorOps<P: Sqlite3Api>: Send + Sync {
    fn init(&self) -> Accumulator;
    fn step(&self, acc: &mut Accumulator, args: &[Arg<'_, P>]) -> Result<()>;
    fn inverse(&self, acc: &mut Accumulator, args: &[Arg<'_, P>]) -> Result<()>;
    fn value(&self, ctx: &Context<'_, P>, acc: &Accumulator) -> Result<()>;
    fn finalize(&self, ctx: &Context<'_, P>, acc: Accumulator) -> Result<()>;
}

fn typed_mut<T: 'static>(acc: &mut Accumulator) -> Result<&mut T> {
    (**acc)
        .downcast_mut::<T>()
        .ok_or_else(|| Error::misuse("aggregate accumulator has unexpected type"))
}

fn typed<T: 'static>(acc: &Accumulator) -> Result<&T> {
    (**acc)
        .downcast_ref::<T>()
        .ok_or_else(|| Error::misuse("aggregate accumulator has unexpected type"))
}

fn typed_owned<T: 'static>(acc: Accumulator) -> Result<T> {
    acc.downcast::<T>()
        .map(|acc| *acc)
        .map_err(|_| Error::misuse("aggregate accumulator has unexpected type"))
}

struct AggregateOps<F>(F);

impl<P: Sqlite3Api, F: AggregateFunction<P>> AccumulatorOps<P> for AggregateOps<F> {
    fn init(&self) -> Accumulator {
        Box::new(self.0.init())
    }

    fn step(&self, acc: &mut Accumulator, args: &[Arg<'_, P>]) -> Result<()> {
        self.0.step(typed_mut(acc)?, args)
    }

    fn inverse(&self, _acc: &mut Accumulator, _args: &[Arg<'_, P>]) -> Result<()> {
        Err(Error::misuse("inverse called on a non-window aggregate"))
    }

    fn value(&self, _ctx: &Context<'_, P>, _acc: &Accumulator) -> Result<()> {
        Err(Error::misuse("value called on a non-window aggregate"))
    }

    fn finalize(&self, ctx: &Context<'_, P>, acc: Accumulator) -> Result<()> {
        self.0.finalize(ctx, typed_owned(acc)?)
    }
}

struct WindowOps<F>(F);

impl<P: Sqlite3Api, F: WindowFunction<P>> AccumulatorOps<P> for WindowOps<F> {
    fn init(&self) -> Accumulator {
        Box::new(self.0.init())
    }

    fn step(&self, acc: &mut Accumulator, args: &[Arg<'_, P>]) -> Result<()> {
        self.0.step(typed_mut(acc)?, args)
    }

    fn inverse(&self, acc: &mut Accumulator, args: &[Arg<'_, P>]) -> Result<()> {
        self.0.inverse(typed_mut(acc)?, args)
    }

    fn value(&self, ctx: &Context<'_, P>, acc: &Accumulator) -> Result<()> {
        self.0.value(ctx, typed(acc)?)
    }

    fn finalize(&self, ctx: &Context<'_, P>, acc: Accumulator) -> Result<()> {
        self.0.finalize(ctx, typed_owned(acc)?)
    }
}

enum FunctionKind<P: Sqlite3Api> {
    Scalar(Box<dyn ScalarFunction<P>>),
    Aggregate(Box<dyn AccumulatorOps<P>>),
    Window(Box<dyn AccumulatorOps<P>>),
}

/// A user-defined SQL function ready for registration.
///
/// The variant is fixed at construction and selects the native callback set
/// once, at registration time.
pub struct Function<P: Sqlite3Api> {
    n_args: i32,
    flags: FunctionFlags,
    kind: FunctionKind<P>,
}

impl<P: Sqlite3Api> Function<P> {
    /// Scalar function taking `n_args` arguments (negative for variadic).
    pub fn scalar(n_args: i32, func: impl ScalarFunction<P>) -> Self {
        Self::build(n_args, FunctionKind::Scalar(Box::new(func)))
    }

    pub fn aggregate(n_args: i32, func: impl AggregateFunction<P>) -> Self {
        Self::build(n_args, FunctionKind::Aggregate(Box::new(AggregateOps(func))))
    }

    pub fn window(n_args: i32, func: impl WindowFunction<P>) -> Self {
        Self::build(n_args, FunctionKind::Window(Box::new(WindowOps(func))))
    }

    fn build(n_args: i32, kind: FunctionKind<P>) -> Self {
        Self {
            n_args,
            flags: FunctionFlags::empty(),
            kind,
        }
    }

    /// Mark the function deterministic so the planner may factor calls out.
    pub fn deterministic(mut self) -> Self {
        self.flags |= FunctionFlags::DETERMINISTIC;
        self
    }

    /// Refuse calls from triggers, views and schema expressions.
    pub fn direct_only(mut self) -> Self {
        self.flags |= FunctionFlags::DIRECT_ONLY;
        self
    }

    pub fn innocuous(mut self) -> Self {
        self.flags |= FunctionFlags::INNOCUOUS;
        self
    }

    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn n_args(&self) -> i32 {
        self.n_args
    }

    pub fn is_deterministic(&self) -> bool {
        self.flags.contains(FunctionFlags::DETERMINISTIC)
    }

    fn accumulator(&self) -> Result<&dyn AccumulatorOps<P>> {
        match &self.kind {
            FunctionKind::Aggregate(ops) | FunctionKind::Window(ops) => Ok(ops.as_ref()),
            FunctionKind::Scalar(_) => Err(Error::misuse("aggregate callback on a scalar function")),
        }
    }
}

struct ScalarFn<F>(F);

impl<P, F> ScalarFunction<P> for ScalarFn<F>
where
    P: Sqlite3Api,
    F: for<'a> Fn(&[Arg<'a, P>]) -> Result<Value> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &Context<'_, P>, args: &[Arg<'_, P>]) -> Result<()> {
        ctx.set_owned((self.0)(args)?);
        Ok(())
    }
}

struct AggregateFns<T, I, S, F> {
    init: I,
    step: S,
    finish: F,
    _acc: PhantomData<fn() -> T>,
}

impl<P, T, I, S, F> AggregateFunction<P> for AggregateFns<T, I, S, F>
where
    P: Sqlite3Api,
    T: Send + 'static,
    I: Fn() -> T + Send + Sync + 'static,
    S: for<'a> Fn(&mut T, &[Arg<'a, P>]) -> Result<()> + Send + Sync + 'static,
    F: Fn(T) -> Result<Value> + Send + Sync + 'static,
{
    type Accumulator = T;

    fn init(&self) -> T {
        (self.init)()
    }

    fn step(&self, acc: &mut T, args: &[Arg<'_, P>]) -> Result<()> {
        (self.step)(acc, args)
    }

    fn finalize(&self, ctx: &Context<'_, P>, acc: T) -> Result<()> {
        ctx.set_owned((self.finish)(acc)?);
        Ok(())
    }
}

/// Collation comparator as stored in the handle registry.
struct Collation(Box<dyn Fn(&str, &str) -> Ordering + Send + Sync>);

impl<P: Sqlite3Api> Connection<P> {
    /// Register `function` under `name`, replacing any previous definition
    /// with the same name and arity.
    pub fn create_function(&self, name: &str, function: Function<P>) -> Result<()> {
        let api = self.api();
        let (needed, what) = match function.kind {
            FunctionKind::Window(_) => (FeatureSet::WINDOW_FUNCTIONS, "window functions unsupported"),
            _ => (FeatureSet::CREATE_FUNCTION_V2, "create_function_v2 unsupported"),
        };
        if !api.feature_set().contains(needed) {
            return Err(Error::feature_unavailable(what));
        }
        let n_args = function.n_args;
        let flags = function.flags;
        tracing::debug!(name, n_args, ?flags, "registering function");
        match function.kind {
            FunctionKind::Scalar(_) => {
                let user_data = Registration::install(&self.bridge, function);
                unsafe {
                    api.create_function_v2(
                        self.db,
                        name,
                        n_args,
                        flags,
                        Some(scalar_trampoline::<P> as XFunc<P>),
                        None,
                        None,
                        user_data,
                        Some(release_registration::<P>),
                    )
                }
            }
            FunctionKind::Aggregate(_) => {
                let user_data = Registration::install(&self.bridge, function);
                unsafe {
                    api.create_function_v2(
                        self.db,
                        name,
                        n_args,
                        flags,
                        None,
                        Some(step_trampoline::<P> as XFunc<P>),
                        Some(final_trampoline::<P> as XFinal<P>),
                        user_data,
                        Some(release_registration::<P>),
                    )
                }
            }
            FunctionKind::Window(_) => {
                let user_data = Registration::install(&self.bridge, function);
                unsafe {
                    api.create_window_function(
                        self.db,
                        name,
                        n_args,
                        flags,
                        Some(step_trampoline::<P> as XFunc<P>),
                        Some(final_trampoline::<P> as XFinal<P>),
                        Some(value_trampoline::<P> as XFinal<P>),
                        Some(inverse_trampoline::<P> as XFunc<P>),
                        user_data,
                        Some(release_registration::<P>),
                    )
                }
            }
        }
    }

    /// Register a scalar function from a closure returning the result value.
    pub fn create_scalar_function<F>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        func: F,
    ) -> Result<()>
    where
        F: for<'a> Fn(&[Arg<'a, P>]) -> Result<Value> + Send + Sync + 'static,
    {
        self.create_function(name, Function::scalar(n_args, ScalarFn(func)).with_flags(flags))
    }

    /// Register an aggregate function from closures.
    pub fn create_aggregate_function<T, I, S, F>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        init: I,
        step: S,
        finish: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        I: Fn() -> T + Send + Sync + 'static,
        S: for<'a> Fn(&mut T, &[Arg<'a, P>]) -> Result<()> + Send + Sync + 'static,
        F: Fn(T) -> Result<Value> + Send + Sync + 'static,
    {
        let func = AggregateFns {
            init,
            step,
            finish,
            _acc: PhantomData,
        };
        self.create_function(name, Function::aggregate(n_args, func).with_flags(flags))
    }

    /// Register a UTF-8 collation sequence.
    ///
    /// Bytes that are not valid UTF-8 reach `cmp` with replacement characters.
    pub fn create_collation<F>(&self, name: &str, cmp: F) -> Result<()>
    where
        F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
    {
        let api = self.api();
        if !api.feature_set().contains(FeatureSet::COLLATIONS) {
            return Err(Error::feature_unavailable("collations unsupported"));
        }
        tracing::debug!(name, "registering collation");
        let user_data = Registration::install(&self.bridge, Collation(Box::new(cmp)));
        unsafe {
            api.create_collation_v2(
                self.db,
                name,
                user_data,
                Some(compare_trampoline::<P>),
                Some(release_registration::<P>),
            )
        }
    }
}

/// Resolve the registration behind a function callback.
fn enter<'a, P: Sqlite3Api>(
    ctx: *mut P::Context,
) -> Option<(&'a Registration<P>, NonNull<P::Context>)> {
    let ctx = NonNull::new(ctx)?;
    let user_data = unsafe { P::user_data(ctx) };
    let Some(reg) = (unsafe { Registration::<P>::from_user_data(user_data) }) else {
        tracing::warn!("function callback without registration data");
        return None;
    };
    Some((reg, ctx))
}

extern "C" fn scalar_trampoline<P: Sqlite3Api>(
    ctx: *mut P::Context,
    argc: i32,
    argv: *mut *mut P::Value,
) {
    let Some((reg, ctx)) = enter::<P>(ctx) else {
        return;
    };
    let api = reg.bridge.api();
    let func = reg.restore::<Function<P>>();
    let context = Context::new(&reg.bridge, ctx);
    let out = catch_unwind(AssertUnwindSafe(|| {
        let FunctionKind::Scalar(scalar) = &func.kind else {
            return Err(Error::misuse("scalar callback on an aggregate function"));
        };
        let args = unsafe { args_from_raw(api, argc, argv)? };
        scalar.apply(&context, args.as_slice())
    }));
    context.conclude(out, "scalar function", true);
}

fn group_key<P: Sqlite3Api>(api: &P, ctx: NonNull<P::Context>, allocate: bool) -> usize {
    unsafe { api.aggregate_context(ctx, usize::from(allocate)) as usize }
}

extern "C" fn step_trampoline<P: Sqlite3Api>(
    ctx: *mut P::Context,
    argc: i32,
    argv: *mut *mut P::Value,
) {
    accumulate::<P>(ctx, argc, argv, "aggregate step", |ops, acc, args| ops.step(acc, args));
}

extern "C" fn inverse_trampoline<P: Sqlite3Api>(
    ctx: *mut P::Context,
    argc: i32,
    argv: *mut *mut P::Value,
) {
    accumulate::<P>(ctx, argc, argv, "window inverse", |ops, acc, args| ops.inverse(acc, args));
}

fn accumulate<P: Sqlite3Api>(
    ctx: *mut P::Context,
    argc: i32,
    argv: *mut *mut P::Value,
    what: &'static str,
    apply: impl FnOnce(&dyn AccumulatorOps<P>, &mut Accumulator, &[Arg<'_, P>]) -> Result<()>,
) {
    let Some((reg, ctx)) = enter::<P>(ctx) else {
        return;
    };
    let bridge = &reg.bridge;
    let api = bridge.api();
    let func = reg.restore::<Function<P>>();
    let context = Context::new(bridge, ctx);
    let key = group_key(api, ctx, true);
    if key == 0 {
        context.set_error_nomem();
        return;
    }
    let out = catch_unwind(AssertUnwindSafe(|| {
        let ops = func.accumulator()?;
        let slot = bridge.aggregates().get_or_create(key, || ops.init())?;
        let args = unsafe { args_from_raw(api, argc, argv)? };
        let mut acc = slot.lock();
        apply(ops, &mut acc, args.as_slice())
    }));
    context.conclude(out, what, false);
}

extern "C" fn value_trampoline<P: Sqlite3Api>(ctx: *mut P::Context) {
    let Some((reg, ctx)) = enter::<P>(ctx) else {
        return;
    };
    let bridge = &reg.bridge;
    let api = bridge.api();
    let func = reg.restore::<Function<P>>();
    let context = Context::new(bridge, ctx);
    let key = group_key(api, ctx, false);
    let out = catch_unwind(AssertUnwindSafe(|| {
        let ops = func.accumulator()?;
        match (key != 0).then(|| bridge.aggregates().get(key)).flatten() {
            Some(slot) => ops.value(&context, &slot.lock()),
            None => ops.value(&context, &ops.init()),
        }
    }));
    context.conclude(out, "window value", true);
}

extern "C" fn final_trampoline<P: Sqlite3Api>(ctx: *mut P::Context) {
    let Some((reg, ctx)) = enter::<P>(ctx) else {
        return;
    };
    let bridge = &reg.bridge;
    let api = bridge.api();
    let func = reg.restore::<Function<P>>();
    let context = Context::new(bridge, ctx);
    let key = group_key(api, ctx, false);
    // Evict before running user code so the slot is gone even if finalize fails.
    let acc = if key == 0 {
        None
    } else {
        bridge.aggregates().remove(key)
    };
    let out = catch_unwind(AssertUnwindSafe(|| {
        let ops = func.accumulator()?;
        ops.finalize(&context, acc.unwrap_or_else(|| ops.init()))
    }));
    context.conclude(out, "aggregate final", true);
}

extern "C" fn compare_trampoline<P: Sqlite3Api>(
    user_data: *mut c_void,
    lhs_len: i32,
    lhs: *const c_void,
    rhs_len: i32,
    rhs: *const c_void,
) -> i32 {
    let Some(reg) = (unsafe { Registration::<P>::from_user_data(user_data) }) else {
        return 0;
    };
    let collation = reg.restore::<Collation>();
    let lhs = unsafe { raw_bytes(lhs, lhs_len) };
    let rhs = unsafe { raw_bytes(rhs, rhs_len) };
    let out = catch_unwind(AssertUnwindSafe(|| {
        (collation.0)(&String::from_utf8_lossy(lhs), &String::from_utf8_lossy(rhs))
    }));
    match out {
        Ok(Ordering::Less) => -1,
        Ok(Ordering::Equal) => 0,
        Ok(Ordering::Greater) => 1,
        Err(_) => {
            tracing::warn!("collation comparator panicked; treating operands as equal");
            0
        }
    }
}

unsafe fn raw_bytes<'a>(ptr: *const c_void, len: i32) -> &'a [u8] {
    match usize::try_from(len) {
        Ok(len) if !ptr.is_null() => unsafe { core::slice::from_raw_parts(ptr.cast::<u8>(), len) },
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::{typed, typed_mut, typed_owned};
    use crate::aggregate::Accumulator;
    use crate::error::ErrorCode;

    #[test]
    fn accumulator_downcasts_check_type() {
        let mut acc: Accumulator = Box::new(4i64);
        *typed_mut::<i64>(&mut acc).unwrap() += 1;
        assert_eq!(*typed::<i64>(&acc).unwrap(), 5);
        assert_eq!(typed::<f64>(&acc).unwrap_err().code, ErrorCode::Misuse);
        assert_eq!(typed_owned::<i64>(acc).unwrap(), 5);
    }
}
