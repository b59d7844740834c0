#![allow(dead_code)]

use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlite_bridge::{
    ApiVersion, Bridge, Connection, Error, ErrorCode, FeatureSet, FunctionFlags, OpenFlags,
    OpenOptions, RawBytes, Result, Sqlite3Api, Sqlite3Hooks, StepResult, ValueType, XCompare,
    XDestroy, XFinal, XFunc, XUnlockNotify, sqlite3_module,
};

#[derive(Clone, Debug, PartialEq)]
pub enum MockValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Pointer value: address plus type tag. Reads as NULL.
    Pointer(usize, String),
}

impl MockValue {
    fn value_type(&self) -> ValueType {
        match self {
            MockValue::Null | MockValue::Pointer(..) => ValueType::Null,
            MockValue::Integer(_) => ValueType::Integer,
            MockValue::Float(_) => ValueType::Float,
            MockValue::Text(_) => ValueType::Text,
            MockValue::Blob(_) => ValueType::Blob,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockResult {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Error(String),
    ErrorNoMem,
    Pointer(usize, String),
}

type PointerDestroy = (XDestroy, usize);

fn release_pointer(pointer: Option<PointerDestroy>) {
    if let Some((destroy, addr)) = pointer {
        destroy(addr as *mut c_void);
    }
}

/// Per-invocation context. One instance stands for one aggregate group.
pub struct MockContext {
    pub user_data: *mut c_void,
    pub result: Option<MockResult>,
    pub error_code: Option<i32>,
    pub subtype: Option<u32>,
    agg: Option<Box<u64>>,
    pointer: Option<PointerDestroy>,
}

impl MockContext {
    pub fn new(user_data: *mut c_void) -> Self {
        Self {
            user_data,
            result: None,
            error_code: None,
            subtype: None,
            agg: None,
            pointer: None,
        }
    }

    /// Argument cell carrying this context's pointer result, as the engine
    /// passes it on to an enclosing function.
    pub fn pointer_arg(&self) -> MockValue {
        match &self.result {
            Some(MockResult::Pointer(addr, tag)) => MockValue::Pointer(*addr, tag.clone()),
            _ => MockValue::Null,
        }
    }

    pub fn take(&mut self) -> Option<MockResult> {
        self.error_code = None;
        self.subtype = None;
        self.result.take()
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        release_pointer(self.pointer.take());
    }
}

pub struct MockStmt {
    rows: Vec<Vec<MockValue>>,
    row_index: usize,
    current_row: Option<usize>,
    script: VecDeque<i32>,
    pub binds: Vec<(i32, MockValue)>,
    params: Vec<CString>,
    columns: Vec<CString>,
    pointers: Vec<PointerDestroy>,
}

impl MockStmt {
    fn current_value(&self, col: i32) -> Option<&MockValue> {
        let row = self.current_row?;
        self.rows.get(row)?.get(usize::try_from(col).ok()?)
    }
}

#[derive(Clone, Copy)]
pub struct FunctionRegistration {
    pub n_args: i32,
    pub flags: FunctionFlags,
    pub x_func: Option<XFunc<MockApi>>,
    pub x_step: Option<XFunc<MockApi>>,
    pub x_final: Option<XFinal<MockApi>>,
    pub x_value: Option<XFinal<MockApi>>,
    pub x_inverse: Option<XFunc<MockApi>>,
    pub user_data: *mut c_void,
    pub destroy: Option<XDestroy>,
}

#[derive(Clone, Copy)]
pub struct CollationRegistration {
    pub cmp: Option<XCompare>,
    pub context: *mut c_void,
    pub destroy: Option<XDestroy>,
}

#[derive(Clone, Copy)]
pub struct ModuleRegistration {
    pub module: *const sqlite3_module<MockApi>,
    pub user_data: *mut c_void,
    pub destroy: Option<XDestroy>,
}

impl ModuleRegistration {
    pub fn callbacks(&self) -> &sqlite3_module<MockApi> {
        unsafe { &*self.module }
    }
}

type CommitCallback = Option<extern "C" fn(*mut c_void) -> i32>;
type RollbackCallback = Option<extern "C" fn(*mut c_void)>;

/// Engine-side connection state. Replaced registrations are destroyed the
/// way the engine does it, and closing destroys everything left.
pub struct MockDb {
    pub functions: RefCell<HashMap<String, FunctionRegistration>>,
    pub collations: RefCell<HashMap<String, CollationRegistration>>,
    pub modules: RefCell<HashMap<String, ModuleRegistration>>,
    pub schemas: RefCell<Vec<String>>,
    pub limits: RefCell<HashMap<i32, i32>>,
    pub commit: Cell<(CommitCallback, *mut c_void)>,
    pub rollback: Cell<(RollbackCallback, *mut c_void)>,
    pub last_rowid: Cell<i64>,
    pub changes: Cell<i32>,
}

impl MockDb {
    fn new() -> Self {
        Self {
            functions: RefCell::new(HashMap::new()),
            collations: RefCell::new(HashMap::new()),
            modules: RefCell::new(HashMap::new()),
            schemas: RefCell::new(Vec::new()),
            limits: RefCell::new(HashMap::new()),
            commit: Cell::new((None, ptr::null_mut())),
            rollback: Cell::new((None, ptr::null_mut())),
            last_rowid: Cell::new(0),
            changes: Cell::new(0),
        }
    }

    pub fn function(&self, name: &str) -> FunctionRegistration {
        self.functions.borrow()[name]
    }

    pub fn module(&self, name: &str) -> ModuleRegistration {
        self.modules.borrow()[name]
    }

    /// Run the commit hook the way the engine does before committing.
    pub fn fire_commit(&self) -> Option<i32> {
        let (cb, ctx) = self.commit.get();
        cb.map(|cb| cb(ctx))
    }

    pub fn fire_rollback(&self) -> bool {
        let (cb, ctx) = self.rollback.get();
        cb.map(|cb| cb(ctx)).is_some()
    }
}

fn destroy(destroy: Option<XDestroy>, user_data: *mut c_void) {
    if let Some(destroy) = destroy {
        destroy(user_data);
    }
}

/// How the mock answers an unlock-notify request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlockMode {
    /// Blocking connection already finished: callback runs before returning.
    Immediate,
    /// Callback runs later from another thread.
    Deferred,
    /// Engine detects a deadlock and refuses to arm.
    Deadlock,
}

pub struct MockApi {
    features: FeatureSet,
    version: ApiVersion,
    next_rows: Mutex<Vec<Vec<MockValue>>>,
    next_script: Mutex<Vec<i32>>,
    next_params: Mutex<Vec<String>>,
    next_columns: Mutex<Vec<String>>,
    pub fail_registrations: AtomicBool,
    pub unlock_mode: Mutex<UnlockMode>,
    unlock_arms: AtomicUsize,
    unlock_cancels: AtomicUsize,
    resets: AtomicUsize,
    prepare_v2_calls: AtomicUsize,
    prepare_v3_calls: AtomicUsize,
    allocations: Mutex<HashMap<usize, usize>>,
}

impl MockApi {
    /// Provider with `features`, leaked as providers live for the whole process.
    pub fn leak(features: FeatureSet) -> &'static MockApi {
        Self::leak_with_version(features, ApiVersion::new(3, 45, 0))
    }

    pub fn leak_with_version(features: FeatureSet, version: ApiVersion) -> &'static MockApi {
        Box::leak(Box::new(MockApi {
            features,
            version,
            next_rows: Mutex::new(Vec::new()),
            next_script: Mutex::new(Vec::new()),
            next_params: Mutex::new(Vec::new()),
            next_columns: Mutex::new(Vec::new()),
            fail_registrations: AtomicBool::new(false),
            unlock_mode: Mutex::new(UnlockMode::Immediate),
            unlock_arms: AtomicUsize::new(0),
            unlock_cancels: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            prepare_v2_calls: AtomicUsize::new(0),
            prepare_v3_calls: AtomicUsize::new(0),
            allocations: Mutex::new(HashMap::new()),
        }))
    }

    /// Rows produced by the next prepared statement.
    pub fn set_rows(&self, rows: Vec<Vec<MockValue>>) {
        *self.next_rows.lock().unwrap() = rows;
    }

    /// Status codes the next prepared statement's `step` returns before its
    /// rows; `0` means "proceed normally".
    pub fn set_step_script(&self, codes: Vec<i32>) {
        *self.next_script.lock().unwrap() = codes;
    }

    /// Parameter names of the next prepared statement; `""` is anonymous.
    pub fn set_parameters(&self, names: &[&str]) {
        *self.next_params.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    /// Result column names of the next prepared statement.
    pub fn set_columns(&self, names: &[&str]) {
        *self.next_columns.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn set_unlock_mode(&self, mode: UnlockMode) {
        *self.unlock_mode.lock().unwrap() = mode;
    }

    pub fn unlock_arms(&self) -> usize {
        self.unlock_arms.load(Ordering::SeqCst)
    }

    pub fn unlock_cancels(&self) -> usize {
        self.unlock_cancels.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn prepare_v2_count(&self) -> usize {
        self.prepare_v2_calls.load(Ordering::SeqCst)
    }

    pub fn prepare_v3_count(&self) -> usize {
        self.prepare_v3_calls.load(Ordering::SeqCst)
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }

    /// Read and release an engine-allocated message.
    pub fn take_message(&self, msg: *mut c_char) -> Option<String> {
        if msg.is_null() {
            return None;
        }
        let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
        unsafe { self.free(msg.cast()) };
        Some(text)
    }

    fn new_stmt(&self) -> NonNull<MockStmt> {
        let rows = std::mem::take(&mut *self.next_rows.lock().unwrap());
        let script = std::mem::take(&mut *self.next_script.lock().unwrap());
        let to_c = |names: Vec<String>| -> Vec<CString> {
            names.into_iter().map(|n| CString::new(n).unwrap()).collect()
        };
        let stmt = Box::new(MockStmt {
            rows,
            row_index: 0,
            current_row: None,
            script: script.into(),
            binds: Vec::new(),
            params: to_c(std::mem::take(&mut *self.next_params.lock().unwrap())),
            columns: to_c(std::mem::take(&mut *self.next_columns.lock().unwrap())),
            pointers: Vec::new(),
        });
        NonNull::from(Box::leak(stmt))
    }

    fn refuse(&self, user_data: *mut c_void, destroy_fn: Option<XDestroy>) -> Result<()> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            destroy(destroy_fn, user_data);
            return Err(Error::with_message(ErrorCode::Busy, "registration refused"));
        }
        Ok(())
    }
}

fn raw(bytes: &[u8]) -> RawBytes {
    RawBytes {
        ptr: bytes.as_ptr(),
        len: bytes.len(),
    }
}

unsafe impl Sqlite3Api for MockApi {
    type Db = MockDb;
    type Stmt = MockStmt;
    type Value = MockValue;
    type Context = MockContext;

    fn api_version(&self) -> ApiVersion {
        self.version
    }

    fn feature_set(&self) -> FeatureSet {
        self.features
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }

    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        let Ok(layout) = Layout::from_size_align(size.max(1), 8) else {
            return ptr::null_mut();
        };
        let ptr = unsafe { alloc(layout) };
        if !ptr.is_null() {
            self.allocations.lock().unwrap().insert(ptr as usize, layout.size());
        }
        ptr.cast()
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        let size = self
            .allocations
            .lock()
            .unwrap()
            .remove(&(ptr as usize))
            .expect("free of a pointer the mock never allocated");
        let layout = Layout::from_size_align(size, 8).unwrap();
        unsafe { dealloc(ptr.cast(), layout) };
    }

    unsafe fn open(&self, _filename: &str, _options: OpenOptions<'_>) -> Result<NonNull<MockDb>> {
        Ok(NonNull::from(Box::leak(Box::new(MockDb::new()))))
    }

    unsafe fn close(&self, db: NonNull<MockDb>) -> Result<()> {
        let db = unsafe { Box::from_raw(db.as_ptr()) };
        for (_, reg) in db.functions.borrow_mut().drain() {
            destroy(reg.destroy, reg.user_data);
        }
        for (_, reg) in db.collations.borrow_mut().drain() {
            destroy(reg.destroy, reg.context);
        }
        for (_, reg) in db.modules.borrow_mut().drain() {
            destroy(reg.destroy, reg.user_data);
        }
        Ok(())
    }

    unsafe fn prepare_v2(&self, _db: NonNull<MockDb>, _sql: &str) -> Result<NonNull<MockStmt>> {
        self.prepare_v2_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.new_stmt())
    }

    unsafe fn prepare_v3(
        &self,
        _db: NonNull<MockDb>,
        _sql: &str,
        _flags: u32,
    ) -> Result<NonNull<MockStmt>> {
        self.prepare_v3_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.new_stmt())
    }

    unsafe fn step(&self, stmt: NonNull<MockStmt>) -> Result<StepResult> {
        let stmt = unsafe { &mut *stmt.as_ptr() };
        if let Some(code) = stmt.script.pop_front() {
            if code != 0 {
                stmt.current_row = None;
                return Err(Error::from_code(code, Some("database table is locked".into()), None));
            }
        }
        if stmt.row_index < stmt.rows.len() {
            stmt.current_row = Some(stmt.row_index);
            stmt.row_index += 1;
            return Ok(StepResult::Row);
        }
        stmt.current_row = None;
        Ok(StepResult::Done)
    }

    unsafe fn reset(&self, stmt: NonNull<MockStmt>) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        let stmt = unsafe { &mut *stmt.as_ptr() };
        stmt.row_index = 0;
        stmt.current_row = None;
        Ok(())
    }

    unsafe fn finalize(&self, stmt: NonNull<MockStmt>) -> Result<()> {
        let mut stmt = unsafe { Box::from_raw(stmt.as_ptr()) };
        for pointer in stmt.pointers.drain(..) {
            release_pointer(Some(pointer));
        }
        Ok(())
    }

    unsafe fn bind_null(&self, stmt: NonNull<MockStmt>, idx: i32) -> Result<()> {
        unsafe { (*stmt.as_ptr()).binds.push((idx, MockValue::Null)) };
        Ok(())
    }

    unsafe fn bind_int64(&self, stmt: NonNull<MockStmt>, idx: i32, v: i64) -> Result<()> {
        unsafe { (*stmt.as_ptr()).binds.push((idx, MockValue::Integer(v))) };
        Ok(())
    }

    unsafe fn bind_double(&self, stmt: NonNull<MockStmt>, idx: i32, v: f64) -> Result<()> {
        unsafe { (*stmt.as_ptr()).binds.push((idx, MockValue::Float(v))) };
        Ok(())
    }

    unsafe fn bind_text(&self, stmt: NonNull<MockStmt>, idx: i32, v: &str) -> Result<()> {
        unsafe { (*stmt.as_ptr()).binds.push((idx, MockValue::Text(v.to_owned()))) };
        Ok(())
    }

    unsafe fn bind_blob(&self, stmt: NonNull<MockStmt>, idx: i32, v: &[u8]) -> Result<()> {
        unsafe { (*stmt.as_ptr()).binds.push((idx, MockValue::Blob(v.to_vec()))) };
        Ok(())
    }

    unsafe fn bind_pointer(
        &self,
        stmt: NonNull<MockStmt>,
        idx: i32,
        ptr: *mut c_void,
        type_tag: &'static CStr,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        if !self.features.contains(FeatureSet::POINTERS) {
            destroy(destroy_fn, ptr);
            return Err(Error::feature_unavailable("bind_pointer unsupported"));
        }
        let stmt = unsafe { &mut *stmt.as_ptr() };
        let tag = type_tag.to_string_lossy().into_owned();
        stmt.binds.push((idx, MockValue::Pointer(ptr as usize, tag)));
        if let Some(destroy_fn) = destroy_fn {
            stmt.pointers.push((destroy_fn, ptr as usize));
        }
        Ok(())
    }

    unsafe fn clear_bindings(&self, stmt: NonNull<MockStmt>) -> Result<()> {
        let stmt = unsafe { &mut *stmt.as_ptr() };
        stmt.binds.clear();
        for pointer in stmt.pointers.drain(..) {
            release_pointer(Some(pointer));
        }
        Ok(())
    }

    unsafe fn bind_parameter_count(&self, stmt: NonNull<MockStmt>) -> i32 {
        unsafe { stmt.as_ref() }.params.len() as i32
    }

    unsafe fn bind_parameter_name(&self, stmt: NonNull<MockStmt>, idx: i32) -> *const c_char {
        let stmt = unsafe { &*stmt.as_ptr() };
        usize::try_from(idx - 1)
            .ok()
            .and_then(|i| stmt.params.get(i))
            .filter(|name| !name.as_bytes().is_empty())
            .map_or(ptr::null(), |name| name.as_ptr())
    }

    unsafe fn bind_parameter_index(&self, stmt: NonNull<MockStmt>, name: &str) -> i32 {
        let stmt = unsafe { &*stmt.as_ptr() };
        stmt.params
            .iter()
            .position(|p| p.as_bytes() == name.as_bytes())
            .map_or(0, |i| i as i32 + 1)
    }

    unsafe fn column_count(&self, stmt: NonNull<MockStmt>) -> i32 {
        let stmt = unsafe { &*stmt.as_ptr() };
        stmt.rows
            .first()
            .map_or(stmt.columns.len(), |row| row.len()) as i32
    }

    unsafe fn column_type(&self, stmt: NonNull<MockStmt>, col: i32) -> ValueType {
        let stmt = unsafe { &*stmt.as_ptr() };
        stmt.current_value(col).map_or(ValueType::Null, MockValue::value_type)
    }

    unsafe fn column_int64(&self, stmt: NonNull<MockStmt>, col: i32) -> i64 {
        match unsafe { (*stmt.as_ptr()).current_value(col) } {
            Some(MockValue::Integer(v)) => *v,
            _ => 0,
        }
    }

    unsafe fn column_double(&self, stmt: NonNull<MockStmt>, col: i32) -> f64 {
        match unsafe { (*stmt.as_ptr()).current_value(col) } {
            Some(MockValue::Float(v)) => *v,
            _ => 0.0,
        }
    }

    unsafe fn column_text(&self, stmt: NonNull<MockStmt>, col: i32) -> RawBytes {
        match unsafe { (*stmt.as_ptr()).current_value(col) } {
            Some(MockValue::Text(v)) => raw(v.as_bytes()),
            _ => RawBytes::empty(),
        }
    }

    unsafe fn column_blob(&self, stmt: NonNull<MockStmt>, col: i32) -> RawBytes {
        match unsafe { (*stmt.as_ptr()).current_value(col) } {
            Some(MockValue::Blob(v)) => raw(v),
            _ => RawBytes::empty(),
        }
    }

    unsafe fn column_name(&self, stmt: NonNull<MockStmt>, col: i32) -> *const c_char {
        let stmt = unsafe { &*stmt.as_ptr() };
        usize::try_from(col)
            .ok()
            .and_then(|i| stmt.columns.get(i))
            .map_or(ptr::null(), |name| name.as_ptr())
    }

    unsafe fn errcode(&self, _db: NonNull<MockDb>) -> i32 {
        0
    }

    unsafe fn errmsg(&self, _db: NonNull<MockDb>) -> *const c_char {
        ptr::null()
    }

    unsafe fn extended_errcode(&self, _db: NonNull<MockDb>) -> Option<i32> {
        None
    }

    unsafe fn last_insert_rowid(&self, db: NonNull<MockDb>) -> i64 {
        unsafe { db.as_ref() }.last_rowid.get()
    }

    unsafe fn changes(&self, db: NonNull<MockDb>) -> i32 {
        unsafe { db.as_ref() }.changes.get()
    }

    unsafe fn create_function_v2(
        &self,
        db: NonNull<MockDb>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_func: Option<XFunc<Self>>,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        user_data: *mut c_void,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        self.refuse(user_data, destroy_fn)?;
        let reg = FunctionRegistration {
            n_args,
            flags,
            x_func,
            x_step,
            x_final,
            x_value: None,
            x_inverse: None,
            user_data,
            destroy: destroy_fn,
        };
        let previous = unsafe { db.as_ref() }
            .functions
            .borrow_mut()
            .insert(name.to_owned(), reg);
        if let Some(previous) = previous {
            destroy(previous.destroy, previous.user_data);
        }
        Ok(())
    }

    unsafe fn create_window_function(
        &self,
        db: NonNull<MockDb>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        x_value: Option<XFinal<Self>>,
        x_inverse: Option<XFunc<Self>>,
        user_data: *mut c_void,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        self.refuse(user_data, destroy_fn)?;
        let reg = FunctionRegistration {
            n_args,
            flags,
            x_func: None,
            x_step,
            x_final,
            x_value,
            x_inverse,
            user_data,
            destroy: destroy_fn,
        };
        let previous = unsafe { db.as_ref() }
            .functions
            .borrow_mut()
            .insert(name.to_owned(), reg);
        if let Some(previous) = previous {
            destroy(previous.destroy, previous.user_data);
        }
        Ok(())
    }

    unsafe fn create_collation_v2(
        &self,
        db: NonNull<MockDb>,
        name: &str,
        context: *mut c_void,
        cmp: Option<XCompare>,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        self.refuse(context, destroy_fn)?;
        let reg = CollationRegistration {
            cmp,
            context,
            destroy: destroy_fn,
        };
        let previous = unsafe { db.as_ref() }
            .collations
            .borrow_mut()
            .insert(name.to_owned(), reg);
        if let Some(previous) = previous {
            destroy(previous.destroy, previous.context);
        }
        Ok(())
    }

    unsafe fn aggregate_context(&self, ctx: NonNull<MockContext>, bytes: usize) -> *mut c_void {
        let ctx = unsafe { &mut *ctx.as_ptr() };
        if bytes > 0 && ctx.agg.is_none() {
            ctx.agg = Some(Box::new(0));
        }
        ctx.agg
            .as_mut()
            .map_or(ptr::null_mut(), |cell| ptr::from_mut(&mut **cell).cast())
    }

    unsafe fn user_data(ctx: NonNull<MockContext>) -> *mut c_void {
        unsafe { ctx.as_ref() }.user_data
    }

    unsafe fn result_null(&self, ctx: NonNull<MockContext>) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Null) };
    }

    unsafe fn result_int64(&self, ctx: NonNull<MockContext>, v: i64) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Integer(v)) };
    }

    unsafe fn result_double(&self, ctx: NonNull<MockContext>, v: f64) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Float(v)) };
    }

    unsafe fn result_text(&self, ctx: NonNull<MockContext>, v: &str) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Text(v.to_owned())) };
    }

    unsafe fn result_blob(&self, ctx: NonNull<MockContext>, v: &[u8]) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Blob(v.to_vec())) };
    }

    unsafe fn result_value(&self, ctx: NonNull<MockContext>, v: NonNull<MockValue>) {
        let result = match unsafe { v.as_ref() } {
            // Copies of pointer values lose the pointer.
            MockValue::Null | MockValue::Pointer(..) => MockResult::Null,
            MockValue::Integer(v) => MockResult::Integer(*v),
            MockValue::Float(v) => MockResult::Float(*v),
            MockValue::Text(v) => MockResult::Text(v.clone()),
            MockValue::Blob(v) => MockResult::Blob(v.clone()),
        };
        unsafe { (*ctx.as_ptr()).result = Some(result) };
    }

    unsafe fn result_subtype(&self, ctx: NonNull<MockContext>, subtype: u32) {
        unsafe { (*ctx.as_ptr()).subtype = Some(subtype) };
    }

    unsafe fn result_pointer(
        &self,
        ctx: NonNull<MockContext>,
        ptr: *mut c_void,
        type_tag: &'static CStr,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        if !self.features.contains(FeatureSet::POINTERS) {
            destroy(destroy_fn, ptr);
            return Err(Error::feature_unavailable("result_pointer unsupported"));
        }
        let ctx = unsafe { &mut *ctx.as_ptr() };
        let tag = type_tag.to_string_lossy().into_owned();
        ctx.result = Some(MockResult::Pointer(ptr as usize, tag));
        release_pointer(ctx.pointer.take());
        ctx.pointer = destroy_fn.map(|destroy_fn| (destroy_fn, ptr as usize));
        Ok(())
    }

    unsafe fn result_error(&self, ctx: NonNull<MockContext>, msg: &str) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::Error(msg.to_owned())) };
    }

    unsafe fn result_error_code(&self, ctx: NonNull<MockContext>, code: i32) {
        let ctx = unsafe { &mut *ctx.as_ptr() };
        ctx.error_code = Some(code);
        if !matches!(ctx.result, Some(MockResult::Error(_))) {
            ctx.result = Some(MockResult::Error(format!("error code {code}")));
        }
    }

    unsafe fn result_error_nomem(&self, ctx: NonNull<MockContext>) {
        unsafe { (*ctx.as_ptr()).result = Some(MockResult::ErrorNoMem) };
    }

    unsafe fn value_type(&self, v: NonNull<MockValue>) -> ValueType {
        unsafe { v.as_ref() }.value_type()
    }

    unsafe fn value_int64(&self, v: NonNull<MockValue>) -> i64 {
        match unsafe { v.as_ref() } {
            MockValue::Integer(v) => *v,
            MockValue::Float(v) => *v as i64,
            MockValue::Text(v) => v.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    unsafe fn value_double(&self, v: NonNull<MockValue>) -> f64 {
        match unsafe { v.as_ref() } {
            MockValue::Integer(v) => *v as f64,
            MockValue::Float(v) => *v,
            MockValue::Text(v) => v.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    unsafe fn value_text(&self, v: NonNull<MockValue>) -> RawBytes {
        match unsafe { v.as_ref() } {
            MockValue::Text(v) => raw(v.as_bytes()),
            MockValue::Blob(v) => raw(v),
            _ => RawBytes::empty(),
        }
    }

    unsafe fn value_blob(&self, v: NonNull<MockValue>) -> RawBytes {
        match unsafe { v.as_ref() } {
            MockValue::Text(v) => raw(v.as_bytes()),
            MockValue::Blob(v) => raw(v),
            _ => RawBytes::empty(),
        }
    }

    unsafe fn value_subtype(&self, _v: NonNull<MockValue>) -> u32 {
        0
    }

    unsafe fn value_nochange(&self, _v: NonNull<MockValue>) -> bool {
        false
    }

    unsafe fn value_pointer(&self, v: NonNull<MockValue>, type_tag: &'static CStr) -> *mut c_void {
        match unsafe { v.as_ref() } {
            MockValue::Pointer(addr, tag) if tag.as_bytes() == type_tag.to_bytes() => {
                *addr as *mut c_void
            }
            _ => ptr::null_mut(),
        }
    }

    unsafe fn declare_vtab(&self, db: NonNull<MockDb>, schema: &str) -> Result<()> {
        if !schema.trim_start().to_ascii_uppercase().starts_with("CREATE TABLE") {
            return Err(Error::with_message(ErrorCode::Error, "malformed schema"));
        }
        unsafe { db.as_ref() }.schemas.borrow_mut().push(schema.to_owned());
        Ok(())
    }

    unsafe fn create_module_v2(
        &self,
        db: NonNull<MockDb>,
        name: &str,
        module: *const sqlite3_module<Self>,
        user_data: *mut c_void,
        destroy_fn: Option<XDestroy>,
    ) -> Result<()> {
        self.refuse(user_data, destroy_fn)?;
        let reg = ModuleRegistration {
            module,
            user_data,
            destroy: destroy_fn,
        };
        let previous = unsafe { db.as_ref() }
            .modules
            .borrow_mut()
            .insert(name.to_owned(), reg);
        if let Some(previous) = previous {
            destroy(previous.destroy, previous.user_data);
        }
        Ok(())
    }

    unsafe fn get_autocommit(&self, _db: NonNull<MockDb>) -> bool {
        true
    }

    unsafe fn limit(&self, db: NonNull<MockDb>, id: i32, new_value: i32) -> i32 {
        let mut limits = unsafe { db.as_ref() }.limits.borrow_mut();
        let previous = limits.get(&id).copied().unwrap_or(1000);
        if new_value >= 0 {
            limits.insert(id, new_value);
        }
        previous
    }

    unsafe fn unlock_notify(
        &self,
        _db: NonNull<MockDb>,
        callback: Option<XUnlockNotify>,
        arg: *mut c_void,
    ) -> Result<()> {
        let Some(callback) = callback else {
            self.unlock_cancels.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        self.unlock_arms.fetch_add(1, Ordering::SeqCst);
        match *self.unlock_mode.lock().unwrap() {
            UnlockMode::Immediate => {
                let mut args = [arg];
                callback(args.as_mut_ptr(), 1);
            }
            UnlockMode::Deferred => {
                let arg = arg as usize;
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    let mut args = [arg as *mut c_void];
                    callback(args.as_mut_ptr(), 1);
                });
            }
            UnlockMode::Deadlock => {
                return Err(Error::with_message(ErrorCode::Locked, "deadlock detected"));
            }
        }
        Ok(())
    }
}

unsafe impl Sqlite3Hooks for MockApi {
    unsafe fn commit_hook(
        &self,
        db: NonNull<MockDb>,
        callback: CommitCallback,
        context: *mut c_void,
    ) -> *mut c_void {
        unsafe { db.as_ref() }.commit.replace((callback, context)).1
    }

    unsafe fn rollback_hook(
        &self,
        db: NonNull<MockDb>,
        callback: RollbackCallback,
        context: *mut c_void,
    ) -> *mut c_void {
        unsafe { db.as_ref() }.rollback.replace((callback, context)).1
    }
}

pub fn open(api: &'static MockApi) -> (Arc<Bridge<MockApi>>, Connection<MockApi>) {
    let bridge = Bridge::new(api);
    let conn = open_with(&bridge);
    (bridge, conn)
}

pub fn open_with(bridge: &Arc<Bridge<MockApi>>) -> Connection<MockApi> {
    let options = OpenOptions {
        flags: OpenFlags::READ_WRITE | OpenFlags::CREATE,
        vfs: None,
    };
    Connection::open(bridge, ":memory:", options).unwrap()
}

pub fn db(conn: &Connection<MockApi>) -> &MockDb {
    unsafe { &*conn.raw_handle().as_ptr() }
}

/// Native argument vector over `values`.
pub fn argv(values: &mut [MockValue]) -> Vec<*mut MockValue> {
    values.iter_mut().map(ptr::from_mut).collect()
}

pub fn call_scalar(reg: &FunctionRegistration, mut values: Vec<MockValue>) -> MockContext {
    let mut ctx = MockContext::new(reg.user_data);
    let mut cells = argv(&mut values);
    (reg.x_func.expect("x_func"))(&mut ctx, cells.len() as i32, cells.as_mut_ptr());
    ctx
}

pub fn call_step(reg: &FunctionRegistration, ctx: &mut MockContext, mut values: Vec<MockValue>) {
    let mut cells = argv(&mut values);
    (reg.x_step.expect("x_step"))(ctx, cells.len() as i32, cells.as_mut_ptr());
}

pub fn call_inverse(reg: &FunctionRegistration, ctx: &mut MockContext, mut values: Vec<MockValue>) {
    let mut cells = argv(&mut values);
    (reg.x_inverse.expect("x_inverse"))(ctx, cells.len() as i32, cells.as_mut_ptr());
}

pub fn call_value(reg: &FunctionRegistration, ctx: &mut MockContext) -> Option<MockResult> {
    (reg.x_value.expect("x_value"))(ctx);
    ctx.take()
}

pub fn call_final(reg: &FunctionRegistration, ctx: &mut MockContext) -> Option<MockResult> {
    (reg.x_final.expect("x_final"))(ctx);
    ctx.take()
}
