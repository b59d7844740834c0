use super::*;
use sqlite_bridge::{OpenOptions, Sqlite3Api, StepResult, ValueType, XFinal, XFunc, sqlite3_module};

#[allow(unsafe_op_in_unsafe_fn)]
unsafe impl Sqlite3Api for LibSqlite3 {
    type Db = sqlite3;
    type Stmt = sqlite3_stmt;
    type Value = sqlite3_value;
    type Context = sqlite3_context;

    fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    fn feature_set(&self) -> FeatureSet {
        self.features
    }

    fn backend_name(&self) -> &'static str {
        "libsqlite3"
    }

    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        if size > i32::MAX as usize {
            return null_mut();
        }
        (self.fns.malloc)(size as c_int)
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        (self.fns.free)(ptr);
    }

    unsafe fn open(&self, filename: &str, options: OpenOptions<'_>) -> Result<NonNull<Self::Db>> {
        let filename = CString::new(filename).map_err(|_| sqlite_bridge::nul_in_name("filename"))?;
        let vfs = options
            .vfs
            .map(CString::new)
            .transpose()
            .map_err(|_| sqlite_bridge::nul_in_name("vfs name"))?;
        let mut db = null_mut();
        let flags = map_open_flags(options.flags);
        let vfs_ptr = vfs.as_ref().map_or(std::ptr::null(), |s| s.as_ptr());
        let rc = (self.fns.open_v2)(filename.as_ptr(), &mut db, flags, vfs_ptr);
        if rc != SQLITE_OK {
            let err = self.error_from_rc(rc, NonNull::new(db));
            if !db.is_null() {
                let _ = (self.fns.close)(db);
            }
            return Err(err);
        }
        NonNull::new(db).ok_or_else(|| Error::new(ErrorCode::NoMem))
    }

    unsafe fn close(&self, db: NonNull<Self::Db>) -> Result<()> {
        let rc = (self.fns.close)(db.as_ptr());
        self.check(rc, Some(db))
    }

    unsafe fn prepare_v2(&self, db: NonNull<Self::Db>, sql: &str) -> Result<NonNull<Self::Stmt>> {
        let mut stmt = null_mut();
        let rc = (self.fns.prepare_v2)(
            db.as_ptr(),
            sql.as_ptr().cast::<c_char>(),
            clamp_len(sql.len()),
            &mut stmt,
            null_mut(),
        );
        self.check(rc, Some(db))?;
        // Empty or comment-only input compiles to no statement.
        NonNull::new(stmt).ok_or_else(|| Error::misuse("sql contains no statement"))
    }

    unsafe fn prepare_v3(
        &self,
        db: NonNull<Self::Db>,
        sql: &str,
        flags: u32,
    ) -> Result<NonNull<Self::Stmt>> {
        let Some(prepare) = self.fns.prepare_v3 else {
            return Err(Error::feature_unavailable("prepare_v3 not available"));
        };
        let mut stmt = null_mut();
        let rc = prepare(
            db.as_ptr(),
            sql.as_ptr().cast::<c_char>(),
            clamp_len(sql.len()),
            flags,
            &mut stmt,
            null_mut(),
        );
        self.check(rc, Some(db))?;
        NonNull::new(stmt).ok_or_else(|| Error::misuse("sql contains no statement"))
    }

    unsafe fn step(&self, stmt: NonNull<Self::Stmt>) -> Result<StepResult> {
        match (self.fns.step)(stmt.as_ptr()) {
            SQLITE_ROW => Ok(StepResult::Row),
            SQLITE_DONE => Ok(StepResult::Done),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn reset(&self, stmt: NonNull<Self::Stmt>) -> Result<()> {
        match (self.fns.reset)(stmt.as_ptr()) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn finalize(&self, stmt: NonNull<Self::Stmt>) -> Result<()> {
        // The handle is gone after finalize; no connection lookup.
        let rc = (self.fns.finalize)(stmt.as_ptr());
        self.check(rc, None)
    }

    unsafe fn bind_null(&self, stmt: NonNull<Self::Stmt>, idx: i32) -> Result<()> {
        match (self.fns.bind_null)(stmt.as_ptr(), idx) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_int64(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: i64) -> Result<()> {
        match (self.fns.bind_int64)(stmt.as_ptr(), idx, v) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_double(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: f64) -> Result<()> {
        match (self.fns.bind_double)(stmt.as_ptr(), idx, v) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_text(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: &str) -> Result<()> {
        let (ptr, dtor) = self.alloc_copy(v.as_bytes())?;
        let rc = (self.fns.bind_text)(
            stmt.as_ptr(),
            idx,
            ptr.cast::<c_char>(),
            clamp_len(v.len()),
            dtor,
        );
        match rc {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_blob(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: &[u8]) -> Result<()> {
        let (ptr, dtor) = self.alloc_copy(v)?;
        match (self.fns.bind_blob)(stmt.as_ptr(), idx, ptr, clamp_len(v.len()), dtor) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_pointer(
        &self,
        stmt: NonNull<Self::Stmt>,
        idx: i32,
        ptr: *mut c_void,
        type_tag: &'static CStr,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let Some(bind) = self.fns.bind_pointer else {
            drop_registration_user_data(ptr, destroy);
            return Err(Error::feature_unavailable("bind_pointer unsupported"));
        };
        // The engine runs `destroy` itself when binding fails.
        match bind(stmt.as_ptr(), idx, ptr, type_tag.as_ptr(), destroy) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn clear_bindings(&self, stmt: NonNull<Self::Stmt>) -> Result<()> {
        match (self.fns.clear_bindings)(stmt.as_ptr()) {
            SQLITE_OK => Ok(()),
            rc => Err(self.stmt_error(rc, stmt)),
        }
    }

    unsafe fn bind_parameter_count(&self, stmt: NonNull<Self::Stmt>) -> i32 {
        (self.fns.bind_parameter_count)(stmt.as_ptr())
    }

    unsafe fn bind_parameter_name(&self, stmt: NonNull<Self::Stmt>, idx: i32) -> *const c_char {
        (self.fns.bind_parameter_name)(stmt.as_ptr(), idx)
    }

    unsafe fn bind_parameter_index(&self, stmt: NonNull<Self::Stmt>, name: &str) -> i32 {
        match CString::new(name) {
            Ok(name) => (self.fns.bind_parameter_index)(stmt.as_ptr(), name.as_ptr()),
            Err(_) => 0,
        }
    }

    unsafe fn column_count(&self, stmt: NonNull<Self::Stmt>) -> i32 {
        (self.fns.column_count)(stmt.as_ptr())
    }

    unsafe fn column_type(&self, stmt: NonNull<Self::Stmt>, col: i32) -> ValueType {
        ValueType::from_code((self.fns.column_type)(stmt.as_ptr(), col))
    }

    unsafe fn column_int64(&self, stmt: NonNull<Self::Stmt>, col: i32) -> i64 {
        (self.fns.column_int64)(stmt.as_ptr(), col)
    }

    unsafe fn column_double(&self, stmt: NonNull<Self::Stmt>, col: i32) -> f64 {
        (self.fns.column_double)(stmt.as_ptr(), col)
    }

    unsafe fn column_text(&self, stmt: NonNull<Self::Stmt>, col: i32) -> RawBytes {
        // Text pointer first: the conversion may change the byte count.
        let ptr = (self.fns.column_text)(stmt.as_ptr(), col);
        raw_bytes(ptr, (self.fns.column_bytes)(stmt.as_ptr(), col))
    }

    unsafe fn column_blob(&self, stmt: NonNull<Self::Stmt>, col: i32) -> RawBytes {
        let ptr = (self.fns.column_blob)(stmt.as_ptr(), col).cast::<u8>();
        raw_bytes(ptr, (self.fns.column_bytes)(stmt.as_ptr(), col))
    }

    unsafe fn column_name(&self, stmt: NonNull<Self::Stmt>, col: i32) -> *const c_char {
        (self.fns.column_name)(stmt.as_ptr(), col)
    }

    unsafe fn errcode(&self, db: NonNull<Self::Db>) -> i32 {
        (self.fns.errcode)(db.as_ptr())
    }

    unsafe fn errmsg(&self, db: NonNull<Self::Db>) -> *const c_char {
        (self.fns.errmsg)(db.as_ptr())
    }

    unsafe fn extended_errcode(&self, db: NonNull<Self::Db>) -> Option<i32> {
        self.fns.extended_errcode.map(|f| f(db.as_ptr()))
    }

    unsafe fn last_insert_rowid(&self, db: NonNull<Self::Db>) -> i64 {
        (self.fns.last_insert_rowid)(db.as_ptr())
    }

    unsafe fn changes(&self, db: NonNull<Self::Db>) -> i32 {
        (self.fns.changes)(db.as_ptr())
    }

    unsafe fn create_function_v2(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_func: Option<XFunc<Self>>,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let name = registration_name_or_drop(name, user_data, destroy, "function name")?;
        // The engine runs `destroy` itself when registration fails.
        let rc = (self.fns.create_function_v2)(
            db.as_ptr(),
            name.as_ptr(),
            n_args,
            map_function_flags(flags),
            user_data,
            x_func,
            x_step,
            x_final,
            destroy,
        );
        self.check(rc, Some(db))
    }

    unsafe fn create_window_function(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        x_value: Option<XFinal<Self>>,
        x_inverse: Option<XFunc<Self>>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let Some(create) = self.fns.create_window_function else {
            drop_registration_user_data(user_data, destroy);
            return Err(Error::feature_unavailable(
                "create_window_function not available",
            ));
        };
        let name = registration_name_or_drop(name, user_data, destroy, "function name")?;
        let rc = create(
            db.as_ptr(),
            name.as_ptr(),
            n_args,
            map_function_flags(flags),
            user_data,
            x_step,
            x_final,
            x_value,
            x_inverse,
            destroy,
        );
        self.check(rc, Some(db))
    }

    unsafe fn create_collation_v2(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        context: *mut c_void,
        cmp: Option<XCompare>,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let Some(create) = self.fns.create_collation_v2 else {
            drop_registration_user_data(context, destroy);
            return Err(Error::feature_unavailable(
                "create_collation_v2 not available",
            ));
        };
        let name = registration_name_or_drop(name, context, destroy, "collation name")?;
        let rc = create(db.as_ptr(), name.as_ptr(), SQLITE_UTF8, context, cmp, destroy);
        if rc != SQLITE_OK {
            // Unlike the function registrations, a failed collation keeps `context`.
            drop_registration_user_data(context, destroy);
            return Err(self.error_from_rc(rc, Some(db)));
        }
        Ok(())
    }

    unsafe fn aggregate_context(&self, ctx: NonNull<Self::Context>, bytes: usize) -> *mut c_void {
        (self.fns.aggregate_context)(ctx.as_ptr(), clamp_len(bytes))
    }

    unsafe fn user_data(ctx: NonNull<Self::Context>) -> *mut c_void {
        match USER_DATA_FN.get().copied() {
            Some(user_data) => user_data(ctx.as_ptr()),
            None => null_mut(),
        }
    }

    unsafe fn result_null(&self, ctx: NonNull<Self::Context>) {
        (self.fns.result_null)(ctx.as_ptr());
    }

    unsafe fn result_int64(&self, ctx: NonNull<Self::Context>, v: i64) {
        (self.fns.result_int64)(ctx.as_ptr(), v);
    }

    unsafe fn result_double(&self, ctx: NonNull<Self::Context>, v: f64) {
        (self.fns.result_double)(ctx.as_ptr(), v);
    }

    unsafe fn result_text(&self, ctx: NonNull<Self::Context>, v: &str) {
        match self.alloc_copy(v.as_bytes()) {
            Ok((ptr, dtor)) => {
                (self.fns.result_text)(ctx.as_ptr(), ptr.cast::<c_char>(), clamp_len(v.len()), dtor);
            }
            Err(_) => (self.fns.result_error_nomem)(ctx.as_ptr()),
        }
    }

    unsafe fn result_blob(&self, ctx: NonNull<Self::Context>, v: &[u8]) {
        match self.alloc_copy(v) {
            Ok((ptr, dtor)) => (self.fns.result_blob)(ctx.as_ptr(), ptr, clamp_len(v.len()), dtor),
            Err(_) => (self.fns.result_error_nomem)(ctx.as_ptr()),
        }
    }

    unsafe fn result_zeroblob(&self, ctx: NonNull<Self::Context>, len: usize) {
        (self.fns.result_zeroblob)(ctx.as_ptr(), clamp_len(len));
    }

    unsafe fn result_value(&self, ctx: NonNull<Self::Context>, v: NonNull<Self::Value>) {
        (self.fns.result_value)(ctx.as_ptr(), v.as_ptr());
    }

    unsafe fn result_subtype(&self, ctx: NonNull<Self::Context>, subtype: u32) {
        if let Some(f) = self.fns.result_subtype {
            f(ctx.as_ptr(), subtype);
        }
    }

    unsafe fn result_pointer(
        &self,
        ctx: NonNull<Self::Context>,
        ptr: *mut c_void,
        type_tag: &'static CStr,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let Some(result) = self.fns.result_pointer else {
            drop_registration_user_data(ptr, destroy);
            return Err(Error::feature_unavailable("result_pointer unsupported"));
        };
        result(ctx.as_ptr(), ptr, type_tag.as_ptr(), destroy);
        Ok(())
    }

    unsafe fn result_error(&self, ctx: NonNull<Self::Context>, msg: &str) {
        // result_error copies the message, so no NUL terminator is needed.
        (self.fns.result_error)(ctx.as_ptr(), msg.as_ptr().cast::<c_char>(), clamp_len(msg.len()));
    }

    unsafe fn result_error_code(&self, ctx: NonNull<Self::Context>, code: i32) {
        (self.fns.result_error_code)(ctx.as_ptr(), code);
    }

    unsafe fn result_error_nomem(&self, ctx: NonNull<Self::Context>) {
        (self.fns.result_error_nomem)(ctx.as_ptr());
    }

    unsafe fn value_type(&self, v: NonNull<Self::Value>) -> ValueType {
        ValueType::from_code((self.fns.value_type)(v.as_ptr()))
    }

    unsafe fn value_int64(&self, v: NonNull<Self::Value>) -> i64 {
        (self.fns.value_int64)(v.as_ptr())
    }

    unsafe fn value_double(&self, v: NonNull<Self::Value>) -> f64 {
        (self.fns.value_double)(v.as_ptr())
    }

    unsafe fn value_text(&self, v: NonNull<Self::Value>) -> RawBytes {
        let ptr = (self.fns.value_text)(v.as_ptr());
        raw_bytes(ptr, (self.fns.value_bytes)(v.as_ptr()))
    }

    unsafe fn value_blob(&self, v: NonNull<Self::Value>) -> RawBytes {
        let ptr = (self.fns.value_blob)(v.as_ptr()).cast::<u8>();
        raw_bytes(ptr, (self.fns.value_bytes)(v.as_ptr()))
    }

    unsafe fn value_bytes(&self, v: NonNull<Self::Value>) -> usize {
        usize::try_from((self.fns.value_bytes)(v.as_ptr())).unwrap_or(0)
    }

    unsafe fn value_subtype(&self, v: NonNull<Self::Value>) -> u32 {
        self.fns.value_subtype.map_or(0, |f| f(v.as_ptr()))
    }

    unsafe fn value_nochange(&self, v: NonNull<Self::Value>) -> bool {
        self.fns.value_nochange.is_some_and(|f| f(v.as_ptr()) != 0)
    }

    unsafe fn value_pointer(&self, v: NonNull<Self::Value>, type_tag: &'static CStr) -> *mut c_void {
        match self.fns.value_pointer {
            Some(f) => f(v.as_ptr(), type_tag.as_ptr()),
            None => null_mut(),
        }
    }

    unsafe fn declare_vtab(&self, db: NonNull<Self::Db>, schema: &str) -> Result<()> {
        let schema = CString::new(schema).map_err(|_| sqlite_bridge::nul_in_name("schema"))?;
        let rc = (self.fns.declare_vtab)(db.as_ptr(), schema.as_ptr());
        self.check(rc, Some(db))
    }

    unsafe fn create_module_v2(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        module: *const sqlite3_module<Self>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        let Some(create) = self.fns.create_module_v2 else {
            drop_registration_user_data(user_data, destroy);
            return Err(Error::feature_unavailable("create_module_v2 not available"));
        };
        let name = registration_name_or_drop(name, user_data, destroy, "module name")?;
        let rc = create(db.as_ptr(), name.as_ptr(), module.cast(), user_data, destroy);
        self.check(rc, Some(db))
    }

    unsafe fn get_autocommit(&self, db: NonNull<Self::Db>) -> bool {
        (self.fns.get_autocommit)(db.as_ptr()) != 0
    }

    unsafe fn limit(&self, db: NonNull<Self::Db>, id: i32, new_value: i32) -> i32 {
        (self.fns.limit)(db.as_ptr(), id, new_value)
    }

    unsafe fn unlock_notify(
        &self,
        db: NonNull<Self::Db>,
        callback: Option<XUnlockNotify>,
        arg: *mut c_void,
    ) -> Result<()> {
        let Some(unlock_notify) = self.fns.unlock_notify else {
            return Err(Error::feature_unavailable("unlock_notify not available"));
        };
        let rc = unlock_notify(db.as_ptr(), callback, arg);
        self.check(rc, Some(db))
    }
}
