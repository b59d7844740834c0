use core::ffi::{CStr, c_void};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::aggregate::AggregateStore;
use crate::connection::HookTable;
use crate::extension::ExtensionInit;
use crate::handle::{Handle, HandleRegistry};
use crate::provider::Sqlite3Api;

/// Tunables for a [`Bridge`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeOptions {
    /// Upper bound on aggregate groups alive at once across all connections.
    /// `None` means unbounded.
    pub max_live_aggregates: Option<usize>,
}

/// Shared state behind every registration made through one provider.
///
/// Built once when the extension loads and handed to each native
/// registration as part of its user data, so trampolines never consult
/// process-wide globals.
pub struct Bridge<P: Sqlite3Api> {
    api: &'static P,
    handles: HandleRegistry,
    aggregates: AggregateStore,
    pub(crate) extensions: RwLock<HashMap<String, Arc<ExtensionInit<P>>>>,
    pub(crate) hooks: HookTable,
}

impl<P: Sqlite3Api> Bridge<P> {
    pub fn new(api: &'static P) -> Arc<Self> {
        Self::with_options(api, BridgeOptions::default())
    }

    pub fn with_options(api: &'static P, options: BridgeOptions) -> Arc<Self> {
        tracing::debug!(
            backend = api.backend_name(),
            max_live_aggregates = ?options.max_live_aggregates,
            "bridge created"
        );
        Arc::new(Self {
            api,
            handles: HandleRegistry::new(),
            aggregates: AggregateStore::new(options.max_live_aggregates),
            extensions: RwLock::new(HashMap::new()),
            hooks: HookTable::default(),
        })
    }

    pub fn api(&self) -> &'static P {
        self.api
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn aggregates(&self) -> &AggregateStore {
        &self.aggregates
    }
}

impl<P: Sqlite3Api> fmt::Debug for Bridge<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("backend", &self.api.backend_name())
            .field("handles", &self.handles.len())
            .field("aggregates", &self.aggregates.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Type tag of every pointer value the bridge hands to the engine.
pub(crate) const POINTER_TYPE: &CStr = c"sqlite-bridge.handle";

/// User data attached to one native registration, or carried by a pointer
/// value.
pub(crate) struct Registration<P: Sqlite3Api> {
    pub(crate) bridge: Arc<Bridge<P>>,
    pub(crate) handle: Handle,
}

impl<P: Sqlite3Api> Registration<P> {
    /// Save `value` and wrap its handle for the engine.
    pub(crate) fn install<T: Any + Send + Sync>(bridge: &Arc<Bridge<P>>, value: T) -> *mut c_void {
        let handle = bridge.handles().save(value);
        let record = Box::new(Registration {
            bridge: Arc::clone(bridge),
            handle,
        });
        Box::into_raw(record).cast()
    }

    /// # Safety
    /// `ptr` must be null or come from [`Registration::install`] and not yet be released.
    pub(crate) unsafe fn from_user_data<'a>(ptr: *mut c_void) -> Option<&'a Registration<P>> {
        unsafe { (ptr as *const Registration<P>).as_ref() }
    }

    pub(crate) fn restore<T: Any + Send + Sync>(&self) -> Arc<T> {
        self.bridge.handles().restore(self.handle)
    }

    /// Value behind a pointer value, if it was saved as a `T`.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer value tagged [`POINTER_TYPE`].
    pub(crate) unsafe fn pointee<T: Any + Send + Sync>(ptr: *mut c_void) -> Option<Arc<T>> {
        let record = unsafe { Self::from_user_data(ptr) }?;
        record.bridge.handles().try_restore(record.handle)
    }
}

/// Destructor the engine runs when it retires a registration.
pub(crate) extern "C" fn release_registration<P: Sqlite3Api>(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let record = unsafe { Box::from_raw(ptr as *mut Registration<P>) };
    tracing::debug!(handle = ?record.handle, "registration released");
    record.bridge.handles().unref(record.handle);
}
