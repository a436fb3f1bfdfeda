//! Cache enablement control
//!
//! Whether a call may read from or write to the cache is resolved from
//! four layered signals, most-overriding first: ambient environment flags,
//! the process-global controller, the per-function controller, and the
//! innermost per-call scope. Per-call scopes replace the per-function state
//! wholesale while active and restore it on drop, so nesting works and the
//! innermost scope fully shadows the ones outside it.
//!
//! Per flag (read and write resolve independently): an explicit disable at
//! the instance-or-call level or at the global/ambient level wins over any
//! enable; otherwise an explicit enable at either level wins; otherwise the
//! flag is unset and the orchestrator treats it as not enabled.

use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::warn;

/// Environment variable force-enabling all caches ("true")
pub const ENABLED_ENV: &str = "MNEMO_ENABLED";

/// Environment variable force-disabling all caches ("true")
pub const DISABLED_ENV: &str = "MNEMO_DISABLED";

/// One scope's read/write tri-state pair; `None` means unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EnablementState {
    read: Option<bool>,
    write: Option<bool>,
}

/// Combine a more-specific signal with an outer one: explicit disable at
/// either level wins, then explicit enable, then unset
fn combine(inner: Option<bool>, outer: Option<bool>) -> Option<bool> {
    if inner == Some(false) || outer == Some(false) {
        Some(false)
    } else if inner == Some(true) || outer == Some(true) {
        Some(true)
    } else {
        None
    }
}

/// Ambient environment signal, consulted only by the global layer.
/// Both flags asserted at once is fail-safe: disabled, with a warning.
fn env_signal() -> Option<bool> {
    let flag = |name: &str| {
        std::env::var(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
    let enabled = flag(ENABLED_ENV);
    let disabled = flag(DISABLED_ENV);
    if enabled && disabled {
        warn!("{ENABLED_ENV} and {DISABLED_ENV} are both set to true; caching stays disabled");
        Some(false)
    } else if disabled {
        Some(false)
    } else if enabled {
        Some(true)
    } else {
        None
    }
}

/// Per-function cache controller
///
/// Each cacheable function owns one. Its state is only ever changed through
/// scoped guards, never raw mutation.
#[derive(Debug, Default)]
pub struct CacheController {
    state: Mutex<EnablementState>,
}

impl CacheController {
    /// Create a controller with both flags unset
    pub fn new() -> Self {
        Self::default()
    }

    fn swap(&self, next: EnablementState) -> EnablementState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    fn current(&self) -> EnablementState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install an explicit read/write pair for the duration of the
    /// returned scope; the previous state is restored when it drops
    pub fn enable(&self, read: bool, write: bool) -> EnableScope<'_> {
        let previous = self.swap(EnablementState {
            read: Some(read),
            write: Some(write),
        });
        EnableScope {
            controller: self,
            previous,
        }
    }

    /// Scope with both reads and writes explicitly disabled
    pub fn disable(&self) -> EnableScope<'_> {
        self.enable(false, false)
    }

    /// Resolve the read flag across all layers
    pub fn is_read_enabled(&self) -> Option<bool> {
        combine(self.current().read, global().read_signal())
    }

    /// Resolve the write flag across all layers
    pub fn is_write_enabled(&self) -> Option<bool> {
        combine(self.current().write, global().write_signal())
    }
}

/// Restores a controller's previous state on drop
#[derive(Debug)]
pub struct EnableScope<'a> {
    controller: &'a CacheController,
    previous: EnablementState,
}

impl Drop for EnableScope<'_> {
    fn drop(&mut self) {
        self.controller.swap(self.previous);
    }
}

/// Process-global cache controller
///
/// A singleton layered between the ambient environment and every
/// per-function controller.
#[derive(Debug, Default)]
pub struct GlobalCacheController {
    state: Mutex<EnablementState>,
}

/// The process-global controller instance
pub fn global() -> &'static GlobalCacheController {
    static GLOBAL: OnceLock<GlobalCacheController> = OnceLock::new();
    GLOBAL.get_or_init(GlobalCacheController::default)
}

impl GlobalCacheController {
    fn swap(&self, next: EnablementState) -> EnablementState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    fn current(&self) -> EnablementState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install an explicit global read/write pair for the duration of the
    /// returned scope
    pub fn enable(&'static self, read: bool, write: bool) -> GlobalEnableScope {
        let previous = self.swap(EnablementState {
            read: Some(read),
            write: Some(write),
        });
        GlobalEnableScope { previous }
    }

    /// Scope with all caches explicitly disabled
    pub fn disable(&'static self) -> GlobalEnableScope {
        self.enable(false, false)
    }

    /// Global read signal, combined with the ambient environment
    pub fn read_signal(&self) -> Option<bool> {
        combine(self.current().read, env_signal())
    }

    /// Global write signal, combined with the ambient environment
    pub fn write_signal(&self) -> Option<bool> {
        combine(self.current().write, env_signal())
    }

    /// Return the global layer to unset. Teardown hook for tests; scoped
    /// guards are the way to change global state in production code.
    pub fn reset(&self) {
        self.swap(EnablementState::default());
    }
}

/// Restores the global controller's previous state on drop
#[derive(Debug)]
#[must_use = "dropping the scope immediately restores the previous state"]
pub struct GlobalEnableScope {
    previous: EnablementState,
}

impl Drop for GlobalEnableScope {
    fn drop(&mut self) {
        global().swap(self.previous);
    }
}

/// Enable reads and/or writes for every cacheable function in the process
pub fn enable_all_caches(read: bool, write: bool) -> GlobalEnableScope {
    global().enable(read, write)
}

/// Disable caching for every cacheable function in the process
pub fn disable_all_caches() -> GlobalEnableScope {
    global().disable()
}
