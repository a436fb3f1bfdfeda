//! The memoizing wrapper
//!
//! [`CacheableFunction`] composes the key builder, the enablement
//! controller, a storage backend, and a serializer around one callable.
//! Caching is strictly an optimization layer: a failure anywhere in the
//! caching path is logged and downgraded to a miss, and the wrapped
//! function's contract is otherwise unchanged. Only argument binding can
//! fail a call, because without bound arguments there is nothing to invoke.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{CacheBackend, DiskBackend};
use crate::binding::{BoundArgs, CallArgs, Signature};
use crate::controller::{CacheController, EnableScope};
use crate::error::{MnemoError, MnemoResult};
use crate::keys::{default_exclude, derive_input_id, short_digest, FunctionKey, InputKey};
use crate::metadata::EntryMetadata;
use crate::serializer::{JsonSerializer, Serializer};

type ExcludeFn = Box<dyn Fn(&str) -> bool + Send + Sync>;
type InputIdFn = Box<dyn Fn(&BoundArgs) -> MnemoResult<String> + Send + Sync>;
type FilterFn<O> = Arc<dyn Fn(&O) -> bool + Send + Sync>;

/// A function wrapped with content-addressed memoization
///
/// Holds the underlying callable, its identity, its parameter signature,
/// a storage backend, a serializer, and its enablement controller.
pub struct CacheableFunction<O, F>
where
    F: Fn(&BoundArgs) -> O,
{
    function_id: String,
    signature: Signature,
    inner: F,
    backend: Box<dyn CacheBackend>,
    serializer: Box<dyn Serializer<O>>,
    controller: CacheController,
    exclude: ExcludeFn,
    input_id_fn: Option<InputIdFn>,
    filter: Mutex<Option<FilterFn<O>>>,
}

impl<O, F> CacheableFunction<O, F>
where
    F: Fn(&BoundArgs) -> O,
    O: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap a callable with the default disk backend and JSON serializer.
    ///
    /// Use the [`function_id!`](crate::function_id) macro for a stable
    /// `<module path>:<name>` identity.
    pub fn new(function_id: impl Into<String>, signature: Signature, inner: F) -> Self {
        Self {
            function_id: function_id.into(),
            signature,
            inner,
            backend: Box::new(DiskBackend::new()),
            serializer: Box::new(JsonSerializer::new()),
            controller: CacheController::new(),
            exclude: Box::new(default_exclude),
            input_id_fn: None,
            filter: Mutex::new(None),
        }
    }
}

impl<O, F> CacheableFunction<O, F>
where
    F: Fn(&BoundArgs) -> O,
{
    /// Replace the storage backend
    pub fn with_backend(mut self, backend: impl CacheBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    /// Replace the output serializer
    pub fn with_serializer(mut self, serializer: impl Serializer<O> + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Replace the argument-name exclusion predicate
    /// (default: names starting with `_` are excluded)
    pub fn with_exclude(mut self, exclude: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.exclude = Box::new(exclude);
        self
    }

    /// Replace the input-id derivation with a custom one
    pub fn with_input_id_fn(
        mut self,
        input_id_fn: impl Fn(&BoundArgs) -> MnemoResult<String> + Send + Sync + 'static,
    ) -> Self {
        self.input_id_fn = Some(Box::new(input_id_fn));
        self
    }

    /// The function's identity string
    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// The function's enablement controller
    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    fn function_key(&self) -> FunctionKey {
        FunctionKey::new(self.function_id.clone())
    }

    fn input_id_for(&self, bound: &BoundArgs) -> MnemoResult<String> {
        match &self.input_id_fn {
            Some(custom) => custom(bound),
            None => derive_input_id(bound, self.exclude.as_ref()),
        }
    }

    /// Derive the input id for a set of call arguments
    pub fn input_id(&self, args: &CallArgs) -> MnemoResult<String> {
        let bound = self.signature.bind(args)?;
        self.input_id_for(&bound)
    }

    fn input_key(&self, input_id: impl Into<String>) -> InputKey {
        InputKey::new(self.function_id.clone(), input_id)
    }

    /// Digest of a value as this function's serializer would store it
    pub fn output_id(&self, output: &O) -> MnemoResult<String> {
        let bytes = self
            .serializer
            .serialize(output)
            .map_err(|e| MnemoError::Dump {
                reason: e.to_string(),
            })?;
        Ok(short_digest(&bytes))
    }

    /// Call the wrapped function through the cache.
    ///
    /// Resolves enablement, derives the input key, attempts a read, falls
    /// back to executing the function, and optionally persists the result.
    /// A caching failure never replaces the computed output.
    pub fn call(&self, args: &CallArgs) -> MnemoResult<O> {
        let bound = self.signature.bind(args)?;

        let read = self.controller.is_read_enabled().unwrap_or(false);
        let write = self.controller.is_write_enabled().unwrap_or(false);
        if !read && !write {
            debug!(function = %self.function_id, "executing function without cache");
            return Ok((self.inner)(&bound));
        }

        let input_key = match self.input_id_for(&bound) {
            Ok(input_id) => self.input_key(input_id),
            Err(error) => {
                warn!(function = %self.function_id, "failed to derive input key: {error}");
                debug!(function = %self.function_id, "executing function without cache");
                return Ok((self.inner)(&bound));
            }
        };

        if read {
            if self.backend.exists(&input_key) {
                match self.load(&input_key) {
                    Ok(output) if self.passes_filter(&output) => return Ok(output),
                    Ok(_) => {
                        debug!(key = %input_key, "cached output rejected by filter");
                    }
                    Err(error) => {
                        warn!(key = %input_key, "failed to load output from cache: {error}");
                    }
                }
            } else {
                debug!(key = %input_key, "output not found in cache");
            }
        }

        debug!(function = %self.function_id, "executing function");
        let output = (self.inner)(&bound);

        if write {
            if let Err(error) = self.dump(&output, &input_key) {
                warn!(key = %input_key, "failed to dump output to cache: {error}");
            }
        }

        Ok(output)
    }

    fn passes_filter(&self, output: &O) -> bool {
        let filter = self
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match filter {
            Some(filter) => filter(output),
            None => true,
        }
    }

    fn load(&self, key: &InputKey) -> MnemoResult<O> {
        if self.controller.is_read_enabled() != Some(true) {
            return Err(MnemoError::CacheNotEnabled(
                "cache reads are not enabled".to_string(),
            ));
        }
        if !self.backend.exists(key) {
            return Err(MnemoError::InputKeyNotFound(key.clone()));
        }
        info!(key = %key, "loading output from cache");
        let bytes = self.backend.read(key)?;
        self.serializer
            .deserialize(&bytes)
            .map_err(|e| MnemoError::Load {
                reason: e.to_string(),
            })
    }

    fn dump(&self, output: &O, key: &InputKey) -> MnemoResult<()> {
        if self.controller.is_write_enabled() != Some(true) {
            return Err(MnemoError::CacheNotEnabled(
                "cache writes are not enabled".to_string(),
            ));
        }
        info!(key = %key, "dumping output to cache");
        let bytes = self
            .serializer
            .serialize(output)
            .map_err(|e| MnemoError::Dump {
                reason: e.to_string(),
            })?;
        let output_id = short_digest(&bytes);
        let metadata = EntryMetadata::new(
            key.input_id.clone(),
            output_id,
            self.serializer.extension(),
        );
        self.backend.write(&bytes, &metadata, key)
    }

    /// Load a cached output by its input id.
    ///
    /// Fails with `CacheNotEnabled` when reads are not enabled and with
    /// `InputKeyNotFound` when no entry exists.
    pub fn load_output(&self, input_id: &str) -> MnemoResult<O> {
        self.load(&self.input_key(input_id))
    }

    /// Persist an output under an input id, bypassing execution.
    ///
    /// Fails with `CacheNotEnabled` when writes are not enabled.
    pub fn dump_output(&self, output: &O, input_id: &str) -> MnemoResult<()> {
        self.dump(output, &self.input_key(input_id))
    }

    /// Load the metadata of a cached entry by its input id
    pub fn load_metadata(&self, input_id: &str) -> MnemoResult<EntryMetadata> {
        self.backend.load_metadata(&self.input_key(input_id))
    }

    /// Location of a cached output file by its input id
    pub fn output_path(&self, input_id: &str) -> MnemoResult<PathBuf> {
        self.backend.output_path(&self.input_key(input_id))
    }

    /// All entries cached for this function
    pub fn list_cached(&self) -> MnemoResult<Vec<InputKey>> {
        self.backend.list(&self.function_key())
    }

    /// Remove every cached entry of this function
    pub fn clear_cache(&self) -> MnemoResult<()> {
        self.backend.clear(&self.function_key())
    }

    /// Take over the entries cached under another function id.
    ///
    /// Useful after renaming a function; assumes both ids live in this
    /// function's backend.
    pub fn adopt_cache(&self, from_function_id: &str) -> MnemoResult<()> {
        self.backend
            .adopt(&FunctionKey::new(from_function_id), &self.function_key())
    }

    /// Enable reads and/or writes for the duration of the returned scope
    pub fn enable_cache(&self, read: bool, write: bool) -> CacheScope<'_, O, F> {
        self.scope(read, write, None)
    }

    /// Enable caching with a result filter: a loaded value the filter
    /// rejects is treated as a miss and recomputed
    pub fn enable_cache_with_filter(
        &self,
        read: bool,
        write: bool,
        filter: impl Fn(&O) -> bool + Send + Sync + 'static,
    ) -> CacheScope<'_, O, F> {
        self.scope(read, write, Some(Arc::new(filter)))
    }

    /// Disable caching for the duration of the returned scope
    pub fn disable_cache(&self) -> CacheScope<'_, O, F> {
        let controller_scope = self.controller.disable();
        let previous_filter = self.swap_filter(None);
        CacheScope {
            function: self,
            previous_filter: Some(previous_filter),
            _controller_scope: controller_scope,
        }
    }

    fn scope(
        &self,
        read: bool,
        write: bool,
        filter: Option<FilterFn<O>>,
    ) -> CacheScope<'_, O, F> {
        let controller_scope = self.controller.enable(read, write);
        let previous_filter = self.swap_filter(filter);
        CacheScope {
            function: self,
            previous_filter: Some(previous_filter),
            _controller_scope: controller_scope,
        }
    }

    fn swap_filter(&self, next: Option<FilterFn<O>>) -> Option<FilterFn<O>> {
        let mut filter = self.filter.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *filter, next)
    }
}

/// Per-call enablement scope of one cacheable function.
///
/// Snapshots the function's enablement state and result filter on
/// creation and restores both on drop, on every exit path. Nestable; each
/// nested scope fully shadows the one outside it.
#[must_use = "dropping the scope immediately restores the previous state"]
pub struct CacheScope<'a, O, F>
where
    F: Fn(&BoundArgs) -> O,
{
    function: &'a CacheableFunction<O, F>,
    previous_filter: Option<Option<FilterFn<O>>>,
    _controller_scope: EnableScope<'a>,
}

impl<O, F> Drop for CacheScope<'_, O, F>
where
    F: Fn(&BoundArgs) -> O,
{
    fn drop(&mut self) {
        if let Some(previous) = self.previous_filter.take() {
            self.function.swap_filter(previous);
        }
    }
}
