//! Host functions callable from plugin code.

use crate::kernel::PluginContext;
use crate::memory::{HostMemory, MemoryError};
use crate::value::{Signature, SlotError, Stack, ValueType};
use std::fmt;
use std::sync::Arc;

/// Import namespace for user-registered host functions
pub const USER_NAMESPACE: &str = "extism:host/user";

/// Host function implementation
pub type HostFn =
    Arc<dyn Fn(&mut CurrentPlugin<'_>, &mut Stack) -> Result<(), HostError> + Send + Sync>;

/// Errors raised by a host function
///
/// Any error aborts the guest call that invoked the function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// An argument did not hold the expected value
    #[error("Unexpected {field} value: expected {expected}, got {actual}")]
    UnexpectedValue {
        field: String,
        expected: String,
        actual: String,
    },

    /// Handle does not reference a valid string
    #[error("Invalid string at 0x{offset:X}: {reason}")]
    InvalidString { offset: u64, reason: String },

    /// Guest asked for outbound HTTP, which plugins are never granted
    #[error("HTTP request to {url} is not allowed")]
    HttpNotAllowed { url: String },

    /// Host memory failure
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Slot access failure
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// Free-form failure
    #[error("{0}")]
    Message(String),
}

impl HostError {
    /// Build an [`HostError::UnexpectedValue`]
    #[must_use]
    pub fn unexpected(
        field: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::UnexpectedValue {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Plugin state visible to a running host function
pub struct CurrentPlugin<'a> {
    context: &'a mut PluginContext,
}

impl<'a> CurrentPlugin<'a> {
    /// Wrap the context of the plugin being called
    pub fn new(context: &'a mut PluginContext) -> Self {
        Self { context }
    }

    /// Name of the plugin's main module
    #[must_use]
    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// Value of a plugin config key
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.context.config().get(key).map(String::as_str)
    }

    /// Host memory of the current call
    #[must_use]
    pub fn memory(&self) -> &HostMemory {
        self.context.memory()
    }

    /// Mutable host memory of the current call
    pub fn memory_mut(&mut self) -> &mut HostMemory {
        self.context.memory_mut()
    }

    /// Read the block behind a handle
    ///
    /// # Errors
    ///
    /// Returns error if no block starts at `handle`
    pub fn read_bytes(&self, handle: u64) -> Result<Vec<u8>, HostError> {
        Ok(self.context.memory().bytes(handle)?.to_vec())
    }

    /// Read the block behind a handle as UTF-8
    ///
    /// # Errors
    ///
    /// Returns error if the handle is invalid or the block is not UTF-8
    pub fn read_string(&self, handle: u64) -> Result<String, HostError> {
        let bytes = self
            .context
            .memory()
            .bytes(handle)
            .map_err(|e| HostError::InvalidString {
                offset: handle,
                reason: e.to_string(),
            })?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| HostError::InvalidString {
                offset: handle,
                reason: e.to_string(),
            })
    }

    /// Copy bytes into a new block and return its handle
    ///
    /// # Errors
    ///
    /// Returns error if the memory limit is exceeded
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<u64, HostError> {
        Ok(self.context.memory_mut().alloc_bytes(data)?)
    }

    /// Copy a string into a new block and return its handle
    ///
    /// # Errors
    ///
    /// Returns error if the memory limit is exceeded
    pub fn write_string(&mut self, s: &str) -> Result<u64, HostError> {
        self.write_bytes(s.as_bytes())
    }

    /// Free a block
    pub fn free(&mut self, handle: u64) -> bool {
        self.context.memory_mut().free(handle)
    }
}

/// Host function definition
#[derive(Clone)]
pub struct HostFunction {
    /// Import namespace
    pub namespace: String,
    /// Function name
    pub name: String,
    /// Declared slot types
    pub signature: Signature,
    implementation: HostFn,
}

impl HostFunction {
    /// Create a host function in the user namespace
    #[must_use]
    pub fn new<F>(
        name: impl Into<String>,
        params: impl Into<Vec<ValueType>>,
        results: impl Into<Vec<ValueType>>,
        implementation: F,
    ) -> Self
    where
        F: Fn(&mut CurrentPlugin<'_>, &mut Stack) -> Result<(), HostError> + Send + Sync + 'static,
    {
        Self {
            namespace: USER_NAMESPACE.to_string(),
            name: name.into(),
            signature: Signature::new(params, results),
            implementation: Arc::new(implementation),
        }
    }

    /// Move the function into another import namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Call the host function
    ///
    /// # Errors
    ///
    /// Returns error if the stack does not follow the declared signature or
    /// the implementation fails
    pub fn call(&self, plugin: &mut CurrentPlugin<'_>, stack: &mut Stack) -> Result<(), HostError> {
        if stack.signature() != &self.signature {
            return Err(HostError::Message(format!(
                "{} expects {}, called with {}",
                self.name,
                self.signature,
                stack.signature()
            )));
        }
        (self.implementation)(plugin, stack)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Registry of host functions, keyed by namespace and name
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    functions: Vec<HostFunction>,
}

impl HostRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function, replacing one with the same import path
    pub fn register(&mut self, func: HostFunction) {
        match self
            .functions
            .iter_mut()
            .find(|f| f.namespace == func.namespace && f.name == func.name)
        {
            Some(existing) => {
                tracing::warn!(
                    namespace = %func.namespace,
                    name = %func.name,
                    "replacing host function"
                );
                *existing = func;
            }
            None => self.functions.push(func),
        }
    }

    /// Get a function in the user namespace
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.get_in(USER_NAMESPACE, name)
    }

    /// Get a function by namespace and name
    #[must_use]
    pub fn get_in(&self, namespace: &str, name: &str) -> Option<&HostFunction> {
        self.functions
            .iter()
            .find(|f| f.namespace == namespace && f.name == name)
    }

    /// Check if a user-namespace function exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// Iterate over registered functions
    pub fn iter(&self) -> impl Iterator<Item = &HostFunction> {
        self.functions.iter()
    }

    /// Number of registered functions
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FromIterator<HostFunction> for HostRegistry {
    fn from_iter<I: IntoIterator<Item = HostFunction>>(iter: I) -> Self {
        let mut registry = Self::new();
        for func in iter {
            registry.register(func);
        }
        registry
    }
}
