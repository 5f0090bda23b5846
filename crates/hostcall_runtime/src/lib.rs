//! HOSTCALL plugin runtime
//!
//! Loads WASM plugins on wasmtime, links typed host functions under the
//! `extism:host/user` namespace, and drives calls through a host-managed
//! memory kernel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compile;
pub mod host;
pub mod kernel;
pub mod manifest;
pub mod memory;
pub mod plugin;
pub mod value;

pub use compile::{CompileConfig, CompileError, WasmCompiler};
pub use host::{CurrentPlugin, HostError, HostFn, HostFunction, HostRegistry, USER_NAMESPACE};
pub use kernel::{ENV_NAMESPACE, PluginContext};
pub use manifest::{Manifest, ManifestError, Wasm, WasmSource};
pub use memory::{HostMemory, MemoryError, MemoryLimit};
pub use plugin::{CallError, Plugin, PluginConfig, PluginError};
pub use value::{Signature, SlotError, Stack, Value, ValueType};
