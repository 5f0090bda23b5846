//! Plugin instances: linking, instantiation and calls.

use crate::compile::{CompileConfig, CompileError, WasmCompiler};
use crate::host::{CurrentPlugin, HostError, HostFunction, HostRegistry};
use crate::kernel::{self, PluginContext};
use crate::manifest::{MAIN_MODULE, Manifest, ManifestError};
use crate::memory::{MemoryError, MemoryLimit};
use crate::value::Stack;
use serde::{Deserialize, Serialize};
use wasmtime::{
    Caller, Engine, Func, Instance, Linker, Store, StoreLimits, StoreLimitsBuilder, Trap, Val,
    ValType,
};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

/// Reactor initializer run once after instantiation
const INITIALIZE_EXPORT: &str = "_initialize";

/// Plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Link the WASI preview1 shim
    pub enable_wasi: bool,
    /// Fuel granted to each call; `None` disables metering
    pub max_fuel: Option<u64>,
    /// Cap for linear memory and for host memory
    pub memory_limit: MemoryLimit,
    /// Compilation config
    pub compile_config: CompileConfig,
}

impl PluginConfig {
    /// Create a new plugin config
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable_wasi: false,
            max_fuel: None,
            memory_limit: MemoryLimit::default(),
            compile_config: CompileConfig::new(),
        }
    }

    /// Enable/disable WASI
    #[must_use]
    pub fn with_wasi(mut self, enable: bool) -> Self {
        self.enable_wasi = enable;
        self
    }

    /// Set the per-call fuel budget
    #[must_use]
    pub fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = Some(fuel);
        self.compile_config.consume_fuel = true;
        self
    }

    /// Fuel loaded into the store before each call
    ///
    /// Metering without a cap gets an effectively unlimited budget.
    #[must_use]
    pub fn call_fuel(&self) -> Option<u64> {
        match self.max_fuel {
            Some(fuel) => Some(fuel),
            None if self.compile_config.consume_fuel => Some(u64::MAX),
            None => None,
        }
    }

    /// Set memory limit
    #[must_use]
    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Set compilation config
    #[must_use]
    pub fn with_compile_config(mut self, config: CompileConfig) -> Self {
        self.compile_config = config;
        self
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Data owned by a plugin's wasmtime store
pub(crate) struct StoreData {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) context: PluginContext,
    limits: StoreLimits,
}

/// An instantiated plugin
pub struct Plugin {
    store: Store<StoreData>,
    instance: Instance,
    config: PluginConfig,
}

impl Plugin {
    /// Compile, link and instantiate a plugin
    ///
    /// # Errors
    ///
    /// Returns error if a module cannot be loaded or compiled, an import
    /// cannot be satisfied, or the reactor initializer fails
    pub fn new(
        manifest: &Manifest,
        functions: impl IntoIterator<Item = HostFunction>,
        config: PluginConfig,
    ) -> Result<Self, PluginError> {
        let registry: HostRegistry = functions.into_iter().collect();
        let mut compile_config = config.compile_config.clone();
        compile_config.consume_fuel |= config.max_fuel.is_some();
        let compiler = WasmCompiler::new(compile_config)?;
        let engine = compiler.engine().clone();

        let main = manifest.main()?;
        let name = main.name.clone().unwrap_or_else(|| MAIN_MODULE.to_string());

        let mut linker: Linker<StoreData> = Linker::new(&engine);
        if config.enable_wasi {
            preview1::add_to_linker_sync(&mut linker, |data: &mut StoreData| &mut data.wasi)
                .map_err(link_error)?;
        }
        kernel::link(&mut linker).map_err(link_error)?;
        for func in registry.iter() {
            link_host_function(&mut linker, &engine, func)?;
        }

        let data = StoreData {
            wasi: WasiCtxBuilder::new().inherit_stdio().build_p1(),
            context: PluginContext::new(
                name.clone(),
                manifest.config.clone(),
                config.memory_limit.clone(),
            ),
            limits: StoreLimitsBuilder::new()
                .memory_size(config.memory_limit.max_bytes_usize())
                .build(),
        };
        let mut store = Store::new(&engine, data);
        store.limiter(|data| &mut data.limits);
        if let Some(fuel) = config.call_fuel() {
            store
                .set_fuel(fuel)
                .map_err(|e| PluginError::Initialization(format!("{e:#}")))?;
        }

        for (dep_name, wasm) in manifest.dependencies()? {
            let module = compiler.compile(&wasm.load()?)?;
            linker
                .module(&mut store, dep_name, &module)
                .map_err(|e| PluginError::Instantiation(format!("{dep_name}: {e:#}")))?;
            tracing::debug!(module = dep_name, "linked dependency module");
        }

        let module = compiler.compile(&main.load()?)?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| PluginError::Instantiation(format!("{e:#}")))?;

        let mut plugin = Self {
            store,
            instance,
            config,
        };
        plugin.initialize()?;

        tracing::info!(
            plugin = %name,
            host_functions = registry.len(),
            wasi = plugin.config.enable_wasi,
            "plugin ready"
        );
        Ok(plugin)
    }

    /// Name of the main module
    #[must_use]
    pub fn name(&self) -> &str {
        self.store.data().context.name()
    }

    /// Configuration the plugin was built with
    #[must_use]
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Check whether the plugin exports a function
    pub fn function_exists(&mut self, name: &str) -> bool {
        self.instance.get_func(&mut self.store, name).is_some()
    }

    /// Value of a persistent var
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&[u8]> {
        self.store.data().context.var(key)
    }

    /// Fuel left after the last call, when metering is enabled
    #[must_use]
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.config.call_fuel()?;
        self.store.get_fuel().ok()
    }

    /// Call an export with `input` and return its output
    ///
    /// The export must take no parameters and return either nothing or an
    /// `i32` status where 0 means success.
    ///
    /// # Errors
    ///
    /// Returns error if the export is missing, the guest reports failure,
    /// a host function aborts, or execution traps
    pub fn call(&mut self, name: &str, input: impl AsRef<[u8]>) -> Result<Vec<u8>, CallError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| CallError::FunctionNotFound(name.to_string()))?;
        let mut results = self.export_results(name, &func)?;

        self.store.data_mut().context.begin_call(input.as_ref())?;
        if let Some(fuel) = self.config.call_fuel() {
            self.store
                .set_fuel(fuel)
                .map_err(|e| CallError::Trap(format!("{e:#}")))?;
        }

        let span = tracing::debug_span!("plugin_call", plugin = %self.name(), function = name);
        let _enter = span.enter();

        let code = match func.call(&mut self.store, &[], &mut results) {
            Ok(()) => match results.first() {
                Some(Val::I32(code)) => *code,
                _ => 0,
            },
            Err(err) => {
                if !matches!(err.downcast_ref::<I32Exit>(), Some(I32Exit(0))) {
                    return Err(CallError::from_wasm(err));
                }
                0
            }
        };

        if code != 0 {
            let message = self
                .store
                .data()
                .context
                .error_message()
                .unwrap_or_else(|| format!("{name} returned {code}"));
            tracing::debug!(code, %message, "plugin reported failure");
            return Err(CallError::Guest { code, message });
        }

        let output = self.store.data().context.output()?;
        tracing::debug!(bytes = output.len(), "plugin call finished");
        Ok(output)
    }

    fn export_results(&self, name: &str, func: &Func) -> Result<Vec<Val>, CallError> {
        let ty = func.ty(&self.store);
        let results: Vec<ValType> = ty.results().collect();
        let supported = ty.params().len() == 0
            && (results.is_empty() || (results.len() == 1 && matches!(results[0], ValType::I32)));
        if !supported {
            return Err(CallError::InvalidExport {
                name: name.to_string(),
                signature: format!("{ty:?}"),
            });
        }
        Ok(results.iter().map(|_| Val::I32(0)).collect())
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        let Some(init) = self.instance.get_func(&mut self.store, INITIALIZE_EXPORT) else {
            return Ok(());
        };
        let init = init
            .typed::<(), ()>(&self.store)
            .map_err(|e| PluginError::Initialization(format!("{e:#}")))?;
        self.store
            .data_mut()
            .context
            .begin_call(&[])
            .map_err(|e| PluginError::Initialization(e.to_string()))?;
        match init.call(&mut self.store, ()) {
            Ok(()) => Ok(()),
            Err(err) if matches!(err.downcast_ref::<I32Exit>(), Some(I32Exit(0))) => Ok(()),
            Err(err) => Err(PluginError::Initialization(CallError::from_wasm(err).to_string())),
        }
    }
}

fn link_host_function(
    linker: &mut Linker<StoreData>,
    engine: &Engine,
    func: &HostFunction,
) -> Result<(), PluginError> {
    let host = func.clone();
    linker
        .func_new(
            &func.namespace,
            &func.name,
            func.signature.func_type(engine),
            move |mut caller: Caller<'_, StoreData>, params: &[Val], results: &mut [Val]| {
                let mut stack =
                    Stack::from_wasm(host.signature.clone(), params).map_err(HostError::from)?;
                let mut plugin = CurrentPlugin::new(&mut caller.data_mut().context);
                host.call(&mut plugin, &mut stack)?;
                stack.write_results(results).map_err(HostError::from)?;
                Ok(())
            },
        )
        .map_err(link_error)?;
    tracing::debug!(
        namespace = %func.namespace,
        name = %func.name,
        signature = %func.signature,
        "linked host function"
    );
    Ok(())
}

fn link_error(err: anyhow::Error) -> PluginError {
    PluginError::Link(format!("{err:#}"))
}

/// Errors building a plugin
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// Manifest problem
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Module failed to compile
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Import definitions collided
    #[error("Failed to link host functions: {0}")]
    Link(String),

    /// Instantiation failed, e.g. an unsatisfied import
    #[error("Failed to instantiate plugin: {0}")]
    Instantiation(String),

    /// Reactor initializer failed
    #[error("Plugin initialization failed: {0}")]
    Initialization(String),
}

impl PluginError {
    /// Process exit code for this failure
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Errors from a single plugin call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No such export
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Export has an unsupported type
    #[error("Export {name} has unsupported type {signature}")]
    InvalidExport { name: String, signature: String },

    /// Guest returned a non-zero status
    #[error("Plugin returned error code {code}: {message}")]
    Guest { code: i32, message: String },

    /// Guest called `proc_exit` with a non-zero status
    #[error("Plugin exited with code {code}")]
    Exit { code: i32 },

    /// A host function aborted the call
    #[error("Host function failed: {0}")]
    Host(HostError),

    /// Host memory failure
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Execution trapped
    #[error("Plugin trapped: {0}")]
    Trap(String),
}

impl CallError {
    /// Process exit code for this failure
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Guest { code, .. } | Self::Exit { code } => *code,
            _ => 1,
        }
    }

    fn from_wasm(err: anyhow::Error) -> Self {
        if let Some(exit) = err.downcast_ref::<I32Exit>() {
            return Self::Exit { code: exit.0 };
        }
        if let Some(host) = err.downcast_ref::<HostError>() {
            return Self::Host(host.clone());
        }
        if let Some(memory) = err.downcast_ref::<MemoryError>() {
            return Self::Memory(memory.clone());
        }
        if let Some(trap) = err.downcast_ref::<Trap>() {
            return Self::Trap(trap.to_string());
        }
        Self::Trap(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Wasm;
    use crate::value::ValueType;

    const ENV_IMPORTS: &str = r#"
        (import "extism:host/env" "input_offset" (func $input_offset (result i64)))
        (import "extism:host/env" "input_length" (func $input_length (result i64)))
        (import "extism:host/env" "length" (func $length (param i64) (result i64)))
        (import "extism:host/env" "alloc" (func $alloc (param i64) (result i64)))
        (import "extism:host/env" "store_u8" (func $store_u8 (param i64 i32)))
        (import "extism:host/env" "output_set" (func $output_set (param i64 i64)))
        (import "extism:host/env" "error_set" (func $error_set (param i64)))
    "#;

    fn manifest(body: &str) -> Manifest {
        let wat = format!("(module {ENV_IMPORTS} {body})");
        Manifest::new([Wasm::data(wat::parse_str(wat).unwrap())])
    }

    fn no_functions() -> Vec<HostFunction> {
        Vec::new()
    }

    fn shout() -> HostFunction {
        HostFunction::new("shout", [ValueType::Ptr], [ValueType::Ptr], |plugin, stack| {
            let text = plugin.read_string(stack.get_ptr(0)?)?;
            let handle = plugin.write_string(&text.to_uppercase())?;
            stack.set_ptr(0, handle)?;
            Ok(())
        })
    }

    const ECHO: &str = r#"
        (func (export "echo") (result i32)
            (call $output_set (call $input_offset) (call $input_length))
            (i32.const 0))
    "#;

    #[test]
    fn test_plugin_config_new() {
        let config = PluginConfig::new();
        assert!(!config.enable_wasi);
        assert!(config.max_fuel.is_none());
        assert_eq!(config.memory_limit, MemoryLimit::default());
    }

    #[test]
    fn test_plugin_config_with_max_fuel() {
        let config = PluginConfig::new().with_max_fuel(1000).with_wasi(true);
        assert_eq!(config.max_fuel, Some(1000));
        assert!(config.compile_config.consume_fuel);
        assert!(config.enable_wasi);
    }

    #[test]
    fn test_echo_roundtrip() {
        let mut plugin = Plugin::new(&manifest(ECHO), no_functions(), PluginConfig::new()).unwrap();
        assert_eq!(plugin.name(), MAIN_MODULE);
        assert!(plugin.function_exists("echo"));
        assert!(!plugin.function_exists("missing"));
        assert_eq!(plugin.call("echo", "Benjamin").unwrap(), b"Benjamin");
        // memory is reset between calls
        assert_eq!(plugin.call("echo", "").unwrap(), b"");
    }

    #[test]
    fn test_call_missing_function() {
        let mut plugin = Plugin::new(&manifest(ECHO), no_functions(), PluginConfig::new()).unwrap();
        let err = plugin.call("greet", "x").unwrap_err();
        assert_eq!(err, CallError::FunctionNotFound("greet".to_string()));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_call_rejects_export_with_params() {
        let body = r#"(func (export "add") (param i32) (result i32) (local.get 0))"#;
        let mut plugin = Plugin::new(&manifest(body), no_functions(), PluginConfig::new()).unwrap();
        assert!(matches!(
            plugin.call("add", ""),
            Err(CallError::InvalidExport { .. })
        ));
    }

    #[test]
    fn test_guest_error_code_and_message() {
        let body = r#"
            (func (export "fail") (result i32) (local $m i64)
                (local.set $m (call $alloc (i64.const 3)))
                (call $store_u8 (local.get $m) (i32.const 98))
                (call $store_u8 (i64.add (local.get $m) (i64.const 1)) (i32.const 97))
                (call $store_u8 (i64.add (local.get $m) (i64.const 2)) (i32.const 100))
                (call $error_set (local.get $m))
                (i32.const 3))
        "#;
        let mut plugin = Plugin::new(&manifest(body), no_functions(), PluginConfig::new()).unwrap();
        let err = plugin.call("fail", "").unwrap_err();
        assert_eq!(
            err,
            CallError::Guest {
                code: 3,
                message: "bad".to_string()
            }
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_void_export_succeeds() {
        let body = r#"(func (export "noop"))"#;
        let mut plugin = Plugin::new(&manifest(body), no_functions(), PluginConfig::new()).unwrap();
        assert!(plugin.call("noop", "").unwrap().is_empty());
    }

    #[test]
    fn test_host_function_ptr_roundtrip() {
        let body = r#"
            (import "extism:host/user" "shout" (func $shout (param i64) (result i64)))
            (func (export "run") (result i32) (local $out i64)
                (local.set $out (call $shout (call $input_offset)))
                (call $output_set (local.get $out) (call $length (local.get $out)))
                (i32.const 0))
        "#;
        let mut plugin = Plugin::new(&manifest(body), [shout()], PluginConfig::new()).unwrap();
        assert_eq!(plugin.call("run", "quiet please").unwrap(), b"QUIET PLEASE");
    }

    #[test]
    fn test_host_function_error_aborts_call() {
        let body = r#"
            (import "extism:host/user" "shout" (func $shout (param i64) (result i64)))
            (func (export "run") (result i32)
                (drop (call $shout (i64.const 9999)))
                (i32.const 0))
        "#;
        let mut plugin = Plugin::new(&manifest(body), [shout()], PluginConfig::new()).unwrap();
        let err = plugin.call("run", "").unwrap_err();
        assert!(matches!(
            err,
            CallError::Host(HostError::InvalidString { offset: 9999, .. })
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_import_fails_instantiation() {
        let body = r#"(import "extism:host/user" "shout" (func $shout (param i64) (result i64)))"#;
        let err = Plugin::new(&manifest(body), no_functions(), PluginConfig::new())
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Instantiation(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_signature_mismatch_fails_instantiation() {
        let body = r#"(import "extism:host/user" "shout" (func $shout (param i32) (result i64)))"#;
        assert!(matches!(
            Plugin::new(&manifest(body), [shout()], PluginConfig::new()),
            Err(PluginError::Instantiation(_))
        ));
    }

    #[test]
    fn test_invalid_module_fails_compile() {
        let manifest = Manifest::new([Wasm::data(b"not wasm".to_vec())]);
        assert!(matches!(
            Plugin::new(&manifest, no_functions(), PluginConfig::new()),
            Err(PluginError::Compile(_))
        ));
    }

    #[test]
    fn test_fuel_exhaustion_traps() {
        let body = r#"(func (export "spin") (result i32) (loop $l (br $l)) (i32.const 0))"#;
        let mut plugin = Plugin::new(
            &manifest(body),
            no_functions(),
            PluginConfig::new().with_max_fuel(10_000),
        )
        .unwrap();
        assert!(matches!(plugin.call("spin", ""), Err(CallError::Trap(_))));
        assert!(plugin.remaining_fuel().unwrap() < 10_000);
    }

    #[test]
    fn test_wasi_proc_exit_code() {
        let body = r#"
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (func (export "quit") (result i32)
                (call $proc_exit (i32.const 7))
                (i32.const 0))
            (func (export "done") (result i32)
                (call $proc_exit (i32.const 0))
                (i32.const 1))
        "#;
        let mut plugin =
            Plugin::new(&manifest(body), no_functions(), PluginConfig::new().with_wasi(true)).unwrap();
        let err = plugin.call("quit", "").unwrap_err();
        assert_eq!(err, CallError::Exit { code: 7 });
        assert_eq!(err.exit_code(), 7);
        assert!(plugin.call("done", "").is_ok());
    }

    #[test]
    fn test_wasi_imports_need_wasi() {
        let body = r#"(import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))"#;
        assert!(matches!(
            Plugin::new(&manifest(body), no_functions(), PluginConfig::new()),
            Err(PluginError::Instantiation(_))
        ));
    }

    #[test]
    fn test_initialize_runs_once() {
        let body = r#"
            (global $ready (mut i32) (i32.const 0))
            (func (export "_initialize")
                (global.set $ready (i32.add (global.get $ready) (i32.const 1))))
            (func (export "check") (result i32)
                (i32.ne (global.get $ready) (i32.const 1)))
        "#;
        let mut plugin = Plugin::new(&manifest(body), no_functions(), PluginConfig::new()).unwrap();
        assert!(plugin.call("check", "").is_ok());
        assert!(plugin.call("check", "").is_ok());
    }

    #[test]
    fn test_linear_memory_limit() {
        let body = r#"(memory (export "memory") 2)"#;
        let config = PluginConfig::new().with_memory_limit(MemoryLimit::with_pages(1));
        assert!(matches!(
            Plugin::new(&manifest(body), no_functions(), config),
            Err(PluginError::Instantiation(_))
        ));
    }

    #[test]
    fn test_dependency_module_linked_by_name() {
        let lib = wat::parse_str(r#"(module (func (export "seven") (result i32) (i32.const 7)))"#)
            .unwrap();
        let main = wat::parse_str(
            r#"(module
                (import "lib" "seven" (func $seven (result i32)))
                (func (export "run") (result i32)
                    (i32.sub (call $seven) (i32.const 7))))"#,
        )
        .unwrap();
        let manifest = Manifest::new([Wasm::data(lib).with_name("lib"), Wasm::data(main)]);
        let mut plugin = Plugin::new(&manifest, no_functions(), PluginConfig::new()).unwrap();
        assert!(plugin.call("run", "").is_ok());
    }

    #[test]
    fn test_kernel_name_collision_fails_link() {
        let clash = HostFunction::new("alloc", [ValueType::I64], [ValueType::I64], |_p, _s| Ok(()))
            .with_namespace(kernel::ENV_NAMESPACE);
        assert!(matches!(
            Plugin::new(&manifest(ECHO), [clash], PluginConfig::new()),
            Err(PluginError::Link(_))
        ));
    }

    /// Every `extism:host/env` import a PDK-built guest declares
    const PDK_IMPORTS: &str = r#"
        (import "extism:host/env" "input_offset" (func (result i64)))
        (import "extism:host/env" "input_length" (func (result i64)))
        (import "extism:host/env" "input_load_u8" (func (param i64) (result i32)))
        (import "extism:host/env" "input_load_u64" (func (param i64) (result i64)))
        (import "extism:host/env" "length" (func (param i64) (result i64)))
        (import "extism:host/env" "length_unsafe" (func (param i64) (result i64)))
        (import "extism:host/env" "alloc" (func (param i64) (result i64)))
        (import "extism:host/env" "free" (func (param i64)))
        (import "extism:host/env" "load_u8" (func (param i64) (result i32)))
        (import "extism:host/env" "load_u64" (func (param i64) (result i64)))
        (import "extism:host/env" "store_u8" (func (param i64 i32)))
        (import "extism:host/env" "store_u64" (func (param i64 i64)))
        (import "extism:host/env" "output_set" (func (param i64 i64)))
        (import "extism:host/env" "error_set" (func (param i64)))
        (import "extism:host/env" "config_get" (func (param i64) (result i64)))
        (import "extism:host/env" "var_get" (func (param i64) (result i64)))
        (import "extism:host/env" "var_set" (func (param i64 i64)))
        (import "extism:host/env" "log_trace" (func (param i64)))
        (import "extism:host/env" "log_debug" (func (param i64)))
        (import "extism:host/env" "log_info" (func (param i64)))
        (import "extism:host/env" "log_warn" (func (param i64)))
        (import "extism:host/env" "log_error" (func (param i64)))
        (import "extism:host/env" "get_log_level" (func $get_log_level (result i32)))
        (import "extism:host/env" "http_request" (func $http_request (param i64 i64) (result i64)))
        (import "extism:host/env" "http_status_code" (func $http_status_code (result i32)))
        (import "extism:host/env" "http_headers" (func $http_headers (result i64)))
    "#;

    #[test]
    fn test_pdk_imports_all_linked() {
        let body = r#"
            (func (export "status") (result i32)
                (drop (call $get_log_level))
                (i32.add (call $http_status_code) (i32.wrap_i64 (call $http_headers))))
            (func (export "fetch") (result i32)
                (drop (call $http_request (call $input_offset) (i64.const 0)))
                (i32.const 0))
        "#;
        let wat = format!("(module {ENV_IMPORTS} {PDK_IMPORTS} {body})");
        let manifest = Manifest::new([Wasm::data(wat::parse_str(wat).unwrap())]);
        let mut plugin = Plugin::new(&manifest, no_functions(), PluginConfig::new()).unwrap();

        assert!(plugin.call("status", "").is_ok());
        assert_eq!(
            plugin.call("fetch", r#"{"url":"https://example.com/x","method":"GET"}"#),
            Err(CallError::Host(HostError::HttpNotAllowed {
                url: "https://example.com/x".to_string()
            }))
        );
    }

    #[test]
    fn test_fuel_metering_without_cap() {
        let config = PluginConfig::new()
            .with_compile_config(CompileConfig::new().with_fuel(true));
        assert_eq!(config.call_fuel(), Some(u64::MAX));
        assert_eq!(PluginConfig::new().call_fuel(), None);
        assert_eq!(PluginConfig::new().with_max_fuel(5).call_fuel(), Some(5));

        let mut plugin = Plugin::new(&manifest(ECHO), no_functions(), config).unwrap();
        assert_eq!(plugin.call("echo", "fuel").unwrap(), b"fuel");
        assert!(plugin.remaining_fuel().unwrap() < u64::MAX);
    }
}
