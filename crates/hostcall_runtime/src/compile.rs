//! WASM validation and compilation.

use serde::{Deserialize, Serialize};
use wasmtime::{Config, Engine, Module, OptLevel};

/// Wasm binary magic number
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Core module binary version
const WASM_VERSION: &[u8; 4] = b"\x01\x00\x00\x00";

/// Compilation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Largest accepted module, in bytes
    pub max_module_size: usize,
    /// Check the binary header before compiling
    pub validate: bool,
    /// Enable cranelift optimizations
    pub optimize: bool,
    /// Instrument code for fuel metering
    pub consume_fuel: bool,
}

impl CompileConfig {
    /// Create a new compile config
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_module_size: 10 * 1024 * 1024, // 10MB
            validate: true,
            optimize: true,
            consume_fuel: false,
        }
    }

    /// Set the module size limit
    #[must_use]
    pub fn with_max_module_size(mut self, size: usize) -> Self {
        self.max_module_size = size;
        self
    }

    /// Enable/disable header validation
    #[must_use]
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Enable/disable optimization
    #[must_use]
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Enable/disable fuel metering
    #[must_use]
    pub fn with_fuel(mut self, consume_fuel: bool) -> Self {
        self.consume_fuel = consume_fuel;
        self
    }

    fn engine_config(&self) -> Config {
        let mut config = Config::new();
        config.consume_fuel(self.consume_fuel);
        config.cranelift_opt_level(if self.optimize {
            OptLevel::Speed
        } else {
            OptLevel::None
        });
        config
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles modules against a shared engine
#[derive(Clone)]
pub struct WasmCompiler {
    config: CompileConfig,
    engine: Engine,
}

impl WasmCompiler {
    /// Create a compiler and its engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the configuration
    pub fn new(config: CompileConfig) -> Result<Self, CompileError> {
        let engine = Engine::new(&config.engine_config())
            .map_err(|e| CompileError::Engine(format!("{e:#}")))?;
        Ok(Self { config, engine })
    }

    /// Engine shared by every module this compiler builds
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compiler configuration
    #[must_use]
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Check size and binary header
    ///
    /// # Errors
    ///
    /// Returns error if validation fails
    pub fn validate(&self, wasm_bytes: &[u8]) -> Result<(), CompileError> {
        if !self.config.validate {
            return Ok(());
        }

        if wasm_bytes.len() > self.config.max_module_size {
            return Err(CompileError::SizeLimitExceeded {
                size: wasm_bytes.len(),
                limit: self.config.max_module_size,
            });
        }

        if wasm_bytes.len() < 8 {
            return Err(CompileError::InvalidModule("Too small".to_string()));
        }

        if &wasm_bytes[0..4] != WASM_MAGIC {
            return Err(CompileError::InvalidModule(
                "Invalid magic number".to_string(),
            ));
        }

        let version = &wasm_bytes[4..8];
        if version != WASM_VERSION {
            return Err(CompileError::InvalidModule(format!(
                "Unsupported version: {:?}",
                version
            )));
        }

        Ok(())
    }

    /// Validate and compile a module
    ///
    /// # Errors
    ///
    /// Returns error if validation or compilation fails
    pub fn compile(&self, wasm_bytes: &[u8]) -> Result<Module, CompileError> {
        self.validate(wasm_bytes)?;
        let module = Module::new(&self.engine, wasm_bytes)
            .map_err(|e| CompileError::InvalidModule(format!("{e:#}")))?;
        tracing::debug!(
            size = wasm_bytes.len(),
            imports = module.imports().len(),
            exports = module.exports().len(),
            "compiled module"
        );
        Ok(module)
    }
}

/// Compilation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Engine could not be created
    #[error("Engine configuration rejected: {0}")]
    Engine(String),

    /// Invalid WASM module
    #[error("Invalid WASM module: {0}")]
    InvalidModule(String),

    /// Size limit exceeded
    #[error("Module size {size} exceeds limit {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },
}
