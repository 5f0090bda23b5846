//! Kernel imports under `extism:host/env`.
//!
//! These give the guest access to host memory, call input and output,
//! plugin config, persistent vars, logging and the (always denied) HTTP
//! client. All offsets are `i64` handles into [`HostMemory`].

use crate::host::HostError;
use crate::memory::{HostMemory, MemoryError, MemoryLimit};
use crate::plugin::StoreData;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use wasmtime::{Caller, Linker};

/// Import namespace of the kernel functions
pub const ENV_NAMESPACE: &str = "extism:host/env";

/// Per-plugin state shared by the kernel and host functions
#[derive(Debug, Clone)]
pub struct PluginContext {
    name: String,
    memory: HostMemory,
    config: BTreeMap<String, String>,
    /// Vars survive across calls
    vars: BTreeMap<String, Vec<u8>>,
    input_offset: u64,
    output: Option<(u64, u64)>,
    error: Option<u64>,
}

impl PluginContext {
    /// Create a context with an empty arena
    #[must_use]
    pub fn new(name: impl Into<String>, config: BTreeMap<String, String>, limit: MemoryLimit) -> Self {
        Self {
            name: name.into(),
            memory: HostMemory::new(limit),
            config,
            vars: BTreeMap::new(),
            input_offset: 0,
            output: None,
            error: None,
        }
    }

    /// Plugin name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin config
    #[must_use]
    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    /// Host memory
    #[must_use]
    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }

    /// Mutable host memory
    pub fn memory_mut(&mut self) -> &mut HostMemory {
        &mut self.memory
    }

    /// Value of a persistent var
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&[u8]> {
        self.vars.get(key).map(Vec::as_slice)
    }

    /// Reset per-call state and place `input` in host memory
    ///
    /// # Errors
    ///
    /// Returns error if the input does not fit the memory limit
    pub fn begin_call(&mut self, input: &[u8]) -> Result<(), MemoryError> {
        self.memory.reset();
        self.output = None;
        self.error = None;
        self.input_offset = self.memory.alloc_bytes(input)?;
        Ok(())
    }

    /// Handle of the call input
    #[must_use]
    pub fn input_offset(&self) -> u64 {
        self.input_offset
    }

    /// Length of the call input
    #[must_use]
    pub fn input_length(&self) -> u64 {
        self.memory.length(self.input_offset).unwrap_or(0)
    }

    /// Load one input byte
    ///
    /// # Errors
    ///
    /// Returns error if `index` is past the end of the input
    pub fn input_load_u8(&self, index: u64) -> Result<u8, MemoryError> {
        self.check_input(index, 1)?;
        self.memory.load_u8(self.input_offset + index)
    }

    /// Load eight input bytes as a little-endian `u64`
    ///
    /// # Errors
    ///
    /// Returns error if the read runs past the end of the input
    pub fn input_load_u64(&self, index: u64) -> Result<u64, MemoryError> {
        self.check_input(index, 8)?;
        self.memory.load_u64(self.input_offset + index)
    }

    /// Record the output range
    pub fn set_output(&mut self, offset: u64, len: u64) {
        self.output = Some((offset, len));
    }

    /// Record the error message handle
    pub fn set_error(&mut self, offset: u64) {
        self.error = (offset != 0).then_some(offset);
    }

    /// Bytes of the recorded output
    ///
    /// # Errors
    ///
    /// Returns error if the recorded range is not inside host memory
    pub fn output(&self) -> Result<Vec<u8>, MemoryError> {
        match self.output {
            Some((_, 0)) | None => Ok(Vec::new()),
            Some((offset, len)) => Ok(self.memory.read(offset, len)?.to_vec()),
        }
    }

    /// Recorded error message, if any
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let offset = self.error?;
        self.memory
            .bytes(offset)
            .ok()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Look up a config key stored at `key_offset`
    ///
    /// Returns the handle of a new block holding the value, or 0 when the
    /// key is not set.
    ///
    /// # Errors
    ///
    /// Returns error if the key handle is invalid
    pub fn config_get(&mut self, key_offset: u64) -> Result<u64, MemoryError> {
        let key = self.key_at(key_offset)?;
        match self.config.get(&key) {
            Some(value) => {
                let value = value.clone().into_bytes();
                self.memory.alloc_bytes(&value)
            }
            None => Ok(0),
        }
    }

    /// Look up a var; same conventions as [`Self::config_get`]
    ///
    /// # Errors
    ///
    /// Returns error if the key handle is invalid
    pub fn var_get(&mut self, key_offset: u64) -> Result<u64, MemoryError> {
        let key = self.key_at(key_offset)?;
        match self.vars.get(&key) {
            Some(value) => {
                let value = value.clone();
                self.memory.alloc_bytes(&value)
            }
            None => Ok(0),
        }
    }

    /// Set a var from a value handle; a 0 handle removes it
    ///
    /// # Errors
    ///
    /// Returns error if either handle is invalid
    pub fn var_set(&mut self, key_offset: u64, value_offset: u64) -> Result<(), MemoryError> {
        let key = self.key_at(key_offset)?;
        if value_offset == 0 {
            self.vars.remove(&key);
        } else {
            let value = self.memory.bytes(value_offset)?.to_vec();
            self.vars.insert(key, value);
        }
        Ok(())
    }

    /// Refuse the HTTP request stored at `request_offset`
    ///
    /// # Errors
    ///
    /// Always returns [`HostError::HttpNotAllowed`], or a memory error if
    /// the request handle is invalid
    pub fn http_request(&self, request_offset: u64) -> Result<u64, HostError> {
        let request = self.memory.bytes(request_offset)?;
        let url = serde_json::from_slice::<HttpRequest>(request)
            .map(|r| r.url)
            .unwrap_or_else(|_| "<malformed request>".to_string());
        tracing::warn!(plugin = %self.name, %url, "denied HTTP request");
        Err(HostError::HttpNotAllowed { url })
    }

    fn key_at(&self, offset: u64) -> Result<String, MemoryError> {
        let bytes = self.memory.bytes(offset)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn check_input(&self, index: u64, width: u64) -> Result<(), MemoryError> {
        if index.saturating_add(width) > self.input_length() {
            return Err(MemoryError::OutOfBounds {
                address: self.input_offset.saturating_add(index),
                width,
            });
        }
        Ok(())
    }
}

/// The fields of a guest HTTP request we report on
#[derive(Debug, Deserialize)]
struct HttpRequest {
    url: String,
}

/// Guest log level code for a host filter; `i32::MAX` disables guest logs
#[must_use]
pub fn log_level_code(filter: LevelFilter) -> i32 {
    match filter.into_level() {
        Some(Level::TRACE) => 0,
        Some(Level::DEBUG) => 1,
        Some(Level::INFO) => 2,
        Some(Level::WARN) => 3,
        Some(_) => 4,
        None => i32::MAX,
    }
}

fn context<'a>(caller: &'a mut Caller<'_, StoreData>) -> &'a mut PluginContext {
    &mut caller.data_mut().context
}

fn log_message(level: Level, plugin: &str, message: &str) {
    match level {
        Level::TRACE => tracing::trace!(target: "plugin", plugin, "{message}"),
        Level::DEBUG => tracing::debug!(target: "plugin", plugin, "{message}"),
        Level::INFO => tracing::info!(target: "plugin", plugin, "{message}"),
        Level::WARN => tracing::warn!(target: "plugin", plugin, "{message}"),
        _ => tracing::error!(target: "plugin", plugin, "{message}"),
    }
}

/// Register every kernel import on the linker
///
/// # Errors
///
/// Returns error if a definition collides with an existing one
pub(crate) fn link(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    link_memory(linker)?;
    link_io(linker)?;
    link_config(linker)?;
    link_logging(linker)?;
    link_http(linker)?;
    Ok(())
}

fn link_memory(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    linker.func_wrap(
        ENV_NAMESPACE,
        "alloc",
        |mut caller: Caller<'_, StoreData>, len: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).memory_mut().alloc(len as u64)? as i64)
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "free",
        |mut caller: Caller<'_, StoreData>, offset: i64| {
            context(&mut caller).memory_mut().free(offset as u64);
        },
    )?;
    for name in ["length", "length_unsafe"] {
        linker.func_wrap(
            ENV_NAMESPACE,
            name,
            |mut caller: Caller<'_, StoreData>, offset: i64| -> i64 {
                context(&mut caller)
                    .memory()
                    .length(offset as u64)
                    .unwrap_or(0) as i64
            },
        )?;
    }
    linker.func_wrap(
        ENV_NAMESPACE,
        "load_u8",
        |mut caller: Caller<'_, StoreData>, offset: i64| -> anyhow::Result<i32> {
            Ok(i32::from(context(&mut caller).memory().load_u8(offset as u64)?))
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "load_u64",
        |mut caller: Caller<'_, StoreData>, offset: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).memory().load_u64(offset as u64)? as i64)
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "store_u8",
        |mut caller: Caller<'_, StoreData>, offset: i64, value: i32| -> anyhow::Result<()> {
            context(&mut caller)
                .memory_mut()
                .store_u8(offset as u64, value as u8)?;
            Ok(())
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "store_u64",
        |mut caller: Caller<'_, StoreData>, offset: i64, value: i64| -> anyhow::Result<()> {
            context(&mut caller)
                .memory_mut()
                .store_u64(offset as u64, value as u64)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn link_io(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    linker.func_wrap(
        ENV_NAMESPACE,
        "input_offset",
        |mut caller: Caller<'_, StoreData>| -> i64 { context(&mut caller).input_offset() as i64 },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "input_length",
        |mut caller: Caller<'_, StoreData>| -> i64 { context(&mut caller).input_length() as i64 },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "input_load_u8",
        |mut caller: Caller<'_, StoreData>, index: i64| -> anyhow::Result<i32> {
            Ok(i32::from(context(&mut caller).input_load_u8(index as u64)?))
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "input_load_u64",
        |mut caller: Caller<'_, StoreData>, index: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).input_load_u64(index as u64)? as i64)
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "output_set",
        |mut caller: Caller<'_, StoreData>, offset: i64, len: i64| {
            context(&mut caller).set_output(offset as u64, len as u64);
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "error_set",
        |mut caller: Caller<'_, StoreData>, offset: i64| {
            context(&mut caller).set_error(offset as u64);
        },
    )?;
    Ok(())
}

fn link_config(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    linker.func_wrap(
        ENV_NAMESPACE,
        "config_get",
        |mut caller: Caller<'_, StoreData>, key: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).config_get(key as u64)? as i64)
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "var_get",
        |mut caller: Caller<'_, StoreData>, key: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).var_get(key as u64)? as i64)
        },
    )?;
    linker.func_wrap(
        ENV_NAMESPACE,
        "var_set",
        |mut caller: Caller<'_, StoreData>, key: i64, value: i64| -> anyhow::Result<()> {
            context(&mut caller).var_set(key as u64, value as u64)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn link_logging(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    let levels = [
        ("log_trace", Level::TRACE),
        ("log_debug", Level::DEBUG),
        ("log_info", Level::INFO),
        ("log_warn", Level::WARN),
        ("log_error", Level::ERROR),
    ];
    for (name, level) in levels {
        linker.func_wrap(
            ENV_NAMESPACE,
            name,
            move |mut caller: Caller<'_, StoreData>, offset: i64| -> anyhow::Result<()> {
                let ctx = context(&mut caller);
                let message = String::from_utf8_lossy(ctx.memory().bytes(offset as u64)?);
                log_message(level, ctx.name(), &message);
                Ok(())
            },
        )?;
    }
    linker.func_wrap(ENV_NAMESPACE, "get_log_level", || -> i32 {
        log_level_code(LevelFilter::current())
    })?;
    Ok(())
}

fn link_http(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    linker.func_wrap(
        ENV_NAMESPACE,
        "http_request",
        |mut caller: Caller<'_, StoreData>, request: i64, _body: i64| -> anyhow::Result<i64> {
            Ok(context(&mut caller).http_request(request as u64)? as i64)
        },
    )?;
    // no request ever completes
    linker.func_wrap(ENV_NAMESPACE, "http_status_code", || -> i32 { 0 })?;
    linker.func_wrap(ENV_NAMESPACE, "http_headers", || -> i64 { 0 })?;
    Ok(())
}
