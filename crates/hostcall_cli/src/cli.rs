//! Command-line surface: argument parsing and the load, call, print flow.

use crate::functions;
use clap::Parser;
use hostcall_runtime::{CallError, Manifest, Plugin, PluginConfig, PluginError, Wasm};
use std::path::{Path, PathBuf};

/// Run an exported plugin function against the demo host functions
#[derive(Debug, Clone, Parser)]
#[command(name = "hostcall", version)]
#[command(about = "HOSTCALL - call a WASM plugin that imports typed host functions", long_about = None)]
pub struct Cli {
    /// Path to the compiled plugin
    #[arg(value_name = "WASM_FILE")]
    pub wasm_file: PathBuf,

    /// Export to call
    #[arg(short, long, default_value = "greet")]
    pub function: String,

    /// Input payload passed to the export
    #[arg(short, long, default_value = "Benjamin")]
    pub input: String,

    /// Guest config entry, repeatable
    #[arg(short, long = "config", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub config: Vec<(String, String)>,

    /// Do not link WASI imports
    #[arg(long)]
    pub no_wasi: bool,

    /// Fuel available to each call
    #[arg(long, value_name = "N")]
    pub fuel: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{arg}`")),
    }
}

impl Cli {
    fn plugin_config(&self) -> PluginConfig {
        let config = PluginConfig::new().with_wasi(!self.no_wasi);
        match self.fuel {
            Some(fuel) => config.with_max_fuel(fuel),
            None => config,
        }
    }
}

/// Read the plugin bytes from disk
///
/// # Errors
///
/// Returns [`CliError::Io`] if the file cannot be read
pub fn load_module(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the plugin, call the requested export and decode its output
///
/// # Errors
///
/// Returns error if the module is unreadable, the plugin cannot be
/// instantiated, or the call fails
pub fn run(cli: &Cli) -> Result<String, CliError> {
    let bytes = load_module(&cli.wasm_file)?;
    tracing::debug!(path = %cli.wasm_file.display(), size = bytes.len(), "loaded module");

    let mut wasm = Wasm::data(bytes);
    if let Some(stem) = cli.wasm_file.file_stem() {
        wasm = wasm.with_name(stem.to_string_lossy());
    }
    let manifest = Manifest::new([wasm]).with_config_values(cli.config.iter().cloned());

    let mut plugin = Plugin::new(&manifest, functions::all(), cli.plugin_config())?;
    let output = plugin.call(&cli.function, cli.input.as_bytes())?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// CLI failures
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad command line
    #[error("{0}")]
    Usage(String),

    /// Module unreadable
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plugin could not be instantiated
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Call failed
    #[error(transparent)]
    Call(#[from] CallError),
}

impl CliError {
    /// Process exit code for this failure; never 0
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let code = match self {
            Self::Usage(_) | Self::Io { .. } => 1,
            Self::Plugin(err) => err.exit_code(),
            Self::Call(err) => err.exit_code(),
        };
        if code == 0 { 1 } else { code }
    }

    /// Exit status handed to the OS; codes outside `1..=255` become 1
    #[must_use]
    pub fn exit_status(&self) -> u8 {
        u8::try_from(self.exit_code())
            .ok()
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{EXPECTED_F32, EXPECTED_F64, EXPECTED_I32, EXPECTED_I64};
    use hostcall_runtime::HostError;
    use std::io::Write;

    fn greet_wat(i64_arg: i64) -> String {
        format!(
            r#"(module
                (import "extism:host/env" "input_offset" (func $input_offset (result i64)))
                (import "extism:host/env" "length" (func $length (param i64) (result i64)))
                (import "extism:host/env" "output_set" (func $output_set (param i64 i64)))
                (import "extism:host/user" "capitalize" (func $capitalize (param i64) (result i64)))
                (import "extism:host/user" "floatInputs" (func $float_inputs (param f64 f32) (result i32)))
                (import "extism:host/user" "floatOutput" (func $float_output (param i32) (result f64)))
                (import "extism:host/user" "voidInputs" (func $void_inputs (param i32 i64 f32 f64 i32)))
                (func (export "greet") (result i32)
                    (local $cap i64)
                    (if (i32.ne (call $float_inputs (f64.const {EXPECTED_F64}) (f32.const {EXPECTED_F32}))
                                (i32.const 2147483647))
                        (then (return (i32.const 2))))
                    (if (f64.ne (call $float_output (i32.const {EXPECTED_I32}))
                                (f64.const 9007199254740.125))
                        (then (return (i32.const 3))))
                    (call $void_inputs
                        (i32.const {EXPECTED_I32})
                        (i64.const {i64_arg})
                        (f32.const {EXPECTED_F32})
                        (f64.const {EXPECTED_F64})
                        (i32.const -12))
                    (local.set $cap (call $capitalize (call $input_offset)))
                    (call $output_set (local.get $cap) (call $length (local.get $cap)))
                    (i32.const 0)))"#
        )
    }

    fn module_file(wat: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".wasm").tempfile().unwrap();
        file.write_all(&wat::parse_str(wat).unwrap()).unwrap();
        file
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hostcall").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_missing_argument() {
        let err = Cli::try_parse_from(["hostcall"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
        assert_eq!(CliError::Usage(err.to_string()).exit_code(), 1);
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["plugin.wasm"]);
        assert_eq!(cli.function, "greet");
        assert_eq!(cli.input, "Benjamin");
        assert!(cli.config.is_empty());
        assert!(cli.plugin_config().enable_wasi);
        assert!(cli.plugin_config().max_fuel.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = parse(&[
            "plugin.wasm",
            "--config",
            "greeting=hi=there",
            "-c",
            "lang=en",
            "--no-wasi",
            "--fuel",
            "5000",
        ]);
        assert_eq!(
            cli.config,
            vec![
                ("greeting".to_string(), "hi=there".to_string()),
                ("lang".to_string(), "en".to_string())
            ]
        );
        let config = cli.plugin_config();
        assert!(!config.enable_wasi);
        assert_eq!(config.max_fuel, Some(5000));
    }

    #[test]
    fn test_bad_config_pair() {
        assert!(Cli::try_parse_from(["hostcall", "p.wasm", "--config", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["hostcall", "p.wasm", "--config", "=x"]).is_err());
    }

    #[test]
    fn test_missing_file() {
        let cli = parse(&["/definitely/not/here.wasm"]);
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("/definitely/not/here.wasm"));
    }

    #[test]
    fn test_greet_benjamin() {
        let file = module_file(&greet_wat(EXPECTED_I64));
        let cli = parse(&[file.path().to_str().unwrap()]);
        assert_eq!(run(&cli).unwrap(), "Benjamin");
    }

    #[test]
    fn test_greet_capitalizes_input() {
        let file = module_file(&greet_wat(EXPECTED_I64));
        let cli = parse(&[file.path().to_str().unwrap(), "--input", "hello world"]);
        assert_eq!(run(&cli).unwrap(), "Hello World");
    }

    #[test]
    fn test_greet_with_fuel_and_no_wasi() {
        let file = module_file(&greet_wat(EXPECTED_I64));
        let cli = parse(&[
            file.path().to_str().unwrap(),
            "--no-wasi",
            "--fuel",
            "1000000",
            "-i",
            "fuelled run",
        ]);
        assert_eq!(run(&cli).unwrap(), "Fuelled Run");
    }

    #[test]
    fn test_void_inputs_mismatch_aborts_call() {
        let file = module_file(&greet_wat(1));
        let cli = parse(&[file.path().to_str().unwrap()]);
        let err = run(&cli).unwrap_err();
        match &err {
            CliError::Call(CallError::Host(HostError::UnexpectedValue { field, .. })) => {
                assert_eq!(field, "i64");
            }
            other => panic!("expected host failure, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_export() {
        let file = module_file(&greet_wat(EXPECTED_I64));
        let cli = parse(&[file.path().to_str().unwrap(), "--function", "farewell"]);
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CliError::Call(CallError::FunctionNotFound(_))));
    }

    #[test]
    fn test_unsatisfied_import() {
        let file = module_file(
            r#"(module
                (import "extism:host/user" "whisper" (func (param i64) (result i64)))
                (func (export "greet") (result i32) i32.const 0))"#,
        );
        let cli = parse(&[file.path().to_str().unwrap()]);
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CliError::Plugin(PluginError::Instantiation(_))));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_guest_error_code_propagates() {
        let file = module_file(r#"(module (func (export "greet") (result i32) i32.const 4))"#);
        let cli = parse(&[file.path().to_str().unwrap()]);
        assert_eq!(run(&cli).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn test_http_and_log_level_imports_resolve() {
        let file = module_file(
            r#"(module
                (import "extism:host/env" "http_request" (func (param i64 i64) (result i64)))
                (import "extism:host/env" "http_status_code" (func (result i32)))
                (import "extism:host/env" "http_headers" (func (result i64)))
                (import "extism:host/env" "get_log_level" (func (result i32)))
                (func (export "greet") (result i32) i32.const 0))"#,
        );
        let cli = parse(&[file.path().to_str().unwrap()]);
        assert_eq!(run(&cli).unwrap(), "");
    }

    #[test]
    fn test_exit_status_range() {
        let guest = |code| CliError::Call(CallError::Guest {
            code,
            message: String::new(),
        });
        assert_eq!(guest(4).exit_status(), 4);
        assert_eq!(guest(255).exit_status(), 255);
        assert_eq!(guest(256).exit_status(), 1);
        assert_eq!(guest(-1).exit_status(), 1);
        assert_eq!(CliError::Usage(String::new()).exit_status(), 1);
    }

    #[test]
    fn test_invalid_module() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not wasm at all").unwrap();
        let cli = parse(&[file.path().to_str().unwrap()]);
        let err = run(&cli).unwrap_err();
        assert!(matches!(err, CliError::Plugin(PluginError::Compile(_))));
        assert_eq!(err.exit_code(), 1);
    }
}
