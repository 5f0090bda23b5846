//! Host functions exposed to the guest under `extism:host/user`.

use hostcall_runtime::{CurrentPlugin, HostError, HostFunction, Stack, ValueType};

/// Fixed result of `floatInputs`
pub const FLOAT_INPUTS_RESULT: i32 = 2_147_483_647;

/// Fixed result of `floatOutput`
pub const FLOAT_OUTPUT_RESULT: f64 = 9_007_199_254_740.125;

/// Value `voidInputs` expects in its `i32` slot
pub const EXPECTED_I32: i32 = 2_147_483_647;

/// Value `voidInputs` expects in its `i64` slot
pub const EXPECTED_I64: i64 = 9_223_372_036_854_775_807;

/// Value `voidInputs` expects in its `f32` slot
pub const EXPECTED_F32: f32 = 314_567.5;

/// Value `voidInputs` expects in its `f64` slot
pub const EXPECTED_F64: f64 = 9_007_199_254_740.125;

/// Allowed float drift in `voidInputs`
pub const FLOAT_TOLERANCE: f64 = 0.0001;

/// The four host functions with their declared signatures
#[must_use]
pub fn all() -> Vec<HostFunction> {
    use ValueType::{F32, F64, I32, I64, Ptr};
    let no_results: Vec<ValueType> = Vec::new();

    vec![
        HostFunction::new("capitalize", [Ptr], [Ptr], capitalize),
        HostFunction::new("floatInputs", [F64, F32], [I32], float_inputs),
        HostFunction::new("floatOutput", [I32], [F64], float_output),
        HostFunction::new("voidInputs", [I32, I64, F32, F64, I32], no_results, void_inputs),
    ]
}

/// `capitalize(ptr) -> ptr`: title-case the string behind slot 0
///
/// # Errors
///
/// Returns error if slot 0 does not reference a valid string
pub fn capitalize(plugin: &mut CurrentPlugin<'_>, stack: &mut Stack) -> Result<(), HostError> {
    let input = plugin.read_string(stack.get_ptr(0)?)?;
    let output = title_case(&input);
    tracing::debug!(%input, %output, "capitalize");
    let handle = plugin.write_string(&output)?;
    stack.set_ptr(0, handle)?;
    Ok(())
}

/// `floatInputs(f64, f32) -> i32`: log both floats, return a fixed integer
///
/// # Errors
///
/// Returns error if the stack does not follow the declared signature
pub fn float_inputs(_plugin: &mut CurrentPlugin<'_>, stack: &mut Stack) -> Result<(), HostError> {
    let f64_value = stack.get_f64(0)?;
    let f32_value = stack.get_f32(1)?;
    tracing::info!(f64 = f64_value, f32 = f32_value, "floatInputs received");
    stack.set_i32(0, FLOAT_INPUTS_RESULT)?;
    Ok(())
}

/// `floatOutput(i32) -> f64`: log the integer, return a fixed float
///
/// # Errors
///
/// Returns error if the stack does not follow the declared signature
pub fn float_output(_plugin: &mut CurrentPlugin<'_>, stack: &mut Stack) -> Result<(), HostError> {
    let i32_value = stack.get_i32(0)?;
    tracing::info!(i32 = i32_value, "floatOutput received");
    stack.set_f64(0, FLOAT_OUTPUT_RESULT)?;
    Ok(())
}

/// `voidInputs(i32, i64, f32, f64, i32)`: log and validate every slot
///
/// # Errors
///
/// Returns [`HostError::UnexpectedValue`] naming the first field that
/// differs from its expected constant
pub fn void_inputs(_plugin: &mut CurrentPlugin<'_>, stack: &mut Stack) -> Result<(), HostError> {
    let raw = (0..stack.len())
        .map(|i| stack.raw(i))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(?raw, "voidInputs stack");

    let i32_value = stack.get_i32(0)?;
    let i64_value = stack.get_i64(1)?;
    let f32_value = stack.get_f32(2)?;
    let f64_value = stack.get_f64(3)?;
    let extra = stack.get_i32(4)?;
    tracing::info!(
        i32 = i32_value,
        i64 = i64_value,
        f32 = f32_value,
        f64 = f64_value,
        extra,
        "voidInputs received"
    );

    check_void_inputs(i32_value, i64_value, f32_value, f64_value)
}

/// Compare `voidInputs` arguments against the expected constants
///
/// # Errors
///
/// Returns [`HostError::UnexpectedValue`] for the first mismatch
pub fn check_void_inputs(
    i32_value: i32,
    i64_value: i64,
    f32_value: f32,
    f64_value: f64,
) -> Result<(), HostError> {
    if i32_value != EXPECTED_I32 {
        return Err(HostError::unexpected("i32", EXPECTED_I32, i32_value));
    }
    if i64_value != EXPECTED_I64 {
        return Err(HostError::unexpected("i64", EXPECTED_I64, i64_value));
    }
    if !within_tolerance(f64::from(f32_value), f64::from(EXPECTED_F32)) {
        return Err(HostError::unexpected("f32", EXPECTED_F32, f32_value));
    }
    if !within_tolerance(f64_value, EXPECTED_F64) {
        return Err(HostError::unexpected("f64", EXPECTED_F64, f64_value));
    }
    Ok(())
}

/// NaN never matches
fn within_tolerance(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= FLOAT_TOLERANCE
}

/// Title-case the first letter of every word, leaving the rest unchanged
///
/// Words are split on whitespace and on ASCII characters other than
/// letters, digits and `_`.
#[must_use]
pub fn title_case(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut after_separator = true;
    for c in input.chars() {
        if after_separator {
            push_title(&mut output, c);
        } else {
            output.push(c);
        }
        after_separator = is_separator(c);
    }
    output
}

/// Title case differs from upper case for the Latin digraphs and the Greek
/// letters with ypogegrammeni
fn push_title(output: &mut String, c: char) {
    let title = match c {
        '\u{01C4}'..='\u{01C6}' => '\u{01C5}',
        '\u{01C7}'..='\u{01C9}' => '\u{01C8}',
        '\u{01CA}'..='\u{01CC}' => '\u{01CB}',
        '\u{01F1}'..='\u{01F3}' => '\u{01F2}',
        '\u{1F80}'..='\u{1F87}' | '\u{1F90}'..='\u{1F97}' | '\u{1FA0}'..='\u{1FA7}' => {
            char::from_u32(u32::from(c) + 8).unwrap_or(c)
        }
        '\u{1F88}'..='\u{1F8F}' | '\u{1F98}'..='\u{1F9F}' | '\u{1FA8}'..='\u{1FAF}' => c,
        '\u{1FB3}' => '\u{1FBC}',
        '\u{1FC3}' => '\u{1FCC}',
        '\u{1FF3}' => '\u{1FFC}',
        _ => {
            output.extend(c.to_uppercase());
            return;
        }
    };
    output.push(title);
}

fn is_separator(c: char) -> bool {
    if c.is_ascii() {
        return !(c.is_ascii_alphanumeric() || c == '_');
    }
    !c.is_alphanumeric() && c.is_whitespace()
}
