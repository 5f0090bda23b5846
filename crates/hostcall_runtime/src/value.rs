//! Typed values and the untyped slot stack shared by host and guest.
//!
//! Every argument and return value crosses the boundary as a raw `u64`
//! slot. The slot's meaning comes only from the declared [`Signature`],
//! so all access goes through [`Stack`], which checks the declared type
//! before decoding.

use serde::{Deserialize, Serialize};
use std::fmt;
use wasmtime::{Engine, FuncType, Val, ValType};

/// Numeric type of a single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Handle into host-managed plugin memory
    Ptr,
}

impl ValueType {
    /// Wasm type that carries this value across the boundary
    #[must_use]
    pub fn wasm_type(self) -> ValType {
        match self {
            Self::I32 => ValType::I32,
            Self::I64 | Self::Ptr => ValType::I64,
            Self::F32 => ValType::F32,
            Self::F64 => ValType::F64,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// Encode an `i32` into a slot (zero-extended)
#[must_use]
pub fn encode_i32(value: i32) -> u64 {
    u64::from(value as u32)
}

/// Decode an `i32` from a slot
#[must_use]
pub fn decode_i32(raw: u64) -> i32 {
    raw as u32 as i32
}

/// Encode an `i64` into a slot
#[must_use]
pub fn encode_i64(value: i64) -> u64 {
    value as u64
}

/// Decode an `i64` from a slot
#[must_use]
pub fn decode_i64(raw: u64) -> i64 {
    raw as i64
}

/// Encode an `f32` into a slot by bit pattern
#[must_use]
pub fn encode_f32(value: f32) -> u64 {
    u64::from(value.to_bits())
}

/// Decode an `f32` from a slot
#[must_use]
pub fn decode_f32(raw: u64) -> f32 {
    f32::from_bits(raw as u32)
}

/// Encode an `f64` into a slot by bit pattern
#[must_use]
pub fn encode_f64(value: f64) -> u64 {
    value.to_bits()
}

/// Decode an `f64` from a slot
#[must_use]
pub fn decode_f64(raw: u64) -> f64 {
    f64::from_bits(raw)
}

/// A typed slot value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Handle into host-managed plugin memory
    Ptr(u64),
}

impl Value {
    /// Type tag of this value
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Ptr(_) => ValueType::Ptr,
        }
    }

    /// Encode into an untyped slot
    #[must_use]
    pub fn encode(self) -> u64 {
        match self {
            Self::I32(v) => encode_i32(v),
            Self::I64(v) => encode_i64(v),
            Self::F32(v) => encode_f32(v),
            Self::F64(v) => encode_f64(v),
            Self::Ptr(v) => v,
        }
    }

    /// Decode an untyped slot as the given type
    #[must_use]
    pub fn decode(ty: ValueType, raw: u64) -> Self {
        match ty {
            ValueType::I32 => Self::I32(decode_i32(raw)),
            ValueType::I64 => Self::I64(decode_i64(raw)),
            ValueType::F32 => Self::F32(decode_f32(raw)),
            ValueType::F64 => Self::F64(decode_f64(raw)),
            ValueType::Ptr => Self::Ptr(raw),
        }
    }

    /// Convert into a wasmtime value
    #[must_use]
    pub fn to_val(self) -> Val {
        match self {
            Self::I32(v) => Val::I32(v),
            Self::I64(v) => Val::I64(v),
            Self::F32(v) => Val::F32(v.to_bits()),
            Self::F64(v) => Val::F64(v.to_bits()),
            Self::Ptr(v) => Val::I64(v as i64),
        }
    }

    /// Convert from a wasmtime value, checked against the declared type
    ///
    /// # Errors
    ///
    /// Returns error if the wasm value cannot carry `ty`
    pub fn from_val(ty: ValueType, val: &Val) -> Result<Self, SlotError> {
        match (ty, val) {
            (ValueType::I32, Val::I32(v)) => Ok(Self::I32(*v)),
            (ValueType::I64, Val::I64(v)) => Ok(Self::I64(*v)),
            (ValueType::Ptr, Val::I64(v)) => Ok(Self::Ptr(*v as u64)),
            (ValueType::F32, Val::F32(bits)) => Ok(Self::F32(f32::from_bits(*bits))),
            (ValueType::F64, Val::F64(bits)) => Ok(Self::F64(f64::from_bits(*bits))),
            _ => Err(SlotError::WasmTypeMismatch {
                expected: ty,
                actual: wasm_type_name(val),
            }),
        }
    }
}

fn wasm_type_name(val: &Val) -> &'static str {
    match val {
        Val::I32(_) => "i32",
        Val::I64(_) => "i64",
        Val::F32(_) => "f32",
        Val::F64(_) => "f64",
        Val::V128(_) => "v128",
        _ => "reference",
    }
}

/// Ordered parameter and result types of a host function
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types, in slot order
    pub params: Vec<ValueType>,
    /// Result types, in slot order
    pub results: Vec<ValueType>,
}

impl Signature {
    /// Create a new signature
    #[must_use]
    pub fn new(params: impl Into<Vec<ValueType>>, results: impl Into<Vec<ValueType>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    /// Number of slots a call with this signature needs
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.params.len().max(self.results.len())
    }

    /// Build the wasmtime function type
    #[must_use]
    pub fn func_type(&self, engine: &Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|t| t.wasm_type()),
            self.results.iter().map(|t| t.wasm_type()),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// Slot access errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// Index outside the declared slots
    #[error("Slot {index} out of range: {declared} declared")]
    OutOfRange { index: usize, declared: usize },

    /// Typed access does not match the declared type
    #[error("Slot {index} is declared {declared}, accessed as {requested}")]
    TypeMismatch {
        index: usize,
        declared: ValueType,
        requested: ValueType,
    },

    /// Wrong number of values for the signature
    #[error("Expected {expected} values, got {actual}")]
    Arity { expected: usize, actual: usize },

    /// Wasm value cannot carry the declared type
    #[error("Wasm value of type {actual} cannot carry {expected}")]
    WasmTypeMismatch {
        expected: ValueType,
        actual: &'static str,
    },
}

/// Fixed-size slot sequence for a single host call
///
/// Parameters are read by their declared parameter types and results are
/// written by their declared result types. Both share the same slots, so
/// slot 0 holds the first argument on entry and the first result on exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    slots: Vec<u64>,
    signature: Signature,
}

impl Stack {
    /// Create a zeroed stack for a signature
    #[must_use]
    pub fn new(signature: Signature) -> Self {
        Self {
            slots: vec![0; signature.slot_count()],
            signature,
        }
    }

    /// Create a stack holding typed parameters
    ///
    /// # Errors
    ///
    /// Returns error if the values do not match the declared parameters
    pub fn with_params(signature: Signature, params: &[Value]) -> Result<Self, SlotError> {
        if params.len() != signature.params.len() {
            return Err(SlotError::Arity {
                expected: signature.params.len(),
                actual: params.len(),
            });
        }
        let mut stack = Self::new(signature);
        for (index, (declared, value)) in stack
            .signature
            .params
            .iter()
            .zip(params.iter())
            .enumerate()
        {
            if *declared != value.value_type() {
                return Err(SlotError::TypeMismatch {
                    index,
                    declared: *declared,
                    requested: value.value_type(),
                });
            }
            stack.slots[index] = value.encode();
        }
        Ok(stack)
    }

    /// Create a stack from the wasm arguments of a call
    ///
    /// # Errors
    ///
    /// Returns error if the arguments do not match the declared parameters
    pub fn from_wasm(signature: Signature, params: &[Val]) -> Result<Self, SlotError> {
        let values = signature
            .params
            .iter()
            .zip(params.iter())
            .map(|(ty, val)| Value::from_val(*ty, val))
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != params.len() {
            return Err(SlotError::Arity {
                expected: signature.params.len(),
                actual: params.len(),
            });
        }
        Self::with_params(signature, &values)
    }

    /// Copy the declared results into wasm return values
    ///
    /// # Errors
    ///
    /// Returns error if `out` does not match the declared result count
    pub fn write_results(&self, out: &mut [Val]) -> Result<(), SlotError> {
        if out.len() != self.signature.results.len() {
            return Err(SlotError::Arity {
                expected: self.signature.results.len(),
                actual: out.len(),
            });
        }
        for (slot, value) in out.iter_mut().zip(self.results()) {
            *slot = value.to_val();
        }
        Ok(())
    }

    /// Declared signature
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stack has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Untyped bits of a slot
    ///
    /// # Errors
    ///
    /// Returns error if `index` is past the last slot
    pub fn raw(&self, index: usize) -> Result<u64, SlotError> {
        self.slots
            .get(index)
            .copied()
            .ok_or(SlotError::OutOfRange {
                index,
                declared: self.slots.len(),
            })
    }

    /// Read a parameter as its declared type
    ///
    /// # Errors
    ///
    /// Returns error if `index` is not a declared parameter
    pub fn get(&self, index: usize) -> Result<Value, SlotError> {
        let ty = self.param_type(index)?;
        Ok(Value::decode(ty, self.slots[index]))
    }

    /// Read a parameter declared `i32`
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn get_i32(&self, index: usize) -> Result<i32, SlotError> {
        self.param(index, ValueType::I32).map(decode_i32)
    }

    /// Read a parameter declared `i64`
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn get_i64(&self, index: usize) -> Result<i64, SlotError> {
        self.param(index, ValueType::I64).map(decode_i64)
    }

    /// Read a parameter declared `f32`
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn get_f32(&self, index: usize) -> Result<f32, SlotError> {
        self.param(index, ValueType::F32).map(decode_f32)
    }

    /// Read a parameter declared `f64`
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn get_f64(&self, index: usize) -> Result<f64, SlotError> {
        self.param(index, ValueType::F64).map(decode_f64)
    }

    /// Read a parameter declared `ptr`
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn get_ptr(&self, index: usize) -> Result<u64, SlotError> {
        self.param(index, ValueType::Ptr)
    }

    /// Write a result, checked against its declared type
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), SlotError> {
        let declared = *self
            .signature
            .results
            .get(index)
            .ok_or(SlotError::OutOfRange {
                index,
                declared: self.signature.results.len(),
            })?;
        if declared != value.value_type() {
            return Err(SlotError::TypeMismatch {
                index,
                declared,
                requested: value.value_type(),
            });
        }
        self.slots[index] = value.encode();
        Ok(())
    }

    /// Write an `i32` result
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<(), SlotError> {
        self.set(index, Value::I32(value))
    }

    /// Write an `i64` result
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<(), SlotError> {
        self.set(index, Value::I64(value))
    }

    /// Write an `f32` result
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set_f32(&mut self, index: usize, value: f32) -> Result<(), SlotError> {
        self.set(index, Value::F32(value))
    }

    /// Write an `f64` result
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<(), SlotError> {
        self.set(index, Value::F64(value))
    }

    /// Write a `ptr` result
    ///
    /// # Errors
    ///
    /// Returns error on an undeclared index or a type mismatch
    pub fn set_ptr(&mut self, index: usize, value: u64) -> Result<(), SlotError> {
        self.set(index, Value::Ptr(value))
    }

    /// Decode the result slots by their declared types
    #[must_use]
    pub fn results(&self) -> Vec<Value> {
        self.signature
            .results
            .iter()
            .zip(self.slots.iter())
            .map(|(ty, raw)| Value::decode(*ty, *raw))
            .collect()
    }

    fn param_type(&self, index: usize) -> Result<ValueType, SlotError> {
        self.signature
            .params
            .get(index)
            .copied()
            .ok_or(SlotError::OutOfRange {
                index,
                declared: self.signature.params.len(),
            })
    }

    fn param(&self, index: usize, requested: ValueType) -> Result<u64, SlotError> {
        let declared = self.param_type(index)?;
        if declared != requested {
            return Err(SlotError::TypeMismatch {
                index,
                declared,
                requested,
            });
        }
        Ok(self.slots[index])
    }
}
