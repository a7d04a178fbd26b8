//! Closed, tagged enumeration of the element types a topic may declare.
//!
//! A closed enum with explicit `element_size`/`name`/`parse`, rather than a
//! string name resolved against a numeric library at runtime — the element
//! types a topic can declare are fixed and known at compile time.

use crate::error::{FrameBusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size in bytes of one element.
    pub fn element_size(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I16 => 2,
            DType::I32 => 4,
            DType::I64 => 8,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// The wire/metadata name, one of the closed set in §6.
    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Parses a dtype name, failing loudly (`UnsupportedDtype`) on anything
    /// outside the closed set rather than guessing.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "uint8" => Ok(DType::U8),
            "int16" => Ok(DType::I16),
            "int32" => Ok(DType::I32),
            "int64" => Ok(DType::I64),
            "float32" => Ok(DType::F32),
            "float64" => Ok(DType::F64),
            other => Err(FrameBusError::UnsupportedDtype(other.to_string())),
        }
    }
}
