//! Channel value formats

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Data format of every channel of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelFormat {
    /// 32-bit IEEE float
    Float32,
    /// 64-bit IEEE float
    Double64,
    /// Variable-length string or binary blob
    String,
    /// 32-bit signed integer
    Int32,
    /// 16-bit signed integer
    Int16,
    /// 8-bit signed integer
    Int8,
    /// 64-bit signed integer
    Int64,
    /// Not usable for transmission
    #[default]
    Undefined,
}

impl ChannelFormat {
    /// Name used in the stream's XML description
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelFormat::Float32 => "float32",
            ChannelFormat::Double64 => "double64",
            ChannelFormat::String => "string",
            ChannelFormat::Int32 => "int32",
            ChannelFormat::Int16 => "int16",
            ChannelFormat::Int8 => "int8",
            ChannelFormat::Int64 => "int64",
            ChannelFormat::Undefined => "undefined",
        }
    }

    /// Bytes per value on the wire; 0 for variable-length and undefined
    pub fn value_size(&self) -> usize {
        match self {
            ChannelFormat::Float32 | ChannelFormat::Int32 => 4,
            ChannelFormat::Double64 | ChannelFormat::Int64 => 8,
            ChannelFormat::Int16 => 2,
            ChannelFormat::Int8 => 1,
            ChannelFormat::String | ChannelFormat::Undefined => 0,
        }
    }

    /// Whether values are fixed-size numbers
    pub fn is_numeric(&self) -> bool {
        self.value_size() > 0
    }

    /// Whether values carry their own length prefix
    pub fn is_variable_length(&self) -> bool {
        *self == ChannelFormat::String
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "float32" => Ok(ChannelFormat::Float32),
            "double64" => Ok(ChannelFormat::Double64),
            "string" => Ok(ChannelFormat::String),
            "int32" => Ok(ChannelFormat::Int32),
            "int16" => Ok(ChannelFormat::Int16),
            "int8" => Ok(ChannelFormat::Int8),
            "int64" => Ok(ChannelFormat::Int64),
            "undefined" => Ok(ChannelFormat::Undefined),
            other => Err(Error::argument(format!("unknown channel format: {}", other))),
        }
    }
}
