//! Trace and span identifiers

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 128-bit trace identifier split in two halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Parse a hex trace id of 1 to 32 digits, upper or lower case
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        if s.is_empty() || s.len() > 32 {
            return Err(IdError::Length {
                kind: "trace",
                value: s.to_string(),
            });
        }
        // ids are sliced by byte offset below
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(IdError::InvalidHex {
                kind: "trace",
                value: s.to_string(),
                reason: format!("unexpected character '{}'", c),
            });
        }

        let (high, low) = if s.len() > 16 {
            let split = s.len() - 16;
            (parse_hex_u64(&s[..split], "trace")?, parse_hex_u64(&s[split..], "trace")?)
        } else {
            (0, parse_hex_u64(s, "trace")?)
        };

        Ok(Self { high, low })
    }

    /// Canonical lowercase, zero-padded hex form
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        if s.is_empty() || s.len() > 16 {
            return Err(IdError::Length {
                kind: "span",
                value: s.to_string(),
            });
        }
        parse_hex_u64(s, "span").map(SpanId)
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_hex_u64(s: &str, kind: &'static str) -> Result<u64, IdError> {
    u64::from_str_radix(s, 16).map_err(|e| IdError::InvalidHex {
        kind,
        value: s.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} id '{value}' has an invalid length")]
    Length { kind: &'static str, value: String },

    #[error("{kind} id '{value}' is not valid hex: {reason}")]
    InvalidHex {
        kind: &'static str,
        value: String,
        reason: String,
    },
}
