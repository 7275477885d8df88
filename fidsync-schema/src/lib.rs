//! Fidsync Schema
//!
//! Shared vocabulary for the fiducial event builder: timestamps carrying the
//! hardware timing tick, the scalar kinds a source may publish, and the static
//! per-source configuration read at startup.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Index of a source in registration order
pub type SourceId = usize;

/// Mask selecting the pulse id printed in every emitted row
pub const PULSE_ID_MASK: u32 = 0xffff;

// ============================================================================
// Timestamps
// ============================================================================

/// Update timestamp as delivered by the timing system.
///
/// The low bits of `ticks` carry the fiducial counter shared by all sources,
/// so two updates with the same `ticks` low bits belong to the same pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds past the timing-system epoch
    pub seconds: u32,

    /// Sub-second field; its low bits are the fiducial tick
    pub ticks: u32,
}

impl Timestamp {
    /// Create a new timestamp
    pub const fn new(seconds: u32, ticks: u32) -> Self {
        Self { seconds, ticks }
    }

    /// Ring slot owned by this timestamp for a ring of `mask + 1` slots
    #[inline]
    pub fn slot_index(&self, mask: u32) -> usize {
        (self.ticks & mask) as usize
    }

    /// The all-ones slot is the timing system's marker for a bad fiducial
    #[inline]
    pub fn is_invalid_tick(&self, mask: u32) -> bool {
        self.ticks & mask == mask
    }

    /// Pulse id column of an emitted row
    #[inline]
    pub fn pulse_id(&self) -> u32 {
        self.ticks & PULSE_ID_MASK
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.ticks.cmp(&other.ticks))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08x}", self.seconds, self.ticks)
    }
}

// ============================================================================
// Value kinds
// ============================================================================

/// Scalar kinds a source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// 16-bit integer (also used for enumerations)
    Short,
    /// 32-bit integer
    Long,
    /// 64-bit float
    Double,
}

impl ScalarKind {
    /// Whether values of this kind are formatted as integers
    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarKind::Short | ScalarKind::Long)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Short => write!(f, "short"),
            ScalarKind::Long => write!(f, "long"),
            ScalarKind::Double => write!(f, "double"),
        }
    }
}

/// Native field kind a channel reports when it connects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Short,
    Long,
    Double,
    Enum,
    Float,
    Char,
    String,
}

impl FieldKind {
    /// Scalar kind used to subscribe to a field of this kind.
    ///
    /// Enumerations are read as shorts. Returns `None` for kinds the
    /// builder cannot put in a row.
    pub fn resolve(&self) -> Option<ScalarKind> {
        match self {
            FieldKind::Short | FieldKind::Enum => Some(ScalarKind::Short),
            FieldKind::Long => Some(ScalarKind::Long),
            FieldKind::Double => Some(ScalarKind::Double),
            FieldKind::Float | FieldKind::Char | FieldKind::String => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Short => "short",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Enum => "enum",
            FieldKind::Float => "float",
            FieldKind::Char => "char",
            FieldKind::String => "string",
        };
        f.write_str(name)
    }
}

/// A single scalar sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
}

impl ScalarValue {
    /// Check that the value representation fits the scalar kind
    pub fn matches(&self, kind: ScalarKind) -> bool {
        match self {
            ScalarValue::Int(_) => kind.is_integer(),
            ScalarValue::Float(_) => kind == ScalarKind::Double,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{:.5}", v),
        }
    }
}

/// Completion status attached to an update by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    #[default]
    Ok,
    Error(i32),
}

impl UpdateStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, UpdateStatus::Ok)
    }
}

// ============================================================================
// Source configuration
// ============================================================================

/// How a source participates in event completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Always has a value: gaps are filled with the last value seen
    Continuous,
    /// Must report for every event that is emitted
    NonContinuous,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Continuous => write!(f, "continuous"),
            SourceMode::NonContinuous => write!(f, "non-continuous"),
        }
    }
}

/// Static configuration of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, unique across the configuration
    pub name: String,

    /// Participation mode
    pub mode: SourceMode,

    /// Log every accepted update of this source
    pub trace: bool,
}

impl SourceConfig {
    /// Create a non-continuous, untraced source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: SourceMode::NonContinuous,
            trace: false,
        }
    }

    /// Create a continuous source
    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name).with_mode(SourceMode::Continuous)
    }

    /// Set the participation mode
    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build a source from a name and a flag string.
    ///
    /// `C`/`c` marks the source continuous and `T`/`t` enables tracing.
    /// Unknown flag characters are ignored.
    pub fn from_flags(name: impl Into<String>, flags: &str) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(SchemaError::InvalidSourceName(name));
        }

        let mut config = Self::new(name);
        for flag in flags.chars() {
            match flag {
                'C' | 'c' => config.mode = SourceMode::Continuous,
                'T' | 't' => config.trace = true,
                _ => {}
            }
        }
        Ok(config)
    }

    pub fn is_continuous(&self) -> bool {
        self.mode == SourceMode::Continuous
    }
}

/// Schema errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid source name: {0:?}")]
    InvalidSourceName(String),
}
