// Fidsync Ring - fiducial event correlation engine
//
// This crate implements the correlator that turns independent, timestamped
// scalar updates into one row per fiducial tick. It handles:
// - A fixed ring of event slots indexed by the low tick bits
// - Continuous sources (last value carried forward) and non-continuous
//   sources (must report for every emitted event)
// - Stale slot takeover and duplicate delivery suppression
// - A trailing output window that emits complete slots in ring order
// - Connection tracking that gates completion on continuous readiness

mod engine;
mod metrics;
mod slots;
mod source;

pub use engine::{Correlator, CorrelatorConfig, DEFAULT_OUTPUT_DELAY, DEFAULT_RING_SIZE};
pub use metrics::{CorrelatorMetrics, DropReason, MetricsSnapshot};
pub use slots::{EventSlot, SlotClaim, SlotStore};
pub use source::SourceState;

use fidsync_schema::{FieldKind, ScalarKind, ScalarValue, SourceId, Timestamp};
use smallvec::SmallVec;
use thiserror::Error;

/// Errors that can occur in the correlator
#[derive(Debug, Error)]
pub enum RingError {
    #[error("Invalid correlator configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("Unknown source id: {0}")]
    UnknownSource(SourceId),

    #[error("{source_name}: bad transport status {code}")]
    BadStatus { source_name: String, code: i32 },

    #[error("{source_name}: update arrived before the channel connected")]
    NotConnected { source_name: String },

    #[error("{source_name}: type = {actual}, count = {count} -> expected type = {expected}, count = 1")]
    TypeMismatch {
        source_name: String,
        expected: ScalarKind,
        actual: ScalarKind,
        count: u32,
    },

    #[error("{source_name} is not a scalar (element count {element_count})")]
    NotScalar {
        source_name: String,
        element_count: u32,
    },

    #[error("{source_name} is not a double or int (field kind {kind})")]
    UnsupportedKind { source_name: String, kind: FieldKind },
}

impl RingError {
    /// Configuration errors end the run; everything else drops one update
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RingError::InvalidConfig(_)
                | RingError::DuplicateSource(_)
                | RingError::NotScalar { .. }
                | RingError::UnsupportedKind { .. }
        )
    }
}

/// Result type for correlator operations
pub type RingResult<T> = Result<T, RingError>;

/// A completed event: one value per source, in registration order
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    /// Timestamp of the event that owned the slot
    pub timestamp: Timestamp,

    /// Ring slot the row was built from
    pub slot: usize,

    /// Values in source registration order
    pub values: SmallVec<[ScalarValue; 8]>,
}

impl EventRow {
    /// Pulse id column (low 16 tick bits)
    pub fn pulse_id(&self) -> u32 {
        self.timestamp.pulse_id()
    }

    /// Value of the source registered at `id`
    pub fn value(&self, id: SourceId) -> Option<ScalarValue> {
        self.values.get(id).copied()
    }
}
