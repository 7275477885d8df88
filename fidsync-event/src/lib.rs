//! Fidsync Event Model
//!
//! Messages delivered by the transport layer to the correlator: value
//! updates and connection state changes. Both arrive one at a time on the
//! same queue, so they share the `SourceEvent` envelope.

use fidsync_schema::*;
use serde::{Deserialize, Serialize};

/// A single value update from one source
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Source that produced the update
    pub source: SourceId,

    /// Kind the transport delivered the value as
    pub kind: ScalarKind,

    /// Element count reported by the transport (1 for a scalar)
    pub count: u32,

    /// The sample itself
    pub value: ScalarValue,

    /// Timing-system timestamp of the sample
    pub timestamp: Timestamp,

    /// Transport status
    pub status: UpdateStatus,
}

impl Update {
    /// Create a healthy scalar update whose kind is inferred from the value
    pub fn new(source: SourceId, value: ScalarValue, timestamp: Timestamp) -> Self {
        let kind = match value {
            ScalarValue::Int(_) => ScalarKind::Long,
            ScalarValue::Float(_) => ScalarKind::Double,
        };
        Self {
            source,
            kind,
            count: 1,
            value,
            timestamp,
            status: UpdateStatus::Ok,
        }
    }

    /// Override the delivered kind
    pub fn with_kind(mut self, kind: ScalarKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the transport status
    pub fn with_status(mut self, status: UpdateStatus) -> Self {
        self.status = status;
        self
    }

    /// Create an update builder
    pub fn builder() -> UpdateBuilder {
        UpdateBuilder::default()
    }
}

/// Update builder for convenient construction
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    source: Option<SourceId>,
    kind: Option<ScalarKind>,
    count: Option<u32>,
    value: Option<ScalarValue>,
    timestamp: Option<Timestamp>,
    status: UpdateStatus,
}

impl UpdateBuilder {
    /// Set the source
    pub fn source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the delivered kind
    pub fn kind(mut self, kind: ScalarKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the element count
    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the value
    pub fn value(mut self, value: ScalarValue) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the timestamp
    pub fn timestamp(mut self, seconds: u32, ticks: u32) -> Self {
        self.timestamp = Some(Timestamp::new(seconds, ticks));
        self
    }

    /// Set the transport status
    pub fn status(mut self, status: UpdateStatus) -> Self {
        self.status = status;
        self
    }

    /// Build the update
    pub fn build(self) -> Result<Update, BuildError> {
        Ok(Update {
            source: self.source.ok_or(BuildError::MissingField("source"))?,
            kind: self.kind.ok_or(BuildError::MissingField("kind"))?,
            count: self.count.unwrap_or(1),
            value: self.value.ok_or(BuildError::MissingField("value"))?,
            timestamp: self.timestamp.ok_or(BuildError::MissingField("timestamp"))?,
            status: self.status,
        })
    }
}

/// Channel description reported when a source connects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Native field kind of the channel
    pub field_kind: FieldKind,

    /// Number of elements the channel carries
    pub element_count: u32,
}

impl ChannelInfo {
    /// A single-element channel of the given kind
    pub fn scalar(field_kind: FieldKind) -> Self {
        Self {
            field_kind,
            element_count: 1,
        }
    }
}

/// Connection state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected(ChannelInfo),
    Disconnected,
}

/// A connection state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    pub source: SourceId,
    pub state: ConnectionState,
}

impl ConnectionChange {
    /// Source came up with the given channel description
    pub fn connected(source: SourceId, info: ChannelInfo) -> Self {
        Self {
            source,
            state: ConnectionState::Connected(info),
        }
    }

    /// Source went away
    pub fn disconnected(source: SourceId) -> Self {
        Self {
            source,
            state: ConnectionState::Disconnected,
        }
    }
}

/// Anything the transport hands to the correlator
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Update(Update),
    Connection(ConnectionChange),
}

impl From<Update> for SourceEvent {
    fn from(update: Update) -> Self {
        SourceEvent::Update(update)
    }
}

impl From<ConnectionChange> for SourceEvent {
    fn from(change: ConnectionChange) -> Self {
        SourceEvent::Connection(change)
    }
}

/// Error building an update
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_builder() {
        let update = Update::builder()
            .source(2)
            .kind(ScalarKind::Short)
            .value(ScalarValue::Int(42))
            .timestamp(100, 0x1_0005)
            .build()
            .unwrap();

        assert_eq!(update.source, 2);
        assert_eq!(update.kind, ScalarKind::Short);
        assert_eq!(update.count, 1);
        assert_eq!(update.timestamp, Timestamp::new(100, 0x1_0005));
        assert!(update.status.is_ok());
    }

    #[test]
    fn test_update_builder_missing_field() {
        let result = Update::builder().source(0).kind(ScalarKind::Long).build();
        assert!(matches!(result, Err(BuildError::MissingField("value"))));
    }

    #[test]
    fn test_update_new_infers_kind() {
        let int = Update::new(0, ScalarValue::Int(1), Timestamp::new(0, 1));
        assert_eq!(int.kind, ScalarKind::Long);

        let float = Update::new(0, ScalarValue::Float(1.0), Timestamp::new(0, 1));
        assert_eq!(float.kind, ScalarKind::Double);
    }

    #[test]
    fn test_source_event_from() {
        let event: SourceEvent = ConnectionChange::disconnected(3).into();
        assert!(matches!(
            event,
            SourceEvent::Connection(ConnectionChange {
                source: 3,
                state: ConnectionState::Disconnected
            })
        ));
    }
}

// Re-export fidsync_schema for convenience
pub use fidsync_schema;
