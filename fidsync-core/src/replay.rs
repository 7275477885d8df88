//! Update Log
//!
//! Records source traffic to a JSON-lines file and replays it into the
//! event bus. The first line is a header, each following line one record:
//!
//! ```text
//! {"magic":"FSYN","version":1,"record_count":3}
//! {"op":"connect","source":"DET:CHARGE","field_kind":"long","element_count":1}
//! {"op":"update","source":"DET:CHARGE","kind":"long","value":{"int":42},"timestamp":{"seconds":7,"ticks":12}}
//! {"op":"disconnect","source":"DET:CHARGE"}
//! ```
//!
//! Records are keyed by source name so a log stays usable when the source
//! list is reordered.

use crate::eventbus::{EventBusHandle, PublishError};
use ahash::AHashMap;
use fidsync_event::{ChannelInfo, ConnectionChange, SourceEvent, Update};
use fidsync_schema::{FieldKind, ScalarKind, ScalarValue, SourceId, Timestamp, UpdateStatus};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Update log errors
#[derive(Debug, Error)]
pub enum UpdateLogError {
    #[error("Cannot open update log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// First line of every update log
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogHeader {
    magic: String,
    version: u32,
    record_count: u64,
}

impl LogHeader {
    const MAGIC: &'static str = "FSYN";
    const CURRENT_VERSION: u32 = 1;

    fn new(record_count: u64) -> Self {
        Self {
            magic: Self::MAGIC.to_string(),
            version: Self::CURRENT_VERSION,
            record_count,
        }
    }

    fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::CURRENT_VERSION
    }
}

fn default_count() -> u32 {
    1
}

/// One recorded source event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Connect {
        source: String,
        field_kind: FieldKind,
        #[serde(default = "default_count")]
        element_count: u32,
    },
    Disconnect {
        source: String,
    },
    Update {
        source: String,
        kind: ScalarKind,
        #[serde(default = "default_count")]
        count: u32,
        value: ScalarValue,
        timestamp: Timestamp,
        #[serde(default)]
        status: UpdateStatus,
    },
}

impl LogRecord {
    /// Healthy scalar update; the kind follows the value
    pub fn update(source: impl Into<String>, value: ScalarValue, timestamp: Timestamp) -> Self {
        let kind = match value {
            ScalarValue::Int(_) => ScalarKind::Long,
            ScalarValue::Float(_) => ScalarKind::Double,
        };
        LogRecord::Update {
            source: source.into(),
            kind,
            count: 1,
            value,
            timestamp,
            status: UpdateStatus::Ok,
        }
    }

    /// Scalar channel connect
    pub fn connect(source: impl Into<String>, field_kind: FieldKind) -> Self {
        LogRecord::Connect {
            source: source.into(),
            field_kind,
            element_count: 1,
        }
    }

    pub fn disconnect(source: impl Into<String>) -> Self {
        LogRecord::Disconnect {
            source: source.into(),
        }
    }

    /// Name of the source the record belongs to
    pub fn source(&self) -> &str {
        match self {
            LogRecord::Connect { source, .. }
            | LogRecord::Disconnect { source }
            | LogRecord::Update { source, .. } => source,
        }
    }

    /// Human readable line; updates print as `SECONDS.TICKS` in hex
    pub fn dump_line(&self) -> String {
        match self {
            LogRecord::Connect {
                source,
                field_kind,
                element_count,
            } => format!("connect {} {} x{}", source, field_kind, element_count),
            LogRecord::Disconnect { source } => format!("disconnect {}", source),
            LogRecord::Update {
                source,
                value,
                timestamp,
                status,
                ..
            } => {
                let mut line = format!(
                    "{:08x}.{:08x} {} {}",
                    timestamp.seconds, timestamp.ticks, source, value
                );
                if let UpdateStatus::Error(code) = status {
                    line.push_str(&format!(" (status {})", code));
                }
                line
            }
        }
    }

    /// Convert into a bus event for the given source id
    pub fn to_event(&self, id: SourceId) -> SourceEvent {
        match self {
            LogRecord::Connect {
                field_kind,
                element_count,
                ..
            } => ConnectionChange::connected(
                id,
                ChannelInfo {
                    field_kind: *field_kind,
                    element_count: *element_count,
                },
            )
            .into(),
            LogRecord::Disconnect { .. } => ConnectionChange::disconnected(id).into(),
            LogRecord::Update {
                kind,
                count,
                value,
                timestamp,
                status,
                ..
            } => Update {
                source: id,
                kind: *kind,
                count: *count,
                value: *value,
                timestamp: *timestamp,
                status: *status,
            }
            .into(),
        }
    }
}

/// Reader and writer for update log files
pub struct UpdateLog;

impl UpdateLog {
    const MAX_PREALLOC: usize = 1 << 16;

    /// Write records to a new log file
    pub fn write(path: impl AsRef<Path>, records: &[LogRecord]) -> Result<(), UpdateLogError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| UpdateLogError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let header = LogHeader::new(records.len() as u64);
        let line = serde_json::to_string(&header)
            .map_err(|source| UpdateLogError::Json { line: 1, source })?;
        writeln!(writer, "{}", line)?;

        for (i, record) in records.iter().enumerate() {
            let line = serde_json::to_string(record)
                .map_err(|source| UpdateLogError::Json { line: i + 2, source })?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        info!(path = %path.display(), count = records.len(), "Wrote update log");
        Ok(())
    }

    /// Read every record of a log file
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, UpdateLogError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| UpdateLogError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();

        let first = lines
            .next()
            .ok_or_else(|| UpdateLogError::InvalidFormat("missing header".to_string()))??;
        let header: LogHeader = serde_json::from_str(&first)
            .map_err(|source| UpdateLogError::Json { line: 1, source })?;
        if !header.is_valid() {
            return Err(UpdateLogError::InvalidFormat(format!(
                "unexpected magic {:?} or version {}",
                header.magic, header.version
            )));
        }

        // the header count is only a hint
        let hint = usize::try_from(header.record_count).unwrap_or(0);
        let mut records = Vec::with_capacity(hint.min(Self::MAX_PREALLOC));
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|source| UpdateLogError::Json { line: i + 2, source })?;
            records.push(record);
        }

        if records.len() as u64 != header.record_count {
            warn!(
                expected = header.record_count,
                found = records.len(),
                "Update log record count does not match header"
            );
        }

        info!(path = %path.display(), count = records.len(), "Read update log");
        Ok(records)
    }
}

/// Replay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records published to the bus
    pub published: u64,

    /// Records naming a source outside the index
    pub skipped: u64,
}

/// Publish records into the bus in file order.
///
/// `index` maps source names to the ids the correlator was built with;
/// records for other names are skipped.
pub async fn replay(
    records: &[LogRecord],
    handle: &EventBusHandle,
    index: &AHashMap<String, SourceId>,
) -> Result<ReplayStats, UpdateLogError> {
    let mut stats = ReplayStats::default();

    for record in records {
        let Some(&id) = index.get(record.source()) else {
            if stats.skipped == 0 {
                warn!(source = %record.source(), "Skipping records of unknown source");
            }
            stats.skipped += 1;
            continue;
        };

        handle.publish(record.to_event(id)).await?;
        stats.published += 1;

        if stats.published % 10000 == 0 {
            debug!(published = stats.published, "Replay progress");
        }
    }

    info!(published = stats.published, skipped = stats.skipped, "Replay completed");
    Ok(stats)
}
