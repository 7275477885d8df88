//! Fidsync Core
//!
//! Plumbing around the correlator: the event bus that owns it, row output,
//! source list and settings loading, and the update log used for recording
//! and replay.

pub mod eventbus;
pub mod output;
pub mod replay;
pub mod settings;
pub mod source_list;

/// Re-export common types
pub use eventbus::{BusError, BusReport, EventBus, EventBusConfig, EventBusHandle, PublishError};
pub use output::{format_header, format_row, MemorySink, OutputError, RowSink, RowWriter};
pub use replay::{replay, LogRecord, ReplayStats, UpdateLog, UpdateLogError};
pub use settings::{Settings, SettingsError};
pub use source_list::{load_source_list, parse_source_list, SourceListError};

use ahash::AHashMap;
use fidsync_schema::{SourceConfig, SourceId};

/// Name -> id index matching the registration order of `sources`
pub fn source_index(sources: &[SourceConfig]) -> AHashMap<String, SourceId> {
    sources
        .iter()
        .enumerate()
        .map(|(id, source)| (source.name.clone(), id))
        .collect()
}
