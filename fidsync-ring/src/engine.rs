// Correlator - update ingestion, completion scheduling and lifecycle tracking
//
// The correlator is driven by exactly one caller at a time. Updates are
// recorded into the slot owning their tick; every time the newest observed
// timestamp advances, the scheduler walks the ring from the last evaluated
// slot up to the trailing edge of the output window and emits the slots that
// completed.

use crate::metrics::{CorrelatorMetrics, DropReason};
use crate::slots::SlotStore;
use crate::source::SourceState;
use crate::{EventRow, RingError, RingResult};
use ahash::AHashMap;
use fidsync_event::{ConnectionChange, ConnectionState, Update};
use fidsync_schema::{SourceConfig, SourceId, Timestamp};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Default ring capacity (one slot per 16-bit fiducial)
pub const DEFAULT_RING_SIZE: usize = 65536;

/// Default output window, in ticks (half a second at 360 Hz)
pub const DEFAULT_OUTPUT_DELAY: usize = 180;

/// Configuration for the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Number of slots in the ring; must be a power of two
    pub ring_size: usize,

    /// Ticks a slot stays open for stragglers before it is evaluated
    pub output_delay: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            output_delay: DEFAULT_OUTPUT_DELAY,
        }
    }
}

impl CorrelatorConfig {
    pub fn new(ring_size: usize, output_delay: usize) -> Self {
        Self {
            ring_size,
            output_delay,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> RingResult<()> {
        if self.ring_size < 2 || !self.ring_size.is_power_of_two() {
            return Err(RingError::InvalidConfig(format!(
                "ring_size must be a power of two >= 2, got {}",
                self.ring_size
            )));
        }
        if u32::try_from(self.ring_size - 1).is_err() {
            return Err(RingError::InvalidConfig(format!(
                "ring_size must fit the 32-bit tick field, got {}",
                self.ring_size
            )));
        }
        if self.output_delay == 0 || self.output_delay >= self.ring_size {
            return Err(RingError::InvalidConfig(format!(
                "output_delay must be in 1..{}, got {}",
                self.ring_size, self.output_delay
            )));
        }
        Ok(())
    }
}

/// Fiducial event correlator
#[derive(Debug)]
pub struct Correlator {
    config: CorrelatorConfig,

    slots: SlotStore,

    /// Sources in registration order
    sources: Vec<SourceState>,

    /// Name -> id lookup
    names: AHashMap<String, SourceId>,

    connected_count: usize,
    continuous_ready: usize,
    continuous_total: usize,
    non_continuous_total: usize,

    /// Next slot the scheduler will evaluate; `None` before the first update
    last_flushed: Option<usize>,

    /// Newest timestamp seen so far
    last_observed: Option<Timestamp>,

    metrics: Arc<CorrelatorMetrics>,
}

impl Correlator {
    /// Create a correlator for a fixed, ordered set of sources
    pub fn new(config: CorrelatorConfig, sources: Vec<SourceConfig>) -> RingResult<Self> {
        config.validate()?;
        if sources.is_empty() {
            return Err(RingError::InvalidConfig(
                "at least one source is required".to_string(),
            ));
        }

        let mut names = AHashMap::with_capacity(sources.len());
        let mut states = Vec::with_capacity(sources.len());
        let mut continuous_total = 0;

        for (id, source) in sources.into_iter().enumerate() {
            if names.insert(source.name.clone(), id).is_some() {
                return Err(RingError::DuplicateSource(source.name));
            }
            if source.is_continuous() {
                continuous_total += 1;
            }
            debug!(source = %source.name, mode = %source.mode, trace = source.trace, "Registering source");
            states.push(SourceState::new(source, config.ring_size));
        }

        let non_continuous_total = states.len() - continuous_total;
        info!(
            sources = states.len(),
            continuous = continuous_total,
            non_continuous = non_continuous_total,
            ring_size = config.ring_size,
            output_delay = config.output_delay,
            "Correlator initialized"
        );

        Ok(Self {
            config,
            slots: SlotStore::new(config.ring_size),
            sources: states,
            names,
            connected_count: 0,
            continuous_ready: 0,
            continuous_total,
            non_continuous_total,
            last_flushed: None,
            last_observed: None,
            metrics: Arc::new(CorrelatorMetrics::new()),
        })
    }

    // =========================================================================
    // UPDATE INGESTION
    // =========================================================================

    /// Record one update and return any rows it completed.
    ///
    /// Rejected updates leave the correlator untouched and return the
    /// reason; none of them are fatal.
    pub fn record_update(&mut self, update: &Update) -> RingResult<Vec<EventRow>> {
        if let Err(e) = self.validate_update(update) {
            self.metrics.record_drop(DropReason::Rejected);
            warn!(error = %e, "Dropping update");
            return Err(e);
        }

        let mask = self.slots.mask();
        let timestamp = update.timestamp;
        if timestamp.is_invalid_tick(mask) {
            self.metrics.record_drop(DropReason::InvalidTick);
            trace!(source = update.source, %timestamp, "Skipping bad fiducial");
            return Ok(Vec::new());
        }

        let idx = timestamp.slot_index(mask);
        let source = &self.sources[update.source];
        if source.config().trace {
            info!(
                target: "fidsync::trace",
                source = %source.name(),
                value = %update.value,
                %timestamp,
                slot = idx,
                "update"
            );
        }

        let claim = self.slots.claim(idx, timestamp);
        if claim.needs_reset() {
            for source in &mut self.sources {
                source.clear_present(idx);
            }
            if let crate::SlotClaim::Recycled { previous } = claim {
                self.metrics.record_slot_reset();
                trace!(slot = idx, %previous, %timestamp, "Discarding stale event");
            }
        }

        let all_continuous_ready = self.continuous_ready == self.continuous_total;
        let source = &mut self.sources[update.source];

        if source.is_duplicate(idx, timestamp.seconds) {
            self.slots.invalidate(idx);
            self.metrics.record_drop(DropReason::Duplicate);
            debug!(source = %source.name(), %timestamp, slot = idx, "Duplicate time stamp");
            return Ok(Vec::new());
        }

        source.record(idx, update.value, timestamp.seconds);

        if source.is_continuous() {
            if source.mark_valued() {
                self.continuous_ready += 1;
                debug!(
                    source = %source.name(),
                    ready = self.continuous_ready,
                    total = self.continuous_total,
                    "Continuous source has a value"
                );
            }
            let filled = source.advance_continuous(idx, update.value, mask as usize);
            self.metrics.record_backfill(filled);
        } else if all_continuous_ready {
            let count = self.slots.count_contribution(idx);
            trace!(slot = idx, count, "Non-continuous contribution");
        }

        self.metrics.record_accepted();
        Ok(self.advance(timestamp))
    }

    fn validate_update(&self, update: &Update) -> RingResult<()> {
        let source = self
            .sources
            .get(update.source)
            .ok_or(RingError::UnknownSource(update.source))?;

        if let fidsync_schema::UpdateStatus::Error(code) = update.status {
            return Err(RingError::BadStatus {
                source_name: source.name().to_string(),
                code,
            });
        }

        let expected = source.kind().ok_or_else(|| RingError::NotConnected {
            source_name: source.name().to_string(),
        })?;

        if update.kind != expected || update.count != 1 || !update.value.matches(expected) {
            return Err(RingError::TypeMismatch {
                source_name: source.name().to_string(),
                expected,
                actual: update.kind,
                count: update.count,
            });
        }

        Ok(())
    }

    // =========================================================================
    // COMPLETION & FLUSH SCHEDULING
    // =========================================================================

    /// Note `now` as observed and flush the window if time moved forward
    fn advance(&mut self, now: Timestamp) -> Vec<EventRow> {
        let target = self
            .slots
            .behind(now.slot_index(self.slots.mask()), self.config.output_delay);

        let rows = match (self.last_flushed, self.last_observed) {
            (None, _) => {
                self.last_flushed = Some(target);
                debug!(slot = target, %now, "Output window opened");
                Vec::new()
            }
            (Some(_), Some(last)) if now > last => self.flush_until(target),
            _ => Vec::new(),
        };

        self.last_observed = Some(self.last_observed.map_or(now, |last| last.max(now)));
        rows
    }

    /// Evaluate every slot from the scheduler cursor up to (excluding) `end`
    fn flush_until(&mut self, end: usize) -> Vec<EventRow> {
        let mut rows = Vec::new();
        let Some(mut cursor) = self.last_flushed else {
            return rows;
        };

        while cursor != end {
            if let Some(row) = self.evaluate(cursor) {
                rows.push(row);
            }
            cursor = self.slots.next(cursor);
        }

        self.last_flushed = Some(cursor);
        rows
    }

    /// Decide the fate of one slot leaving the window
    fn evaluate(&mut self, idx: usize) -> Option<EventRow> {
        let slot = self.slots.get(idx);
        if !slot.is_occupied() || slot.retired {
            return None;
        }

        let row = if self.is_complete(idx) {
            self.emit(idx)
        } else {
            trace!(
                slot = idx,
                count = slot.non_continuous_count,
                needed = self.non_continuous_total,
                "Dropping incomplete event"
            );
            None
        };

        if row.is_none() {
            self.metrics.record_slot_dropped();
        }
        self.slots.retire(idx);
        row
    }

    /// Completion predicate for slot `idx`
    pub fn is_complete(&self, idx: usize) -> bool {
        let slot = self.slots.get(idx);
        slot.is_occupied()
            && !slot.retired
            && self.continuous_ready == self.continuous_total
            && slot.non_continuous_count == self.non_continuous_total
    }

    fn emit(&mut self, idx: usize) -> Option<EventRow> {
        let timestamp = self.slots.get(idx).timestamp?;
        let mut values = SmallVec::with_capacity(self.sources.len());

        for source in &mut self.sources {
            if source.is_continuous() {
                source.carry_into(idx);
            }
            match source.value_at(idx) {
                Some(value) => values.push(value),
                None => {
                    warn!(source = %source.name(), slot = idx, %timestamp, "Complete event is missing a value");
                    return None;
                }
            }
        }

        self.metrics.record_row();
        debug!(slot = idx, %timestamp, "Emitting event");
        Some(EventRow {
            timestamp,
            slot: idx,
            values,
        })
    }

    /// Evaluate everything still inside the output window.
    ///
    /// The normal scheduler never looks at the newest `output_delay` slots;
    /// callers that want them at shutdown opt in by calling this.
    pub fn drain(&mut self) -> Vec<EventRow> {
        let Some(last) = self.last_observed else {
            return Vec::new();
        };
        let end = self.slots.next(last.slot_index(self.slots.mask()));
        let rows = self.flush_until(end);
        info!(rows = rows.len(), "Drained output window");
        rows
    }

    // =========================================================================
    // CONNECTION / LIFECYCLE TRACKING
    // =========================================================================

    /// Apply a connection state change.
    ///
    /// A channel that is not a supported scalar is a configuration error:
    /// the returned error is fatal and the run must stop.
    pub fn on_connection_change(&mut self, change: &ConnectionChange) -> RingResult<()> {
        let total = self.sources.len();
        let source = self
            .sources
            .get_mut(change.source)
            .ok_or(RingError::UnknownSource(change.source))?;

        match change.state {
            ConnectionState::Connected(info) => {
                if source.set_connected(true) {
                    self.connected_count += 1;
                }

                if info.element_count != 1 {
                    error!(source = %source.name(), element_count = info.element_count, "Source is not a scalar");
                    return Err(RingError::NotScalar {
                        source_name: source.name().to_string(),
                        element_count: info.element_count,
                    });
                }

                let kind = info.field_kind.resolve().ok_or_else(|| {
                    error!(source = %source.name(), kind = %info.field_kind, "Unsupported field kind");
                    RingError::UnsupportedKind {
                        source_name: source.name().to_string(),
                        kind: info.field_kind,
                    }
                })?;

                source.set_kind(kind);
                info!(source = %source.name(), %kind, connected = self.connected_count, "Source connected");
                if self.connected_count == total {
                    info!("All sources are connected");
                }
            }
            ConnectionState::Disconnected => {
                if source.set_connected(false) {
                    self.connected_count -= 1;
                }
                if source.is_continuous() && source.clear_valued() {
                    self.continuous_ready -= 1;
                    warn!(
                        source = %source.name(),
                        ready = self.continuous_ready,
                        total = self.continuous_total,
                        "Continuous source lost, completion blocked until it reports again"
                    );
                } else {
                    info!(source = %source.name(), "Source disconnected");
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Look up a source id by name
    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.names.get(name).copied()
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceState> {
        self.sources.get(id)
    }

    pub fn sources(&self) -> &[SourceState] {
        &self.sources
    }

    /// Source names in registration (row) order
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Value a source currently holds for slot `idx`
    pub fn source_value(&self, id: SourceId, idx: usize) -> Option<fidsync_schema::ScalarValue> {
        self.sources.get(id).and_then(|s| s.value_at(idx))
    }

    pub fn slot(&self, idx: usize) -> &crate::EventSlot {
        self.slots.get(idx)
    }

    pub fn connected_count(&self) -> usize {
        self.connected_count
    }

    pub fn continuous_ready(&self) -> usize {
        self.continuous_ready
    }

    pub fn continuous_total(&self) -> usize {
        self.continuous_total
    }

    pub fn non_continuous_total(&self) -> usize {
        self.non_continuous_total
    }

    /// Next slot the scheduler will evaluate
    pub fn last_flushed(&self) -> Option<usize> {
        self.last_flushed
    }

    pub fn last_observed(&self) -> Option<Timestamp> {
        self.last_observed
    }

    pub fn metrics(&self) -> Arc<CorrelatorMetrics> {
        Arc::clone(&self.metrics)
    }
}
