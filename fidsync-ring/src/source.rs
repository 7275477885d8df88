// Source state
//
// Per-source arrays aligned with the slot ring plus the carry-forward state
// of continuous sources. The arrays are overwritten as the ring wraps; they
// are not a history.

use fidsync_schema::{ScalarKind, ScalarValue, SourceConfig, SourceMode};

/// Runtime state of one registered source
#[derive(Debug, Clone)]
pub struct SourceState {
    config: SourceConfig,

    /// Kind resolved when the channel connected
    kind: Option<ScalarKind>,

    connected: bool,

    /// Continuous sources only: reported since the last (re)connect
    has_ever_valued: bool,

    last_value: Option<ScalarValue>,
    last_slot: Option<usize>,

    values: Vec<ScalarValue>,
    seconds_tags: Vec<Option<u32>>,
    present: Vec<bool>,
}

impl SourceState {
    pub fn new(config: SourceConfig, capacity: usize) -> Self {
        Self {
            config,
            kind: None,
            connected: false,
            has_ever_valued: false,
            last_value: None,
            last_slot: None,
            values: vec![ScalarValue::Int(0); capacity],
            seconds_tags: vec![None; capacity],
            present: vec![false; capacity],
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_continuous(&self) -> bool {
        self.config.mode == SourceMode::Continuous
    }

    pub fn kind(&self) -> Option<ScalarKind> {
        self.kind
    }

    pub fn has_ever_valued(&self) -> bool {
        self.has_ever_valued
    }

    pub fn last_value(&self) -> Option<ScalarValue> {
        self.last_value
    }

    pub fn last_slot(&self) -> Option<usize> {
        self.last_slot
    }

    /// Value recorded for slot `idx`, if present
    #[inline]
    pub fn value_at(&self, idx: usize) -> Option<ScalarValue> {
        self.present[idx].then(|| self.values[idx])
    }

    #[inline]
    pub fn has_value(&self, idx: usize) -> bool {
        self.present[idx]
    }

    /// Seconds tag of the last update written into slot `idx`
    #[inline]
    pub fn seconds_tag(&self, idx: usize) -> Option<u32> {
        self.seconds_tags[idx]
    }

    pub(crate) fn set_kind(&mut self, kind: ScalarKind) {
        self.kind = Some(kind);
    }

    /// Returns true on an actual transition
    pub(crate) fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }

    /// Returns true the first time the source reports
    pub(crate) fn mark_valued(&mut self) -> bool {
        !std::mem::replace(&mut self.has_ever_valued, true)
    }

    /// Returns true if the source had reported
    pub(crate) fn clear_valued(&mut self) -> bool {
        std::mem::replace(&mut self.has_ever_valued, false)
    }

    #[inline]
    pub(crate) fn clear_present(&mut self, idx: usize) {
        self.present[idx] = false;
    }

    /// This source already wrote slot `idx` during `seconds`
    #[inline]
    pub(crate) fn is_duplicate(&self, idx: usize, seconds: u32) -> bool {
        self.seconds_tags[idx] == Some(seconds)
    }

    pub(crate) fn record(&mut self, idx: usize, value: ScalarValue, seconds: u32) {
        self.values[idx] = value;
        self.seconds_tags[idx] = Some(seconds);
        self.present[idx] = true;
    }

    /// Fill every slot strictly between the last reported slot and `idx`
    /// with the last reported value, then make `value` at `idx` the new
    /// last value. Returns the number of slots filled.
    pub(crate) fn advance_continuous(&mut self, idx: usize, value: ScalarValue, mask: usize) -> u64 {
        let mut filled = 0;
        if let (Some(last_slot), Some(last_value)) = (self.last_slot, self.last_value) {
            let mut i = (last_slot + 1) & mask;
            while i != idx {
                self.values[i] = last_value;
                self.present[i] = true;
                filled += 1;
                i = (i + 1) & mask;
            }
        }
        self.last_value = Some(value);
        self.last_slot = Some(idx);
        filled
    }

    /// Give slot `idx` the last known value if it has none.
    ///
    /// Used at emission time for continuous sources that have been quiet
    /// since before the slot.
    pub(crate) fn carry_into(&mut self, idx: usize) -> bool {
        if self.present[idx] {
            return false;
        }
        match self.last_value {
            Some(value) => {
                self.values[idx] = value;
                self.present[idx] = true;
                self.last_slot = Some(idx);
                true
            }
            None => false,
        }
    }
}
