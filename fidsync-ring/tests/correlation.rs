use fidsync_event::{ChannelInfo, ConnectionChange, Update};
use fidsync_ring::{Correlator, CorrelatorConfig, EventRow, RingError};
use fidsync_schema::{FieldKind, ScalarValue, SourceConfig, Timestamp};

/// Ring of 8 slots with a 2 tick window; tick 7 is the bad-fiducial marker
fn correlator(sources: &[(SourceConfig, FieldKind)]) -> Correlator {
    let configs = sources.iter().map(|(c, _)| c.clone()).collect();
    let mut c = Correlator::new(CorrelatorConfig::new(8, 2), configs).unwrap();
    for (id, (_, kind)) in sources.iter().enumerate() {
        c.on_connection_change(&ConnectionChange::connected(id, ChannelInfo::scalar(*kind)))
            .unwrap();
    }
    c
}

fn float(source: usize, v: f64, seconds: u32, ticks: u32) -> Update {
    Update::new(source, ScalarValue::Float(v), Timestamp::new(seconds, ticks))
}

fn int(source: usize, v: i64, seconds: u32, ticks: u32) -> Update {
    Update::new(source, ScalarValue::Int(v), Timestamp::new(seconds, ticks))
}

fn feed(c: &mut Correlator, update: Update) -> Vec<EventRow> {
    c.record_update(&update).unwrap()
}

#[test]
fn test_continuous_and_non_continuous_pair() {
    let mut c = correlator(&[
        (SourceConfig::continuous("A"), FieldKind::Double),
        (SourceConfig::new("B"), FieldKind::Long),
    ]);

    assert!(feed(&mut c, float(0, 1.0, 1, 0)).is_empty());
    assert!(feed(&mut c, int(1, 10, 1, 1)).is_empty());

    // tick 3: slot 0 leaves the window incomplete, slot 1 is still open
    assert!(feed(&mut c, float(0, 2.0, 1, 3)).is_empty());

    // tick 4: the window bound is exclusive, so slot 1 is evaluated here and not at tick 3
    let rows = feed(&mut c, float(0, 3.0, 1, 4));
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.timestamp, Timestamp::new(1, 1));
    assert_eq!(row.pulse_id(), 1);
    assert_eq!(row.value(0), Some(ScalarValue::Float(1.0)));
    assert_eq!(row.value(1), Some(ScalarValue::Int(10)));

    let snap = c.metrics().snapshot();
    assert_eq!(snap.rows_emitted, 1);
    assert_eq!(snap.slots_dropped, 1);
}

#[test]
fn test_carry_forward_and_drain() {
    let mut c = correlator(&[
        (SourceConfig::continuous("A"), FieldKind::Double),
        (SourceConfig::new("B"), FieldKind::Long),
    ]);

    feed(&mut c, float(0, 5.0, 1, 1));
    feed(&mut c, int(1, 1, 1, 2));
    feed(&mut c, int(1, 2, 1, 3));
    assert!(feed(&mut c, int(1, 3, 1, 4)).is_empty());

    // A has been quiet since slot 1: the row carries its last value
    let rows = feed(&mut c, int(1, 4, 1, 5));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values.as_slice(), &[ScalarValue::Float(5.0), ScalarValue::Int(1)]);
    assert_eq!(c.source(0).unwrap().last_slot(), Some(2));

    // A reports again: the gap up to slot 6 is backfilled with the old value
    let rows = feed(&mut c, float(0, 6.0, 1, 6));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, Timestamp::new(1, 3));
    assert_eq!(rows[0].value(0), Some(ScalarValue::Float(5.0)));
    for slot in 3..6 {
        assert_eq!(c.source_value(0, slot), Some(ScalarValue::Float(5.0)));
    }
    assert_eq!(c.source_value(0, 6), Some(ScalarValue::Float(6.0)));

    // same timestamp as the newest one: no time advance, nothing flushed
    assert!(feed(&mut c, int(1, 5, 1, 6)).is_empty());

    let drained = c.drain();
    let got: Vec<_> = drained.iter().map(|r| (r.timestamp.ticks, r.values.to_vec())).collect();
    assert_eq!(
        got,
        vec![
            (4, vec![ScalarValue::Float(5.0), ScalarValue::Int(3)]),
            (5, vec![ScalarValue::Float(5.0), ScalarValue::Int(4)]),
            (6, vec![ScalarValue::Float(6.0), ScalarValue::Int(5)]),
        ]
    );

    // nothing is emitted twice
    assert!(c.drain().is_empty());
}

#[test]
fn test_stale_slot_is_reset_before_recording() {
    let mut c = correlator(&[
        (SourceConfig::new("X"), FieldKind::Long),
        (SourceConfig::new("Y"), FieldKind::Long),
    ]);

    feed(&mut c, int(0, 111, 1, 2));
    assert_eq!(c.slot(2).non_continuous_count, 1);

    // a newer event wraps onto slot 2 before the old one was flushed
    assert!(feed(&mut c, int(1, 20, 2, 10)).is_empty());
    assert_eq!(c.slot(2).timestamp, Some(Timestamp::new(2, 10)));
    assert_eq!(c.slot(2).non_continuous_count, 1);
    assert_eq!(c.source_value(0, 2), None);
    assert_eq!(c.metrics().snapshot().slot_resets, 1);

    feed(&mut c, int(0, 222, 2, 10));
    assert_eq!(c.slot(2).non_continuous_count, 2);

    let rows = feed(&mut c, int(0, 333, 2, 13));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, Timestamp::new(2, 10));
    assert_eq!(rows[0].values.as_slice(), &[ScalarValue::Int(222), ScalarValue::Int(20)]);
}

#[test]
fn test_duplicate_delivery_invalidates_slot() {
    let mut c = correlator(&[(SourceConfig::new("B"), FieldKind::Long)]);

    feed(&mut c, int(0, 1, 1, 2));
    assert_eq!(c.slot(2).non_continuous_count, 1);

    feed(&mut c, int(0, 9, 1, 2));
    assert_eq!(c.slot(2).non_continuous_count, 0);
    // the first value stays in place
    assert_eq!(c.source_value(0, 2), Some(ScalarValue::Int(1)));
    assert_eq!(c.metrics().snapshot().duplicates, 1);

    let rows = feed(&mut c, int(0, 2, 1, 5));
    assert!(rows.is_empty());
    assert_eq!(c.metrics().snapshot().slots_dropped, 1);
}

#[test]
fn test_duplicate_check_only_compares_seconds() {
    let mut c = correlator(&[(SourceConfig::new("B"), FieldKind::Long)]);

    // ticks 2 and 10 share slot 2 within the same second
    feed(&mut c, int(0, 1, 1, 2));
    feed(&mut c, int(0, 2, 1, 10));

    assert_eq!(c.slot(2).timestamp, Some(Timestamp::new(1, 10)));
    assert_eq!(c.slot(2).non_continuous_count, 0);
    assert_eq!(c.metrics().snapshot().duplicates, 1);
}

#[test]
fn test_disconnect_blocks_completion() {
    let mut c = correlator(&[
        (SourceConfig::continuous("A"), FieldKind::Double),
        (SourceConfig::new("B"), FieldKind::Long),
    ]);

    feed(&mut c, float(0, 1.0, 1, 1));
    assert_eq!(c.continuous_ready(), 1);

    c.on_connection_change(&ConnectionChange::disconnected(0)).unwrap();
    assert_eq!(c.continuous_ready(), 0);
    assert_eq!(c.connected_count(), 1);

    assert!(feed(&mut c, int(1, 7, 1, 5)).is_empty());
    assert_eq!(c.slot(5).non_continuous_count, 0);

    c.on_connection_change(&ConnectionChange::connected(0, ChannelInfo::scalar(FieldKind::Double)))
        .unwrap();
    assert_eq!(c.continuous_ready(), 0);

    assert!(feed(&mut c, float(0, 2.0, 1, 6)).is_empty());
    assert_eq!(c.continuous_ready(), 1);

    // slot 5 ages out without its non-continuous contribution
    assert!(feed(&mut c, float(0, 3.0, 2, 0)).is_empty());
    assert!(c.slot(5).retired);
    assert_eq!(c.metrics().snapshot().rows_emitted, 0);
}

#[test]
fn test_rows_follow_ring_order_and_window() {
    let mut c = correlator(&[(SourceConfig::new("B"), FieldKind::Long)]);
    let mut emitted: Vec<Timestamp> = Vec::new();
    let mut fed = 0;

    for seconds in 1..=4u32 {
        for ticks in 0..7u32 {
            let rows = feed(&mut c, int(0, fed, seconds, ticks));
            let now = seconds * 8 + ticks;
            for row in &rows {
                let at = row.timestamp.seconds * 8 + row.timestamp.ticks;
                assert!(now - at >= 2, "slot evaluated inside the window");
            }
            emitted.extend(rows.iter().map(|r| r.timestamp));
            fed += 1;
        }
    }

    // the newest three slots are still inside the window
    assert_eq!(emitted.len(), 25);
    assert!(emitted.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(emitted.first(), Some(&Timestamp::new(1, 0)));
    assert_eq!(emitted.last(), Some(&Timestamp::new(4, 3)));
}

#[test]
fn test_out_of_order_update_does_not_flush() {
    let mut c = correlator(&[
        (SourceConfig::new("X"), FieldKind::Long),
        (SourceConfig::new("Y"), FieldKind::Long),
    ]);

    feed(&mut c, int(0, 1, 1, 1));
    feed(&mut c, int(0, 2, 1, 5));
    let cursor = c.last_flushed();

    // late arrival for an older tick only contributes
    assert!(feed(&mut c, int(1, 3, 1, 4)).is_empty());
    assert_eq!(c.last_flushed(), cursor);
    assert_eq!(c.last_observed(), Some(Timestamp::new(1, 5)));
    assert_eq!(c.slot(4).non_continuous_count, 1);
}

#[test]
fn test_continuous_only_emits_every_occupied_slot() {
    let mut c = correlator(&[(SourceConfig::continuous("A"), FieldKind::Double)]);

    feed(&mut c, float(0, 1.0, 1, 1));
    feed(&mut c, float(0, 2.0, 1, 2));
    feed(&mut c, float(0, 3.0, 1, 3));
    let rows = feed(&mut c, float(0, 4.0, 1, 4));

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, Timestamp::new(1, 1));
    assert_eq!(rows[0].value(0), Some(ScalarValue::Float(1.0)));
}

#[test]
fn test_invalid_connect_is_fatal() {
    let mut c = Correlator::new(
        CorrelatorConfig::new(8, 2),
        vec![SourceConfig::new("WAVE"), SourceConfig::new("NAME")],
    )
    .unwrap();

    let err = c
        .on_connection_change(&ConnectionChange::connected(
            0,
            ChannelInfo {
                field_kind: FieldKind::Double,
                element_count: 1024,
            },
        ))
        .unwrap_err();
    assert!(matches!(err, RingError::NotScalar { element_count: 1024, .. }));
    assert!(err.is_fatal());

    let err = c
        .on_connection_change(&ConnectionChange::connected(1, ChannelInfo::scalar(FieldKind::String)))
        .unwrap_err();
    assert!(matches!(err, RingError::UnsupportedKind { kind: FieldKind::String, .. }));
    assert!(err.is_fatal());
}
