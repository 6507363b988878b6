use chrono::{Duration, TimeZone};

use super::*;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
}

fn epoch(start: u32, end: u32, relays: Vec<Relay>) -> ConsensusEpoch {
    ConsensusEpoch::new(at(start), at(end), PositionWeights::uniform(), relays)
}

fn relay(raw: u32, flags: &[Flag]) -> Relay {
    Relay::new(RelayId::new(raw), 100, RelayFlags::from_flags(flags))
}

#[test]
fn test_epoch_lookup_clips_overlapping_validity() {
    let catalog = RelayCatalog::from_epochs(vec![
        epoch(1, 4, vec![relay(2, &[Flag::Guard])]),
        epoch(0, 3, vec![relay(1, &[Flag::Guard])]),
    ])
    .unwrap();

    let first = catalog.epoch_for(at(0)).unwrap();
    assert_eq!(first.valid_after(), at(0));
    assert_eq!(first.coverage_end(), at(1));

    let second = catalog.epoch_for(at(2)).unwrap();
    assert_eq!(second.valid_after(), at(1));
    assert!(second.relay(RelayId::new(2)).is_some());
    assert!(second.relay(RelayId::new(1)).is_none());
}

#[test]
fn test_time_outside_coverage_is_unavailable() {
    let catalog = RelayCatalog::from_epochs(vec![epoch(0, 2, vec![]), epoch(3, 5, vec![])]).unwrap();

    let before = at(0) - Duration::minutes(1);
    assert_eq!(
        catalog.epoch_for(before).unwrap_err(),
        CatalogError::DataUnavailable { time: before }
    );
    assert!(catalog.epoch_for(at(2)).is_err());
    assert!(catalog.epoch_for(at(5)).is_err());
    assert!(catalog.epoch_for(at(4)).is_ok());
}

#[test]
fn test_ensure_covers_detects_gaps() {
    let catalog = RelayCatalog::from_epochs(vec![
        epoch(0, 2, vec![]),
        epoch(2, 4, vec![]),
        epoch(5, 6, vec![]),
    ])
    .unwrap();

    assert!(catalog.ensure_covers(at(0), at(4)).is_ok());
    assert_eq!(
        catalog.ensure_covers(at(1), at(6)).unwrap_err(),
        CatalogError::DataUnavailable { time: at(4) }
    );
    assert_eq!(catalog.epochs_between(at(1), at(3)).count(), 2);
}

#[test]
fn test_invalid_epochs_are_rejected() {
    assert_eq!(RelayCatalog::from_epochs(vec![]).unwrap_err(), CatalogError::Empty);
    assert!(matches!(
        RelayCatalog::single(epoch(3, 3, vec![])),
        Err(CatalogError::InvalidEpoch { .. })
    ));
    assert!(matches!(
        RelayCatalog::from_epochs(vec![epoch(0, 1, vec![]), epoch(0, 2, vec![])]),
        Err(CatalogError::InvalidEpoch { .. })
    ));
}

#[test]
fn test_relays_with_flags_is_ordered_by_id() {
    let catalog = RelayCatalog::single(epoch(
        0,
        1,
        vec![
            relay(9, &[Flag::Guard, Flag::Exit]),
            relay(3, &[Flag::Exit]),
            relay(5, &[Flag::Guard]),
        ],
    ))
    .unwrap();
    let epoch = catalog.epoch_for(at(0)).unwrap();

    let exits: Vec<u32> = catalog
        .relays_with_flags(epoch, RelayFlags::empty().with(Flag::Exit))
        .iter()
        .map(|relay| relay.id.as_u32())
        .collect();
    assert_eq!(exits, vec![3, 9]);
    assert_eq!(catalog.distinct_relays(), 3);
}

#[test]
fn test_bandwidth_weights_map_to_positions() {
    let weights: BTreeMap<String, i64> = [("Wgg", 5852), ("Wgd", 4130), ("Wme", 0), ("Wed", 4130)]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    let weights = PositionWeights::from_bandwidth_weights(&weights);

    let guard = RelayFlags::from_flags(&[Flag::Guard]);
    let exit = RelayFlags::from_flags(&[Flag::Exit]);
    let both = RelayFlags::from_flags(&[Flag::Guard, Flag::Exit]);

    assert!((weights.weight(guard, Position::Guard) - 0.5852).abs() < 1e-12);
    assert!((weights.weight(both, Position::Guard) - 0.413).abs() < 1e-12);
    assert_eq!(weights.weight(exit, Position::Middle), 0.0);
    assert_eq!(weights.weight(exit, Position::Exit), 1.0);
    assert!((weights.weight(both, Position::Exit) - 0.413).abs() < 1e-12);
}

#[test]
fn test_position_eligibility() {
    let required = RelayFlags::from_flags(&[Flag::Valid, Flag::Running]);
    let exit = relay(1, &[Flag::Exit, Flag::Valid, Flag::Running]);
    let bad_exit = relay(2, &[Flag::Exit, Flag::BadExit, Flag::Valid, Flag::Running]);
    let not_running = relay(3, &[Flag::Guard, Flag::Valid]);

    assert!(Position::Exit.admits(&exit, required));
    assert!(!Position::Exit.admits(&bad_exit, required));
    assert!(Position::Middle.admits(&bad_exit, required));
    assert!(!Position::Guard.admits(&not_running, required));
    assert!(Position::Guard.admits(&not_running, RelayFlags::empty()));
}
