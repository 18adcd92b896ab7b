use kindsync::core::error::SyncError;
use kindsync::plugins::network::{
    BatteryLevel, FileProbe, NETWORK_STATE_FILE, NetworkConditionMonitor, NetworkProbe,
    NetworkQuality, NetworkState, StaticProbe, SyncStrategy, derive_strategy,
};
use std::fs;
use tempfile::tempdir;

const QUALITIES: [NetworkQuality; 4] = [
    NetworkQuality::Poor,
    NetworkQuality::Low,
    NetworkQuality::Medium,
    NetworkQuality::High,
];
const BATTERIES: [BatteryLevel; 4] = [
    BatteryLevel::Critical,
    BatteryLevel::Low,
    BatteryLevel::Normal,
    BatteryLevel::High,
];

fn all_states() -> Vec<NetworkState> {
    let mut states = Vec::new();
    for connected in [false, true] {
        for metered in [false, true] {
            for quality in QUALITIES {
                for battery in BATTERIES {
                    states.push(NetworkState {
                        connected,
                        quality,
                        metered,
                        battery,
                        observed_at: 0,
                    });
                }
            }
        }
    }
    states
}

#[test]
fn derivation_is_deterministic() {
    for state in all_states() {
        let first = derive_strategy(&state);
        for _ in 0..5 {
            assert_eq!(derive_strategy(&state), first);
        }
        let mut later = state;
        later.observed_at = 99_999;
        assert_eq!(derive_strategy(&later), first, "observation time must not matter");
    }
}

#[test]
fn offline_or_critical_battery_disables_sync() {
    for state in all_states() {
        if !state.connected || state.battery == BatteryLevel::Critical {
            assert_eq!(derive_strategy(&state), SyncStrategy::Disabled, "{:?}", state);
        } else {
            assert_ne!(derive_strategy(&state), SyncStrategy::Disabled, "{:?}", state);
        }
    }
}

#[test]
fn aggressive_requires_unmetered_high_quality_and_healthy_battery() {
    for state in all_states() {
        if derive_strategy(&state) == SyncStrategy::Aggressive {
            assert!(state.connected && !state.metered);
            assert_eq!(state.quality, NetworkQuality::High);
            assert!(state.battery >= BatteryLevel::Normal);
        }
    }
}

#[test]
fn low_battery_on_metered_is_minimal() {
    let state = NetworkState {
        connected: true,
        quality: NetworkQuality::High,
        metered: true,
        battery: BatteryLevel::Low,
        observed_at: 0,
    };
    assert_eq!(derive_strategy(&state), SyncStrategy::Minimal);
}

#[test]
fn monitor_follows_pushed_events() {
    let start = NetworkState {
        connected: true,
        quality: NetworkQuality::High,
        metered: false,
        battery: BatteryLevel::High,
        observed_at: 0,
    };
    let monitor = NetworkConditionMonitor::new(Box::new(StaticProbe::new(start)));
    assert!(monitor.last_observation().is_none());
    assert_eq!(monitor.refresh().1, SyncStrategy::Aggressive);

    let offline = NetworkState::offline(10);
    assert_eq!(monitor.on_event(offline).1, SyncStrategy::Disabled);
    assert_eq!(monitor.last_observation(), Some((offline, SyncStrategy::Disabled)));
}

#[test]
fn file_probe_round_trips_and_failing_probe_reads_offline() {
    let tmp = tempdir().expect("tempdir");
    let probe = FileProbe::new(tmp.path());
    let state = NetworkState {
        connected: true,
        quality: NetworkQuality::Low,
        metered: true,
        battery: BatteryLevel::Normal,
        observed_at: 5,
    };
    probe.write(&state).unwrap();
    assert_eq!(probe.observe().unwrap(), state);

    fs::write(tmp.path().join(NETWORK_STATE_FILE), "not json").unwrap();
    assert!(matches!(probe.observe(), Err(SyncError::JsonError(_))));

    let monitor = NetworkConditionMonitor::new(Box::new(FileProbe::new(tmp.path())));
    let (observed, strategy) = monitor.refresh();
    assert!(!observed.connected);
    assert_eq!(strategy, SyncStrategy::Disabled);
}

#[test]
fn scheduler_constraints_follow_strategy() {
    assert!(SyncStrategy::Aggressive.constraints().requires_unmetered);
    assert!(!SyncStrategy::Minimal.constraints().requires_unmetered);
    assert!(SyncStrategy::Conservative.constraints().requires_battery_not_low);
    for strategy in [
        SyncStrategy::Aggressive,
        SyncStrategy::Moderate,
        SyncStrategy::Conservative,
        SyncStrategy::Minimal,
        SyncStrategy::Disabled,
    ] {
        assert!(strategy.constraints().requires_network);
    }
}

#[test]
fn network_state_wire_shape() {
    let json = serde_json::to_value(NetworkState::offline(7)).unwrap();
    assert_eq!(json["connected"], false);
    assert_eq!(json["quality"], "poor");
    assert_eq!(json["battery"], "normal");
    assert_eq!(json["observedAt"], 7);
}
