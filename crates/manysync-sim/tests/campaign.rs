//! Campaigns under faults that actually lose messages.

use manysync_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use manysync_sim::oracle::ConvergenceOracle;
use manysync_sim::rng::SimRng;
use manysync_sim::{FaultConfig, HubMode, SimulationConfig, Simulator};
use proptest::prelude::*;

fn hostile() -> FaultConfig {
    FaultConfig {
        max_delay_rounds: 3,
        drop_rate_percent: 20,
        duplicate_rate_percent: 15,
        reorder_rate_percent: 25,
        partition_rate_percent: 15,
    }
}

fn campaign(seeds: std::ops::Range<u64>, hub_mode: HubMode, fault: FaultConfig) -> CampaignConfig {
    CampaignConfig {
        seeds,
        simulation: SimulationConfig {
            peer_count: 4,
            rounds: 24,
            hub_mode,
            fault,
            ..SimulationConfig::default()
        },
    }
}

#[test]
fn default_faults_never_break_convergence() {
    let report = run_campaign(&campaign(0..40, HubMode::Buffered, FaultConfig::default()))
        .expect("campaign");
    assert_eq!(report.seeds_run, 40);
    assert!(
        report.all_passed(),
        "first failure at {:?}: {:?}",
        report.first_failure,
        report.failures.first()
    );
}

#[test]
fn hostile_network_in_every_hub_mode() {
    for mode in [HubMode::PerMessage, HubMode::Buffered, HubMode::Coalesced] {
        let report = run_campaign(&campaign(100..120, mode, hostile())).expect("campaign");
        assert!(report.all_passed(), "{mode}: {:?}", report.failures.first());
        assert!(report.interesting_states_reached > 0, "{mode}: no faults hit");
    }
}

#[test]
fn replayed_failure_matches_the_campaign_verdict() {
    let config = campaign(7..8, HubMode::Buffered, hostile());
    let report = run_campaign(&config).expect("campaign");
    let detail = replay_seed(7, &config).expect("replay");
    assert_eq!(report.all_passed(), detail.oracle.passed);
    assert!(!detail.result.trace.is_empty());
}

#[test]
fn drain_recovers_from_a_lossy_start() {
    let config = SimulationConfig {
        seed: 99,
        peer_count: 6,
        rounds: 40,
        edit_rate_percent: 50,
        fault: hostile(),
        ..SimulationConfig::default()
    };
    let result = Simulator::new(config).expect("valid").run().expect("run");
    assert!(result.stats.dropped > 0);
    assert!(result.quiesced);

    let verdict = ConvergenceOracle::check_all(&result, &mut SimRng::new(1));
    assert!(verdict.passed, "{:?}", verdict.violations);
    let hub = result.hub().expect("hub outcome");
    for (actor, seq) in &result.authored {
        assert_eq!(hub.doc.clock().get(actor), *seq, "{actor}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_seed_converges(
        seed in any::<u64>(),
        peers in 1usize..6,
        mode in prop_oneof![
            Just(HubMode::PerMessage),
            Just(HubMode::Buffered),
            Just(HubMode::Coalesced),
        ],
    ) {
        let config = SimulationConfig {
            seed,
            peer_count: peers,
            rounds: 16,
            hub_mode: mode,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("valid").run().expect("run");
        let verdict = ConvergenceOracle::check_all(&result, &mut SimRng::new(seed));
        prop_assert!(verdict.passed, "{:?}", verdict.violations);
    }
}
