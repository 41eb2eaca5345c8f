//! Seed campaigns.
//!
//! Runs the same simulation over a range of seeds, checks every result with
//! the oracle, and remembers the first failing seed so it can be replayed
//! with full detail.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::rng::SimRng;
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Salt separating the oracle's shuffles from the run's own stream.
const ORACLE_SALT: u64 = 0x0AC1_E5A1_7000_0000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Seeds to run, e.g. `0..100`.
    pub seeds: Range<u64>,
    /// Settings shared by every seed; its own `seed` is ignored.
    pub simulation: SimulationConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seeds: 0..100,
            simulation: SimulationConfig::default(),
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            ..self.simulation.clone()
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or the shared simulation
    /// settings are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            bail!("seeds must not be empty");
        }
        self.simulation.validate()
    }
}

/// Read a campaign from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_campaign_config(path: &Path) -> Result<CampaignConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: CampaignConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid campaign config in {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First failing seed, the one to replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that lost messages or partitioned a peer.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A single seed with everything needed to debug it.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in `config`.
///
/// # Errors
///
/// Returns an error if validation fails or a simulation cannot be built.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seeds.clone() {
        let detail = run_seed(seed, config)?;
        report.seeds_run += 1;
        if detail.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if detail.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = detail.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: detail
                    .oracle
                    .violations
                    .iter()
                    .map(InvariantViolation::to_string)
                    .collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        first_failure = ?report.first_failure,
        "campaign complete"
    );
    Ok(report)
}

/// Replay one seed with its full trace and oracle verdict.
///
/// # Errors
///
/// Returns an error if validation fails or the simulation cannot be built.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    run_seed(seed, config)
}

fn run_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let mut oracle_rng = SimRng::new(seed ^ ORACLE_SALT);
    let oracle = ConvergenceOracle::check_all(&result, &mut oracle_rng);
    Ok(DetailedTrace { result, oracle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::FaultConfig;

    fn small(seeds: Range<u64>, fault: FaultConfig) -> CampaignConfig {
        CampaignConfig {
            seeds,
            simulation: SimulationConfig {
                peer_count: 3,
                rounds: 16,
                fault,
                ..SimulationConfig::default()
            },
        }
    }

    #[test]
    fn default_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_seed_range_is_rejected() {
        let config = CampaignConfig {
            seeds: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(run_campaign(&config).is_err());
    }

    #[test]
    fn per_seed_config_overrides_only_the_seed() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.peer_count, config.simulation.peer_count);
        assert_eq!(sim.fault, config.simulation.fault);
    }

    #[test]
    fn lossless_campaign_passes() {
        let fault = FaultConfig {
            drop_rate_percent: 0,
            partition_rate_percent: 0,
            ..FaultConfig::default()
        };
        let report = run_campaign(&small(0..10, fault)).expect("campaign");
        assert_eq!(report.seeds_run, 10);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert_eq!(report.interesting_states_reached, 0);
    }

    #[test]
    fn unresolved_divergence_fails_every_seed() {
        let config = CampaignConfig {
            seeds: 0..3,
            simulation: SimulationConfig {
                peer_count: 2,
                rounds: 1,
                edit_rate_percent: 100,
                hub_edit_rate_percent: 0,
                drain_attempts: 0,
                fault: FaultConfig {
                    drop_rate_percent: 100,
                    ..FaultConfig::default()
                },
                ..SimulationConfig::default()
            },
        };
        let report = run_campaign(&config).expect("campaign");
        assert_eq!(report.seeds_passed, 0);
        assert_eq!(report.first_failure, Some(0));
        assert!(
            report.failures[0]
                .violations
                .iter()
                .any(|v| v.starts_with("NotQuiescent")),
            "{:?}",
            report.failures[0]
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let config = small(0..1, FaultConfig::default());
        let first = replay_seed(7, &config).expect("replay");
        let second = replay_seed(7, &config).expect("replay");
        assert_eq!(first.result.trace, second.result.trace);
        assert_eq!(first.result.stats, second.result.stats);
        assert_eq!(first.oracle, second.oracle);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = CampaignReport {
            seeds_run: 10,
            seeds_passed: 9,
            first_failure: Some(7),
            failures: vec![SeedFailure {
                seed: 7,
                violations: vec!["NotQuiescent: traffic never settled".into()],
            }],
            interesting_states_reached: 5,
        };
        let json = serde_json::to_string(&report).expect("encode");
        assert!(json.contains("\"seeds_run\":10"));
        assert!(json.contains("\"first_failure\":7"));
    }

    #[test]
    fn campaign_file_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("campaign.toml");
        std::fs::write(
            &path,
            r#"
            [seeds]
            start = 3
            end = 6

            [simulation]
            peer_count = 2
            hub_mode = "coalesced"
            "#,
        )
        .expect("write");

        let config = load_campaign_config(&path).expect("load");
        assert_eq!(config.seeds, 3..6);
        assert_eq!(config.simulation.peer_count, 2);
        assert!(load_campaign_config(&dir.path().join("missing.toml")).is_err());
    }
}
