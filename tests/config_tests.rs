#![allow(missing_docs)]
#![allow(clippy::float_cmp)]

use landgen::simulation::error::ConfigurationError;
use landgen::simulation::migration::Backend;
use landgen::simulation::params::{CapacityConfig, SimulationConfig};
use landgen::simulation::sampling::SamplingMode;
use landgen::simulation::simulator::TimeGrid;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const PATCHY_CONFIG: &str = r#"{
    "name": "patchy",
    "landscape": {
        "rows": 2,
        "cols": 3,
        "resolution": 10.0,
        "habitat": [1.0, null, 2.0, 0.0, 1.0, 1.0],
        "carrying_capacity": { "type": "habitat_scaled", "scale": 5.0 }
    },
    "genotypes": { "type": "clonal", "genotypes": ["red", "blue"] },
    "initial_abundance": [3.0, 1.0],
    "prob_seed": { "type": "constant", "value": 0.5 },
    "fecundity": { "type": "per_genotype", "values": [2.0, 3.0] },
    "prob_germination": {
        "type": "soft_selection",
        "r0": 0.6,
        "competition": {
            "shape": { "type": "uniform" },
            "scale": 10.0,
            "radius": 10.0,
            "normalize": 1.0
        },
        "fitness": [1.0, 0.8]
    },
    "prob_survival": { "type": "constant", "value": 0.7 },
    "pollen_kernel": {
        "shape": { "type": "inverse_power", "exponent": 2.0 },
        "scale": 10.0,
        "radius": 20.0,
        "normalize": 1.0,
        "steps": [0.5]
    },
    "seed_kernel": null,
    "time_grid": [0.0, 1.5, 3.0],
    "summaries": ["total_abundance"],
    "seed": 7,
    "backend": "raster",
    "sampling": "expected"
}"#;

#[test]
fn test_default_config_builds_and_runs() {
    let mut config = SimulationConfig::default();
    config.time_grid = TimeGrid::generations(3);
    let mut scenario = config.build().unwrap();
    assert_eq!(scenario.population.domain().n_habitable(), 100);
    assert_eq!(scenario.population.genotypes(), ["aa", "aA", "AA"]);
    assert!(scenario.demography.is_bound_to(scenario.population.domain()));

    let mut rng = ChaCha8Rng::seed_from_u64(scenario.seed);
    let trajectory = scenario
        .simulator
        .simulate(
            &mut scenario.population,
            &scenario.demography,
            scenario.carrying_capacity.view(),
            &scenario.time_grid,
            &scenario.summaries,
            &mut rng,
        )
        .unwrap();
    assert_eq!(trajectory.len(), 4);
    assert_eq!(trajectory.summaries.len(), 3);
}

#[test]
fn test_default_config_json_round_trip() {
    let config = SimulationConfig::default();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let parsed: SimulationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_parse_patchy_config() {
    let config: SimulationConfig = serde_json::from_str(PATCHY_CONFIG).unwrap();
    assert_eq!(config.backend, Backend::Raster);
    assert_eq!(config.sampling, SamplingMode::Expected);
    assert_eq!(config.log_every, 10);

    let scenario = config.build().unwrap();
    let domain = scenario.population.domain();
    assert_eq!(domain.n_accessible(), 5);
    assert_eq!(domain.n_habitable(), 4);
    assert_eq!(scenario.carrying_capacity.to_vec(), vec![5.0, 10.0, 5.0, 5.0]);
    assert_eq!(scenario.population.total(), 16.0);
    assert!(scenario.demography.seed_migration().template().is_none());
    assert_eq!(
        scenario
            .demography
            .pollen_migration()
            .template()
            .and_then(|t| t.steps())
            .map(<[f64]>::to_vec),
        Some(vec![0.5])
    );
}

#[test]
fn test_patchy_config_runs_on_raster_backend() {
    let config: SimulationConfig = serde_json::from_str(PATCHY_CONFIG).unwrap();
    let mut scenario = config.build().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(scenario.seed);
    let trajectory = scenario
        .simulator
        .simulate(
            &mut scenario.population,
            &scenario.demography,
            scenario.carrying_capacity.view(),
            &scenario.time_grid,
            &scenario.summaries,
            &mut rng,
        )
        .unwrap();
    assert_eq!(trajectory.generations, vec![0, 1, 3]);
    assert!(
        trajectory
            .snapshots
            .iter()
            .all(|s| s.iter().all(|&v| v >= 0.0))
    );
}

#[test]
fn test_explicit_log_interval_overrides_default() {
    let quiet = PATCHY_CONFIG.replace(r#""seed": 7,"#, r#""seed": 7, "log_every": 0,"#);
    let config: SimulationConfig = serde_json::from_str(&quiet).unwrap();
    assert_eq!(config.log_every, 0);
    assert_eq!(config.build().unwrap().simulator.log_every, 0);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let mut config = SimulationConfig::default();
    config.summaries.push("heterozygosity".to_string());
    assert!(matches!(
        config.build(),
        Err(ConfigurationError::UnknownSummary(name)) if name == "heterozygosity"
    ));

    let mut config = SimulationConfig::default();
    config.landscape.habitat = Some(vec![Some(1.0); 3]);
    assert!(matches!(config.build(), Err(ConfigurationError::InvalidDomain(_))));

    let mut config = SimulationConfig::default();
    config.landscape.carrying_capacity = CapacityConfig::PerCell { values: vec![1.0; 7] };
    assert!(matches!(
        config.build(),
        Err(ConfigurationError::CarryingCapacityShape { expected: 100, found: 7 })
    ));

    let mut config = SimulationConfig::default();
    config.initial_abundance = vec![1.0];
    assert!(matches!(config.build(), Err(ConfigurationError::AbundanceShape { .. })));

    assert!(serde_json::from_str::<TimeGrid>("[2.0, 1.0]").is_err());
}

#[test]
fn test_config_file_round_trip() {
    let config: SimulationConfig = serde_json::from_str(PATCHY_CONFIG).unwrap();
    let path = std::env::temp_dir().join("landgen_config_round_trip.json");
    config.save_to_file(&path).unwrap();
    let loaded = SimulationConfig::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, config);
}
