#![allow(missing_docs)]
#![allow(clippy::float_cmp)]

use std::sync::Arc;

use landgen::simulation::demography::{Demography, VitalRates};
use landgen::simulation::error::{ConfigurationError, SimulationError, Stage};
use landgen::simulation::generation::GenerationEngine;
use landgen::simulation::geometry::{RasterGeometry, SpatialDomain};
use landgen::simulation::kernel::Kernel;
use landgen::simulation::mating::MatingTensor;
use landgen::simulation::migration::{Backend, MigrationOperator};
use landgen::simulation::population::Population;
use landgen::simulation::sampling::SamplingMode;
use landgen::simulation::simulator::{Simulator, Summary, TimeGrid, Trajectory};
use landgen::simulation::vital_rate::{RateParameters, VitalRate};
use ndarray::{Array1, array};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Two cells, no reproduction, survival 1/2: in expectation the abundance
/// halves every generation.
fn halving_setup() -> (Population, Demography) {
    let domain = Arc::new(SpatialDomain::full(RasterGeometry::new(1, 2, 1.0).unwrap()).unwrap());
    let genotypes = vec!["x".to_string(), "y".to_string()];
    let population =
        Population::new(domain, genotypes.clone(), array![[8.0, 0.0], [0.0, 16.0]]).unwrap();
    let demography = Demography::new(
        "halving",
        genotypes,
        MatingTensor::clonal(2).unwrap(),
        VitalRates {
            prob_seed: VitalRate::constant(0.0),
            fecundity: VitalRate::constant(0.0),
            prob_germination: VitalRate::constant(0.0),
            prob_survival: VitalRate::constant(0.5),
        },
        MigrationOperator::Identity,
        MigrationOperator::Identity,
    )
    .unwrap();
    (population, demography)
}

fn expected_simulator() -> Simulator {
    Simulator {
        engine: GenerationEngine::new(Backend::Matrix, SamplingMode::Expected),
        log_every: 1,
    }
}

#[test]
fn test_time_points_map_to_generations() {
    let (mut population, demography) = halving_setup();
    let grid = TimeGrid::new(vec![0.0, 0.5, 1.0, 2.7, 3.0]).unwrap();
    let trajectory = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &grid,
            &[Summary::genotype_totals(), Summary::total_abundance()],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap();

    assert_eq!(trajectory.generations, vec![0, 0, 1, 2, 3]);
    assert_eq!(trajectory.len(), 5);
    assert_eq!(trajectory.snapshots[0], trajectory.snapshots[1]);
    assert_eq!(trajectory.snapshots[3], array![[2.0, 0.0], [0.0, 4.0]]);

    let totals = trajectory.summary("total_abundance").unwrap();
    let totals: Vec<f64> = totals.iter().map(|t| t[0]).collect();
    assert_eq!(totals, vec![24.0, 24.0, 12.0, 6.0, 3.0]);
    assert_eq!(
        trajectory.summary("genotype_totals").unwrap()[2],
        array![4.0, 8.0]
    );

    // the population ends in the final state
    assert_eq!(population.abundance(), &array![[1.0, 0.0], [0.0, 2.0]]);
}

#[test]
fn test_failing_summary_reports_generation() {
    let (mut population, demography) = halving_setup();
    let picky = Summary::new("picky", |n| {
        if n.sum() < 10.0 {
            Err("too few individuals".to_string())
        } else {
            Ok(Array1::from_elem(1, n.sum()))
        }
    });
    let err = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &TimeGrid::generations(4),
            &[picky],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    match err {
        SimulationError::Summary {
            generation, name, ..
        } => {
            assert_eq!(generation, 2);
            assert_eq!(name, "picky");
        }
        other => panic!("expected a summary failure, got {other:?}"),
    }
}

#[test]
fn test_failing_generation_reports_stage_and_index() {
    let (mut population, mut demography) = halving_setup();
    demography.rates_mut().prob_germination =
        VitalRate::function("fragile", RateParameters::default(), |_, ctx| {
            if ctx.abundance.sum() < 20.0 {
                return Err(ConfigurationError::MissingParameter {
                    rate: "fragile".to_string(),
                    parameter: "density".to_string(),
                }
                .into());
            }
            Ok(ndarray::Array2::zeros(ctx.abundance.dim()))
        });

    let err = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &TimeGrid::generations(5),
            &[],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    match err {
        SimulationError::Generation { generation, source } => {
            assert_eq!(generation, 2);
            assert_eq!(source.stage, Stage::Germination);
        }
        other => panic!("expected a generation failure, got {other:?}"),
    }
}

#[test]
fn test_configuration_errors_surface_before_running() {
    let (mut population, demography) = halving_setup();
    let original = population.abundance().clone();
    let err = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0].view(),
            &TimeGrid::generations(3),
            &[],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Configuration(ConfigurationError::CarryingCapacityShape { .. })
    ));
    assert_eq!(population.abundance(), &original);

    let err = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &TimeGrid::generations(3),
            &[Summary::total_abundance(), Summary::total_abundance()],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Configuration(ConfigurationError::DuplicateSummary(_))
    ));
}

#[test]
fn test_operator_bound_to_another_domain_is_rejected_before_running() {
    let (mut population, mut demography) = halving_setup();
    let original = population.abundance().clone();
    let elsewhere = SpatialDomain::full(RasterGeometry::new(2, 2, 1.0).unwrap()).unwrap();
    demography.set_pollen_migration(
        MigrationOperator::new(Kernel::gaussian(1.0, 1.0).unwrap())
            .bind(&elsewhere)
            .unwrap(),
    );

    let err = expected_simulator()
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &TimeGrid::generations(3),
            &[],
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Geometry(ref m) if m.bound_cells == 4 && m.found_cells == 2
    ));
    assert_eq!(population.abundance(), &original);
}

#[test]
fn test_trajectory_json_round_trip() {
    let (mut population, demography) = halving_setup();
    let simulator = Simulator {
        engine: GenerationEngine::new(Backend::Matrix, SamplingMode::Stochastic),
        log_every: 0,
    };
    let trajectory = simulator
        .simulate(
            &mut population,
            &demography,
            array![10.0, 10.0].view(),
            &TimeGrid::new(vec![0.0, 2.0, 4.5]).unwrap(),
            &[Summary::occupied_cells()],
            &mut ChaCha8Rng::seed_from_u64(99),
        )
        .unwrap();

    let path = std::env::temp_dir().join("landgen_trajectory_round_trip.json");
    trajectory.save_to_file(&path).unwrap();
    let loaded = Trajectory::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, trajectory);
    assert_eq!(loaded.genotypes, vec!["x", "y"]);
    assert_eq!(loaded.generations, vec![0, 2, 4]);
}
