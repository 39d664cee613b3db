#![allow(missing_docs)]
#![allow(clippy::float_cmp)]

use std::sync::Arc;

use approx::assert_relative_eq;
use landgen::simulation::demography::{Demography, VitalRates};
use landgen::simulation::error::{ConfigurationError, Stage, StageError};
use landgen::simulation::generation::GenerationEngine;
use landgen::simulation::geometry::{RasterGeometry, SpatialDomain};
use landgen::simulation::kernel::Kernel;
use landgen::simulation::mating::MatingTensor;
use landgen::simulation::migration::{Backend, MigrationOperator};
use landgen::simulation::population::Population;
use landgen::simulation::sampling::SamplingMode;
use landgen::simulation::vital_rate::VitalRate;
use ndarray::{Array1, Array2, Array3, array};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn single_cell_population(n: f64) -> Population {
    let domain = Arc::new(SpatialDomain::full(RasterGeometry::new(1, 1, 1.0).unwrap()).unwrap());
    Population::new(domain, vec!["aa".to_string()], array![[n]]).unwrap()
}

fn single_cell_demography(prob_seed: f64, fecundity: f64, prob_survival: f64) -> Demography {
    Demography::new(
        "single cell",
        vec!["aa".to_string()],
        MatingTensor::single(),
        VitalRates {
            prob_seed: VitalRate::constant(prob_seed),
            fecundity: VitalRate::constant(fecundity),
            prob_germination: VitalRate::constant(1.0),
            prob_survival: VitalRate::constant(prob_survival),
        },
        MigrationOperator::Identity,
        MigrationOperator::Identity,
    )
    .unwrap()
}

/// 4x4 landscape with two-allele Mendelian genotypes and every rate active.
fn landscape() -> (Population, Demography, Array1<f64>) {
    let geometry = RasterGeometry::new(4, 4, 1.0).unwrap();
    let habitat = Array2::from_shape_fn((4, 4), |(r, c)| match (r, c) {
        (0, 0) => f64::NAN,
        (3, _) => 0.0,
        _ => 1.0,
    });
    let (genotypes, mating) = MatingTensor::mendelian(&["a", "A"]).unwrap();
    let population =
        Population::from_habitat(geometry, habitat.view(), genotypes.clone(), &[6.0, 4.0, 2.0])
            .unwrap();

    let dispersal = Kernel::gaussian(1.0, 2.0).unwrap().normalized(1.0).unwrap();
    let competition = Kernel::gaussian(1.0, 1.5).unwrap().normalized(1.0).unwrap();
    let demography = Demography::new(
        "landscape",
        genotypes,
        mating,
        VitalRates {
            prob_seed: VitalRate::constant(0.6),
            fecundity: VitalRate::PerGenotype(vec![3.0, 4.0, 5.0]),
            prob_germination: VitalRate::beverton_holt(
                0.7,
                MigrationOperator::new(competition),
                Some(vec![1.0, 0.9, 0.8]),
            ),
            prob_survival: VitalRate::constant(0.4),
        },
        MigrationOperator::new(dispersal.clone()),
        MigrationOperator::new(dispersal),
    )
    .unwrap()
    .bind(&population)
    .unwrap();

    let capacity = Array1::from_elem(population.domain().n_habitable(), 20.0);
    (population, demography, capacity)
}

#[test]
fn test_single_cell_recruits_have_poisson_mean() {
    let population = single_cell_population(5.0);
    let demography = single_cell_demography(1.0, 1.0, 0.0);
    let engine = GenerationEngine::new(Backend::Matrix, SamplingMode::Stochastic);
    let capacity = array![100.0];
    let mut rng = ChaCha8Rng::seed_from_u64(2024);

    let trials = 10_000;
    let mut total = 0.0;
    for _ in 0..trials {
        let next = engine
            .generation(&population, &demography, capacity.view(), &mut rng)
            .unwrap();
        total += next[[0, 0]];
    }
    let mean = total / f64::from(trials);
    assert!((mean - 5.0).abs() < 0.25, "mean {mean} is not within 5% of 5");
}

#[test]
fn test_single_cell_expectation_is_exact() {
    let population = single_cell_population(5.0);
    let demography = single_cell_demography(1.0, 1.0, 0.0);
    let engine = GenerationEngine::new(Backend::Matrix, SamplingMode::Expected);
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let stages = engine
        .generation_with_stages(&population, &demography, array![100.0].view(), &mut rng)
        .unwrap();
    assert_eq!(stages.seeders, array![[5.0]]);
    assert_eq!(stages.pollen_frequencies, array![[1.0]]);
    assert_eq!(stages.survivors, array![[0.0]]);
    assert_eq!(stages.next, array![[5.0]]);
}

#[test]
fn test_generation_never_goes_negative() {
    let (mut population, demography, capacity) = landscape();
    let engine = GenerationEngine::default();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..25 {
        engine
            .step(&mut population, &demography, capacity.view(), &mut rng)
            .unwrap();
        assert!(population.abundance().iter().all(|&v| v >= 0.0 && v.is_finite()));
        assert!(population.abundance().iter().all(|&v| v == v.round()));
    }
}

#[test]
fn test_extinct_population_stays_extinct() {
    let (population, demography, capacity) = landscape();
    let empty = Population::empty(
        Arc::clone(population.domain()),
        population.genotypes().to_vec(),
    )
    .unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for backend in [Backend::Matrix, Backend::Raster] {
        let engine = GenerationEngine::new(backend, SamplingMode::Stochastic);
        let next = engine
            .generation(&empty, &demography, capacity.view(), &mut rng)
            .unwrap();
        assert!(next.iter().all(|&v| v == 0.0));
    }
}

#[test]
fn test_no_reproduction_and_full_survival_conserves_abundance() {
    let (population, demography, capacity) = landscape();
    let mut demography = demography;
    demography.rates_mut().prob_seed = VitalRate::constant(1.0);
    demography.rates_mut().fecundity = VitalRate::constant(0.0);
    demography.rates_mut().prob_survival = VitalRate::constant(1.0);

    let engine = GenerationEngine::default();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let next = engine
        .generation(&population, &demography, capacity.view(), &mut rng)
        .unwrap();
    assert_eq!(&next, population.abundance());
}

#[test]
fn test_backends_agree_in_expectation() {
    let (population, demography, capacity) = landscape();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let matrix = GenerationEngine::new(Backend::Matrix, SamplingMode::Expected)
        .generation(&population, &demography, capacity.view(), &mut rng)
        .unwrap();
    let raster = GenerationEngine::new(Backend::Raster, SamplingMode::Expected)
        .generation(&population, &demography, capacity.view(), &mut rng)
        .unwrap();
    for (a, b) in matrix.iter().zip(raster.iter()) {
        assert_relative_eq!(*a, *b, max_relative = 1e-6, epsilon = 1e-9);
    }
}

#[test]
fn test_same_seed_gives_same_generation() {
    let (population, demography, capacity) = landscape();
    let engine = GenerationEngine::default();
    let a = engine
        .generation(
            &population,
            &demography,
            capacity.view(),
            &mut ChaCha8Rng::seed_from_u64(11),
        )
        .unwrap();
    let b = engine
        .generation(
            &population,
            &demography,
            capacity.view(),
            &mut ChaCha8Rng::seed_from_u64(11),
        )
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_isolated_cells_germinate_at_baseline() {
    let geometry = RasterGeometry::new(3, 3, 1.0).unwrap();
    let domain = Arc::new(SpatialDomain::full(geometry).unwrap());
    let population = Population::uniform(domain, vec!["aa".to_string()], &[4.0]).unwrap();
    let isolated = || {
        MigrationOperator::new(Kernel::gaussian(1.0, 0.5).unwrap().normalized(1.0).unwrap())
    };
    let demography = Demography::new(
        "isolated",
        vec!["aa".to_string()],
        MatingTensor::single(),
        VitalRates {
            prob_seed: VitalRate::constant(1.0),
            fecundity: VitalRate::constant(2.0),
            prob_germination: VitalRate::beverton_holt(0.7, isolated(), None),
            prob_survival: VitalRate::constant(1.0),
        },
        isolated(),
        isolated(),
    )
    .unwrap()
    .bind(&population)
    .unwrap();

    let engine = GenerationEngine::new(Backend::Matrix, SamplingMode::Expected);
    let stages = engine
        .generation_with_stages(
            &population,
            &demography,
            Array1::from_elem(9, 10.0).view(),
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap();
    assert!(stages.pollen.iter().all(|&v| v == 0.0));
    assert!(stages.dispersed_seeds.iter().all(|&v| v == 0.0));
    for &rate in &stages.germination {
        assert_relative_eq!(rate, 0.7, epsilon = 1e-12);
    }
    assert_eq!(&stages.next, population.abundance());
}

#[test]
fn test_zero_capacity_blocks_germination() {
    let population = single_cell_population(5.0);
    let mut demography = single_cell_demography(1.0, 1.0, 0.0);
    demography.rates_mut().prob_germination =
        VitalRate::beverton_holt(0.9, MigrationOperator::Identity, None);
    let engine = GenerationEngine::new(Backend::Matrix, SamplingMode::Stochastic);
    let stages = engine
        .generation_with_stages(
            &population,
            &demography,
            array![0.0].view(),
            &mut ChaCha8Rng::seed_from_u64(5),
        )
        .unwrap();
    assert_eq!(stages.germination, array![[0.0]]);
    assert_eq!(stages.next, array![[0.0]]);
}

#[test]
fn test_capacity_is_validated_before_any_stage() {
    let population = single_cell_population(5.0);
    let demography = single_cell_demography(1.0, 1.0, 0.0);
    let engine = GenerationEngine::default();
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let err = engine
        .generation(&population, &demography, array![1.0, 2.0].view(), &mut rng)
        .unwrap_err();
    assert_eq!(err.stage, Stage::Preflight);
    assert!(matches!(
        err.source,
        StageError::Configuration(ConfigurationError::CarryingCapacityShape {
            expected: 1,
            found: 2
        })
    ));

    for bad in [-1.0, f64::NAN] {
        let err = engine
            .generation(&population, &demography, array![bad].view(), &mut rng)
            .unwrap_err();
        assert!(matches!(
            err.source,
            StageError::Configuration(ConfigurationError::CarryingCapacityValue { cell: 0, .. })
        ));
    }
}

#[test]
fn test_genotype_mismatch_is_a_preflight_error() {
    let domain = Arc::new(SpatialDomain::full(RasterGeometry::new(1, 1, 1.0).unwrap()).unwrap());
    let population = Population::new(domain, vec!["AA".to_string()], array![[5.0]]).unwrap();
    let demography = single_cell_demography(1.0, 1.0, 0.0);
    let err = GenerationEngine::default()
        .generation(
            &population,
            &demography,
            array![1.0].view(),
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert_eq!(err.stage, Stage::Preflight);
    assert!(matches!(
        err.source,
        StageError::Configuration(ConfigurationError::GenotypeMismatch { .. })
    ));
}

#[test]
fn test_matrix_backend_requires_bound_operators() {
    let population = single_cell_population(5.0);
    let mut demography = single_cell_demography(1.0, 1.0, 0.0);
    demography.set_seed_migration(MigrationOperator::new(Kernel::gaussian(1.0, 1.0).unwrap()));
    let capacity = array![10.0];
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let err = GenerationEngine::new(Backend::Matrix, SamplingMode::Expected)
        .generation(&population, &demography, capacity.view(), &mut rng)
        .unwrap_err();
    assert!(matches!(
        err.source,
        StageError::Configuration(ConfigurationError::UnboundOperator(ref name)) if name == "seed_migration"
    ));

    // the raster backend evaluates the kernel lazily
    let next = GenerationEngine::new(Backend::Raster, SamplingMode::Expected)
        .generation(&population, &demography, capacity.view(), &mut rng)
        .unwrap();
    assert_relative_eq!(next[[0, 0]], 5.0, epsilon = 1e-12);
}

#[test]
fn test_operator_bound_elsewhere_is_a_geometry_error_on_both_backends() {
    let population = single_cell_population(5.0);
    let mut demography = single_cell_demography(1.0, 1.0, 0.0);
    let elsewhere = SpatialDomain::full(RasterGeometry::new(3, 3, 1.0).unwrap()).unwrap();
    let seed_migration = MigrationOperator::new(Kernel::gaussian(1.0, 1.0).unwrap())
        .bind(&elsewhere)
        .unwrap();
    demography.set_seed_migration(seed_migration);
    let capacity = array![10.0];
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    for backend in [Backend::Matrix, Backend::Raster] {
        let err = GenerationEngine::new(backend, SamplingMode::Expected)
            .generation(&population, &demography, capacity.view(), &mut rng)
            .unwrap_err();
        assert_eq!(err.stage, Stage::Preflight);
        match err.source {
            StageError::Geometry(mismatch) => {
                assert_eq!(mismatch.bound_cells, 9);
                assert_eq!(mismatch.found_cells, 1);
            }
            other => panic!("expected a geometry mismatch under {backend:?}, got {other:?}"),
        }
    }
}

#[test]
fn test_overflowing_abundance_fails_at_commit() {
    let mut population = single_cell_population(1e308);
    let demography = single_cell_demography(1.0, 1.0, 1.0);
    let engine = GenerationEngine::new(Backend::Matrix, SamplingMode::Expected);

    let err = engine
        .step(
            &mut population,
            &demography,
            array![1.0].view(),
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert_eq!(err.stage, Stage::Commit);
    assert!(matches!(
        err.source,
        StageError::Configuration(ConfigurationError::AbundanceValue { cell: 0, genotype: 0, .. })
    ));
    assert_eq!(population.abundance(), &array![[1e308]]);
}

#[test]
fn test_out_of_range_rate_names_the_stage() {
    let population = single_cell_population(5.0);
    let demography = single_cell_demography(1.5, 1.0, 0.0);
    let err = GenerationEngine::default()
        .generation(
            &population,
            &demography,
            array![1.0].view(),
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap_err();
    assert_eq!(err.stage, Stage::Seeders);
    assert!(matches!(
        err.source,
        StageError::Configuration(ConfigurationError::RateOutOfRange { .. })
    ));
}

#[test]
fn test_mating_tensor_must_sum_to_one() {
    let mut p = Array3::from_elem((2, 2, 2), 0.5);
    p[[0, 1, 0]] = 0.7;
    assert!(matches!(
        MatingTensor::new(p),
        Err(ConfigurationError::MatingTensorSum {
            mother: 0,
            father: 1,
            ..
        })
    ));
}
