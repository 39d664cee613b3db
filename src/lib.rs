//! # Landgen - Spatial Population Genetics on Raster Landscapes
//!
//! Discrete-generation simulation of a genotype-structured population living
//! on the cells of a raster. Every generation individuals set seed, pollen and
//! seeds disperse along distance-decay kernels, offspring genotypes follow a
//! mating tensor, seeds germinate under local density dependence, and the
//! established population survives or dies.
//!
//! ## Features
//!
//! - Truncated, optionally normalised dispersal kernels
//! - Migration operators evaluated lazily on the raster or through a
//!   precomputed sparse matrix, with n-step mixtures
//! - Parameterised vital rates (Beverton-Holt, soft selection)
//! - Mendelian and clonal mating tensors
//! - Seeded, parallel binomial and Poisson sampling
//! - Time-grid driven simulation with summaries and JSON output
//!
//! ## Core Modules
//!
//! - [`simulation::migration`] - Dispersal operators and their two backends
//! - [`simulation::generation`] - One demographic transition
//! - [`simulation::simulator`] - Runs over a time grid
//! - [`simulation::demography`] - Vital rates, operators and mating bundled
//! - [`simulation::params`] - JSON run configuration

/// Core simulation logic and data structures.
pub mod simulation {
    /// Bundle of vital rates, dispersal operators and mating tensor.
    pub mod demography;
    /// Error types for configuration, stages and runs.
    pub mod error;
    /// One demographic transition of a population.
    pub mod generation;
    /// Geometric utility functions for distance calculations.
    pub mod geometric_utils;
    /// Raster geometry and accessible/habitable index spaces.
    pub mod geometry;
    /// Distance-decay kernels.
    pub mod kernel;
    /// Offspring genotype probabilities.
    pub mod mating;
    /// Spatial smoothing operators.
    ///
    /// A [`migration::MigrationOperator`] is either unbound (a kernel that is
    /// convolved over the raster on every call) or bound to the accessible
    /// layout of one domain through a sparse matrix.
    pub mod migration;
    /// Run configuration.
    pub mod params;
    /// Population state and the abundance capability trait.
    pub mod population;
    /// Elementwise binomial and Poisson draws.
    pub mod sampling;
    /// Time-grid driver, summaries and trajectories.
    pub mod simulator;
    /// Compressed sparse row matrices.
    pub mod sparse;
    /// Spatial index over cell centres.
    pub mod spatial;
    /// Constant and parameterised vital rates.
    pub mod vital_rate;
}
