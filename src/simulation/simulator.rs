//! Drives the generation engine over a time grid and records snapshots.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::demography::Demography;
use super::error::{ConfigurationError, GenerationError, SimulationError, Stage, StageError};
use super::generation::GenerationEngine;
use super::population::Population;

/// Sorted, non-negative requested time points.
///
/// Time `t` maps to generation `floor(t)`, so points closer than one
/// generation apart can share a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    /// Validates a list of time points.
    pub fn new(times: Vec<f64>) -> Result<Self, ConfigurationError> {
        if times.is_empty() {
            return Err(ConfigurationError::InvalidTimeGrid(
                "no time points".to_string(),
            ));
        }
        if let Some(t) = times.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
            return Err(ConfigurationError::InvalidTimeGrid(format!(
                "time {t} is negative or not finite"
            )));
        }
        if let Some(pair) = times.windows(2).find(|w| w[1] < w[0]) {
            return Err(ConfigurationError::InvalidTimeGrid(format!(
                "times are not sorted: {} follows {}",
                pair[1], pair[0]
            )));
        }
        Ok(Self { times })
    }

    /// One time point per generation from 0 to `last`.
    pub fn generations(last: usize) -> Self {
        Self {
            times: (0..=last).map(|g| g as f64).collect(),
        }
    }

    /// Requested time points.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Generation index reached at time point `i`.
    pub fn generation_at(&self, i: usize) -> usize {
        self.times[i].floor() as usize
    }

    /// Generation reached at the last time point.
    pub fn final_generation(&self) -> usize {
        self.generation_at(self.times.len() - 1)
    }
}

impl TryFrom<Vec<f64>> for TimeGrid {
    type Error = ConfigurationError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TimeGrid> for Vec<f64> {
    fn from(value: TimeGrid) -> Self {
        value.times
    }
}

/// Function applied to each recorded abundance snapshot.
pub type SummaryFn = Arc<dyn Fn(ArrayView2<'_, f64>) -> Result<Array1<f64>, String> + Send + Sync>;

/// A named summary of an abundance matrix.
#[derive(Clone)]
pub struct Summary {
    name: String,
    function: SummaryFn,
}

impl fmt::Debug for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summary")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Summary {
    /// Wraps a summary function under `name`.
    pub fn new(
        name: impl Into<String>,
        function: impl Fn(ArrayView2<'_, f64>) -> Result<Array1<f64>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    /// Column totals: individuals per genotype.
    pub fn genotype_totals() -> Self {
        Self::new("genotype_totals", |n| Ok(n.sum_axis(Axis(0))))
    }

    /// Total number of individuals, as a one-element vector.
    pub fn total_abundance() -> Self {
        Self::new("total_abundance", |n| Ok(Array1::from_elem(1, n.sum())))
    }

    /// Number of habitable cells holding at least one individual.
    pub fn occupied_cells() -> Self {
        Self::new("occupied_cells", |n| {
            let occupied = n
                .sum_axis(Axis(1))
                .iter()
                .filter(|&&total| total > 0.0)
                .count();
            Ok(Array1::from_elem(1, occupied as f64))
        })
    }

    /// Resolves a built-in summary by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "genotype_totals" => Some(Self::genotype_totals()),
            "total_abundance" => Some(Self::total_abundance()),
            "occupied_cells" => Some(Self::occupied_cells()),
            _ => None,
        }
    }

    /// Name of the summary.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the summary to one snapshot.
    pub fn evaluate(&self, abundance: ArrayView2<'_, f64>) -> Result<Array1<f64>, String> {
        (self.function)(abundance)
    }
}

/// Recorded output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Genotype names, one per snapshot column.
    pub genotypes: Vec<String>,
    /// Requested time points.
    pub times: Vec<f64>,
    /// Generation reached at each time point.
    pub generations: Vec<usize>,
    /// Abundance (habitable x G) at each time point.
    pub snapshots: Vec<Array2<f64>>,
    /// Output of every summary, one entry per time point.
    pub summaries: BTreeMap<String, Vec<Array1<f64>>>,
}

impl Trajectory {
    /// Number of recorded time points.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Recorded series of one summary.
    pub fn summary(&self, name: &str) -> Option<&[Array1<f64>]> {
        self.summaries.get(name).map(Vec::as_slice)
    }

    /// Writes the trajectory as pretty-printed JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimulationError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a trajectory written by [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Repeats generations and records the requested snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulator {
    /// Engine that computes each generation.
    pub engine: GenerationEngine,
    /// Log progress every this many generations; zero disables it.
    pub log_every: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            engine: GenerationEngine::default(),
            log_every: 10,
        }
    }
}

impl Simulator {
    /// Simulator around `engine`.
    pub fn new(engine: GenerationEngine) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    /// Runs until the last time point, updating `population` in place.
    ///
    /// Setup problems are reported before the first generation. A failing
    /// generation or summary aborts the run with the generation index.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        population: &mut Population,
        demography: &Demography,
        carrying_capacity: ArrayView1<'_, f64>,
        time_grid: &TimeGrid,
        summaries: &[Summary],
        rng: &mut R,
    ) -> Result<Trajectory, SimulationError> {
        let mut names = HashSet::new();
        for summary in summaries {
            if !names.insert(summary.name()) {
                return Err(ConfigurationError::DuplicateSummary(summary.name.clone()).into());
            }
        }
        self.engine
            .preflight(population, demography, carrying_capacity)
            .map_err(|source| match source {
                StageError::Configuration(err) => SimulationError::Configuration(err),
                StageError::Geometry(err) => SimulationError::Geometry(err),
                source @ StageError::Sampling(_) => SimulationError::Generation {
                    generation: 0,
                    source: GenerationError {
                        stage: Stage::Preflight,
                        source,
                    },
                },
            })?;

        let mut trajectory = Trajectory {
            genotypes: population.genotypes().to_vec(),
            times: time_grid.times().to_vec(),
            generations: Vec::with_capacity(time_grid.times().len()),
            snapshots: Vec::with_capacity(time_grid.times().len()),
            summaries: summaries
                .iter()
                .map(|s| (s.name.clone(), Vec::new()))
                .collect(),
        };

        info!(
            demography = demography.name(),
            generations = time_grid.final_generation(),
            time_points = time_grid.times().len(),
            "starting simulation"
        );

        let mut generation = 0;
        let mut extinct_logged = false;
        for i in 0..time_grid.times().len() {
            let target = time_grid.generation_at(i);
            while generation < target {
                self.engine
                    .step(population, demography, carrying_capacity, rng)
                    .map_err(|source| SimulationError::Generation {
                        generation: generation + 1,
                        source,
                    })?;
                generation += 1;

                if self.log_every > 0 && generation % self.log_every == 0 {
                    info!(generation, total = population.total(), "progress");
                }
                if !extinct_logged && population.is_extinct() {
                    info!(generation, "population is extinct");
                    extinct_logged = true;
                }
            }

            let snapshot = population.abundance().clone();
            for summary in summaries {
                let value = summary.evaluate(snapshot.view()).map_err(|message| {
                    SimulationError::Summary {
                        generation,
                        name: summary.name.clone(),
                        message,
                    }
                })?;
                if let Some(series) = trajectory.summaries.get_mut(&summary.name) {
                    series.push(value);
                }
            }
            debug!(time = time_grid.times()[i], generation, "recorded snapshot");
            trajectory.generations.push(generation);
            trajectory.snapshots.push(snapshot);
        }
        Ok(trajectory)
    }
}
