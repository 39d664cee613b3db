//! Population state: a spatial domain, genotype names and abundances.
//!
//! Abundances are kept as a (habitable cells x genotypes) matrix. The column
//! order is the order of the genotype list and is significant everywhere.

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::error::ConfigurationError;
use super::geometry::{RasterGeometry, SpatialDomain};

/// Common access to per-cell, per-genotype abundance values.
///
/// Implemented by the matrix-backed [`Population`] and the raster-backed
/// [`RasterPopulation`]; callers that only move values in and out do not need
/// to know which index space backs them.
pub trait AbundanceField {
    /// Number of rows in the backing index space.
    fn domain_size(&self) -> usize;

    /// Genotype names, one per column.
    fn genotypes(&self) -> &[String];

    /// Copy of the current values.
    fn read_values(&self) -> Array2<f64>;

    /// Replaces all values at once.
    fn write_values(&mut self, values: Array2<f64>) -> Result<(), ConfigurationError>;
}

/// Checks that a genotype list is non-empty and free of duplicates.
pub fn validate_genotypes(genotypes: &[String]) -> Result<(), ConfigurationError> {
    if genotypes.is_empty() {
        return Err(ConfigurationError::InvalidGenotypes(
            "genotype list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for name in genotypes {
        if !seen.insert(name.as_str()) {
            return Err(ConfigurationError::InvalidGenotypes(format!(
                "duplicate genotype `{name}`"
            )));
        }
    }
    Ok(())
}

fn validate_abundance(
    expected: (usize, usize),
    abundance: ArrayView2<'_, f64>,
) -> Result<(), ConfigurationError> {
    if abundance.dim() != expected {
        return Err(ConfigurationError::AbundanceShape {
            expected,
            found: abundance.dim(),
        });
    }
    if let Some(((cell, genotype), &value)) = abundance
        .indexed_iter()
        .find(|&(_, &v)| !(v.is_finite() && v >= 0.0))
    {
        return Err(ConfigurationError::AbundanceValue {
            cell,
            genotype,
            value,
        });
    }
    Ok(())
}

/// Abundance of every genotype in every habitable cell.
#[derive(Debug, Clone)]
pub struct Population {
    domain: Arc<SpatialDomain>,
    genotypes: Vec<String>,
    abundance: Array2<f64>,
}

impl Population {
    /// Creates a population, validating shape and non-negativity.
    pub fn new(
        domain: Arc<SpatialDomain>,
        genotypes: Vec<String>,
        abundance: Array2<f64>,
    ) -> Result<Self, ConfigurationError> {
        validate_genotypes(&genotypes)?;
        validate_abundance((domain.n_habitable(), genotypes.len()), abundance.view())?;
        Ok(Self {
            domain,
            genotypes,
            abundance,
        })
    }

    /// Population with zero individuals everywhere.
    pub fn empty(
        domain: Arc<SpatialDomain>,
        genotypes: Vec<String>,
    ) -> Result<Self, ConfigurationError> {
        let shape = (domain.n_habitable(), genotypes.len());
        Self::new(domain, genotypes, Array2::zeros(shape))
    }

    /// Same per-genotype counts in every habitable cell.
    pub fn uniform(
        domain: Arc<SpatialDomain>,
        genotypes: Vec<String>,
        per_cell: &[f64],
    ) -> Result<Self, ConfigurationError> {
        if per_cell.len() != genotypes.len() {
            return Err(ConfigurationError::AbundanceShape {
                expected: (1, genotypes.len()),
                found: (1, per_cell.len()),
            });
        }
        let row = Array1::from(per_cell.to_vec());
        let abundance = row
            .broadcast((domain.n_habitable(), per_cell.len()))
            .map(|view| view.to_owned())
            .unwrap_or_else(|| Array2::zeros((domain.n_habitable(), per_cell.len())));
        Self::new(domain, genotypes, abundance)
    }

    /// Builds the domain from a habitat raster and seeds every habitable cell
    /// with `per_cell` individuals of each genotype.
    pub fn from_habitat(
        geometry: RasterGeometry,
        habitat: ArrayView2<'_, f64>,
        genotypes: Vec<String>,
        per_cell: &[f64],
    ) -> Result<Self, ConfigurationError> {
        let domain = Arc::new(SpatialDomain::from_habitat(geometry, habitat)?);
        Self::uniform(domain, genotypes, per_cell)
    }

    /// Shared spatial domain.
    pub fn domain(&self) -> &Arc<SpatialDomain> {
        &self.domain
    }

    /// Genotype names in column order.
    pub fn genotypes(&self) -> &[String] {
        &self.genotypes
    }

    /// Number of genotypes G.
    pub fn n_genotypes(&self) -> usize {
        self.genotypes.len()
    }

    /// Abundance matrix (habitable x G).
    pub fn abundance(&self) -> &Array2<f64> {
        &self.abundance
    }

    /// Replaces the abundance matrix wholesale.
    pub fn set_abundance(&mut self, abundance: Array2<f64>) -> Result<(), ConfigurationError> {
        validate_abundance(self.abundance.dim(), abundance.view())?;
        self.abundance = abundance;
        Ok(())
    }

    /// Total individuals of each genotype.
    pub fn genotype_totals(&self) -> Array1<f64> {
        self.abundance.sum_axis(Axis(0))
    }

    /// Total individuals in each habitable cell.
    pub fn cell_totals(&self) -> Array1<f64> {
        self.abundance.sum_axis(Axis(1))
    }

    /// Total population size.
    pub fn total(&self) -> f64 {
        self.abundance.sum()
    }

    /// Whether no individual is left.
    pub fn is_extinct(&self) -> bool {
        self.abundance.iter().all(|&v| v == 0.0)
    }

    /// Raster-backed copy of the population.
    pub fn to_raster(&self) -> RasterPopulation {
        RasterPopulation {
            domain: Arc::clone(&self.domain),
            genotypes: self.genotypes.clone(),
            values: self.domain.habitable_to_raster(self.abundance.view()),
        }
    }
}

impl AbundanceField for Population {
    fn domain_size(&self) -> usize {
        self.domain.n_habitable()
    }

    fn genotypes(&self) -> &[String] {
        &self.genotypes
    }

    fn read_values(&self) -> Array2<f64> {
        self.abundance.clone()
    }

    fn write_values(&mut self, values: Array2<f64>) -> Result<(), ConfigurationError> {
        self.set_abundance(values)
    }
}

/// Population values laid out over every raster cell.
///
/// Inaccessible cells hold `NaN`; accessible cells that are not habitable
/// hold zero.
#[derive(Debug, Clone)]
pub struct RasterPopulation {
    domain: Arc<SpatialDomain>,
    genotypes: Vec<String>,
    values: Array2<f64>,
}

impl RasterPopulation {
    /// Raster-indexed values (cells x G).
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Values of one genotype arranged as the raster grid.
    pub fn layer(&self, genotype: usize) -> Array2<f64> {
        let geometry = self.domain.geometry();
        self.values
            .column(genotype)
            .to_owned()
            .into_shape_with_order((geometry.nrows, geometry.ncols))
            .unwrap_or_else(|_| Array2::zeros((geometry.nrows, geometry.ncols)))
    }

    /// Matrix-backed population holding the habitable cells.
    pub fn to_population(&self) -> Result<Population, ConfigurationError> {
        Population::new(
            Arc::clone(&self.domain),
            self.genotypes.clone(),
            self.domain.raster_to_habitable(self.values.view()),
        )
    }
}

impl AbundanceField for RasterPopulation {
    fn domain_size(&self) -> usize {
        self.domain.geometry().cell_count()
    }

    fn genotypes(&self) -> &[String] {
        &self.genotypes
    }

    fn read_values(&self) -> Array2<f64> {
        self.values.clone()
    }

    fn write_values(&mut self, values: Array2<f64>) -> Result<(), ConfigurationError> {
        let expected = (self.domain_size(), self.genotypes.len());
        if values.dim() != expected {
            return Err(ConfigurationError::AbundanceShape {
                expected,
                found: values.dim(),
            });
        }
        let habitable = self.domain.raster_to_habitable(values.view());
        validate_abundance((self.domain.n_habitable(), expected.1), habitable.view())?;
        // Re-mask so that only habitable cells carry individuals.
        self.values = self.domain.habitable_to_raster(habitable.view());
        Ok(())
    }
}
