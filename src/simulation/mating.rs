//! Offspring genotype distributions for every pair of parental genotypes.

use ndarray::{Array3, ArrayView1, s};
use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

/// Tolerance on the sum of each offspring distribution.
pub const SUM_TOLERANCE: f64 = 1e-9;

/// A G x G x G table; `[i, j, k]` is P(offspring k | mother i, father j).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array3<f64>", into = "Array3<f64>")]
pub struct MatingTensor {
    probabilities: Array3<f64>,
}

impl MatingTensor {
    /// Validates and wraps a probability table.
    ///
    /// The table must be a cube, every entry a probability, and every
    /// `(i, j)` fibre must sum to one within [`SUM_TOLERANCE`].
    pub fn new(probabilities: Array3<f64>) -> Result<Self, ConfigurationError> {
        let (a, b, c) = probabilities.dim();
        if a != b || b != c || a == 0 {
            return Err(ConfigurationError::MatingTensorShape {
                shape: vec![a, b, c],
                genotypes: a,
            });
        }
        for ((i, j, k), &p) in probabilities.indexed_iter() {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigurationError::MatingTensorValue(i, j, k));
            }
        }
        for i in 0..a {
            for j in 0..a {
                let sum: f64 = probabilities.slice(s![i, j, ..]).sum();
                if (sum - 1.0).abs() > SUM_TOLERANCE {
                    return Err(ConfigurationError::MatingTensorSum {
                        mother: i,
                        father: j,
                        sum,
                    });
                }
            }
        }
        Ok(Self { probabilities })
    }

    /// Single-genotype tensor `[[[1]]]`.
    pub fn single() -> Self {
        Self {
            probabilities: Array3::ones((1, 1, 1)),
        }
    }

    /// Clonal reproduction: offspring always carry the mother's genotype.
    pub fn clonal(genotypes: usize) -> Result<Self, ConfigurationError> {
        let mut probabilities = Array3::zeros((genotypes, genotypes, genotypes));
        for i in 0..genotypes {
            for j in 0..genotypes {
                probabilities[[i, j, i]] = 1.0;
            }
        }
        Self::new(probabilities)
    }

    /// Diploid single-locus Mendelian inheritance.
    ///
    /// Genotypes are every unordered allele pair, in the order
    /// `a0a0, a0a1, ..., a0an, a1a1, a1a2, ...`, named by concatenating the
    /// allele names. Each parent passes on either of its alleles with equal
    /// probability.
    pub fn mendelian(alleles: &[&str]) -> Result<(Vec<String>, Self), ConfigurationError> {
        if alleles.is_empty() {
            return Err(ConfigurationError::InvalidGenotypes(
                "at least one allele is required".to_string(),
            ));
        }
        let n = alleles.len();
        let mut pairs = Vec::new();
        let mut index_of = vec![vec![0; n]; n];
        for x in 0..n {
            for y in x..n {
                index_of[x][y] = pairs.len();
                index_of[y][x] = pairs.len();
                pairs.push((x, y));
            }
        }
        let names: Vec<String> = pairs
            .iter()
            .map(|&(x, y)| format!("{}{}", alleles[x], alleles[y]))
            .collect();

        let g = pairs.len();
        let mut probabilities = Array3::zeros((g, g, g));
        for (i, &(m1, m2)) in pairs.iter().enumerate() {
            for (j, &(f1, f2)) in pairs.iter().enumerate() {
                for maternal in [m1, m2] {
                    for paternal in [f1, f2] {
                        probabilities[[i, j, index_of[maternal][paternal]]] += 0.25;
                    }
                }
            }
        }
        Ok((names, Self::new(probabilities)?))
    }

    /// Number of genotypes G.
    pub fn genotypes(&self) -> usize {
        self.probabilities.dim().0
    }

    /// Offspring distribution of mother `i` and father `j`.
    pub fn offspring(&self, mother: usize, father: usize) -> ArrayView1<'_, f64> {
        self.probabilities.slice(s![mother, father, ..])
    }

    /// The underlying table.
    pub fn probabilities(&self) -> &Array3<f64> {
        &self.probabilities
    }
}

impl TryFrom<Array3<f64>> for MatingTensor {
    type Error = ConfigurationError;

    fn try_from(value: Array3<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MatingTensor> for Array3<f64> {
    fn from(value: MatingTensor) -> Self {
        value.probabilities
    }
}
