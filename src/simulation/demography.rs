//! The transition rule of one generation: vital rates, dispersal operators
//! and the mating tensor, bundled under a name.

use tracing::debug;

use super::error::{ConfigurationError, GeometryMismatchError};
use super::geometry::SpatialDomain;
use super::mating::MatingTensor;
use super::migration::MigrationOperator;
use super::population::{Population, validate_genotypes};
use super::vital_rate::VitalRate;

/// The four vital rates applied during a generation.
#[derive(Debug, Clone)]
pub struct VitalRates {
    /// Probability that an individual produces seeds this generation.
    pub prob_seed: VitalRate,
    /// Seeds produced per seeding individual.
    pub fecundity: VitalRate,
    /// Probability that a dispersed seed germinates.
    pub prob_germination: VitalRate,
    /// Probability that an established individual survives.
    pub prob_survival: VitalRate,
}

impl VitalRates {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &VitalRate)> {
        [
            ("prob_seed", &self.prob_seed),
            ("fecundity", &self.fecundity),
            ("prob_germination", &self.prob_germination),
            ("prob_survival", &self.prob_survival),
        ]
        .into_iter()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut VitalRate> {
        [
            &mut self.prob_seed,
            &mut self.fecundity,
            &mut self.prob_germination,
            &mut self.prob_survival,
        ]
        .into_iter()
    }
}

/// Named transition rule for a population with a fixed genotype list.
#[derive(Debug, Clone)]
pub struct Demography {
    name: String,
    genotypes: Vec<String>,
    mating: MatingTensor,
    rates: VitalRates,
    pollen_migration: MigrationOperator,
    seed_migration: MigrationOperator,
}

impl Demography {
    /// Bundles the components after checking that the genotype list is valid
    /// and matches the mating tensor.
    pub fn new(
        name: impl Into<String>,
        genotypes: Vec<String>,
        mating: MatingTensor,
        rates: VitalRates,
        pollen_migration: MigrationOperator,
        seed_migration: MigrationOperator,
    ) -> Result<Self, ConfigurationError> {
        validate_genotypes(&genotypes)?;
        let g = genotypes.len();
        if mating.genotypes() != g {
            let side = mating.genotypes();
            return Err(ConfigurationError::MatingTensorShape {
                shape: vec![side, side, side],
                genotypes: g,
            });
        }
        Ok(Self {
            name: name.into(),
            genotypes,
            mating,
            rates,
            pollen_migration,
            seed_migration,
        })
    }

    /// Name of the demography.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Genotype names in column order.
    pub fn genotypes(&self) -> &[String] {
        &self.genotypes
    }

    /// Mating tensor.
    pub fn mating(&self) -> &MatingTensor {
        &self.mating
    }

    /// Vital rates.
    pub fn rates(&self) -> &VitalRates {
        &self.rates
    }

    /// Vital rates, for parameter updates between generations.
    pub fn rates_mut(&mut self) -> &mut VitalRates {
        &mut self.rates
    }

    /// Pollen dispersal operator.
    pub fn pollen_migration(&self) -> &MigrationOperator {
        &self.pollen_migration
    }

    /// Seed dispersal operator.
    pub fn seed_migration(&self) -> &MigrationOperator {
        &self.seed_migration
    }

    /// Replaces the pollen dispersal operator. The demography has to be
    /// bound again before the matrix backend can use it.
    pub fn set_pollen_migration(&mut self, operator: MigrationOperator) {
        self.pollen_migration = operator;
    }

    /// Replaces the seed dispersal operator.
    pub fn set_seed_migration(&mut self, operator: MigrationOperator) {
        self.seed_migration = operator;
    }

    /// Checks that `population` carries the same genotypes in the same order.
    pub fn check_population(&self, population: &Population) -> Result<(), ConfigurationError> {
        if population.genotypes() != self.genotypes.as_slice() {
            return Err(ConfigurationError::GenotypeMismatch {
                context: "demography vs population",
                expected: self.genotypes.clone(),
                found: population.genotypes().to_vec(),
            });
        }
        Ok(())
    }

    /// Resolves every operator, including those embedded in vital rates,
    /// against the population's domain.
    ///
    /// Returns a new demography; binding an already bound demography to the
    /// same domain gives an equivalent value.
    pub fn bind(&self, population: &Population) -> Result<Self, ConfigurationError> {
        self.check_population(population)?;
        let domain = population.domain();
        let mut bound = self.clone();
        bound.pollen_migration = self.pollen_migration.bind(domain)?;
        bound.seed_migration = self.seed_migration.bind(domain)?;
        for rate in bound.rates.iter_mut() {
            rate.bind(domain)?;
        }
        debug!(
            demography = %self.name,
            accessible = domain.n_accessible(),
            habitable = domain.n_habitable(),
            "bound demography"
        );
        Ok(bound)
    }

    /// Fails if any operator, including those inside vital rates, was bound
    /// to a layout other than `domain`'s.
    pub fn check_layout(&self, domain: &SpatialDomain) -> Result<(), GeometryMismatchError> {
        self.pollen_migration.check_layout(domain)?;
        self.seed_migration.check_layout(domain)?;
        for (_, rate) in self.rates.iter() {
            rate.check_layout(domain)?;
        }
        Ok(())
    }

    /// Name of the first operator that the matrix backend cannot use on
    /// `domain`, if any.
    pub fn unbound_operator(&self, domain: &SpatialDomain) -> Option<&'static str> {
        if !self.pollen_migration.is_ready_for(domain) {
            return Some("pollen_migration");
        }
        if !self.seed_migration.is_ready_for(domain) {
            return Some("seed_migration");
        }
        self.rates
            .iter()
            .find(|(_, rate)| !rate.is_ready_for(domain))
            .map(|(name, _)| name)
    }

    /// Whether every operator is bound to `domain`.
    pub fn is_bound_to(&self, domain: &SpatialDomain) -> bool {
        self.unbound_operator(domain).is_none()
    }
}
