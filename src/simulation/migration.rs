//! Spatial smoothing ("migration") operators built from a kernel.
//!
//! An operator is either [`MigrationOperator::Identity`], an unbound kernel
//! template that convolves rasters lazily, or a bound operator that carries a
//! precomputed sparse weight matrix over the accessible cells of one domain.
//! Binding never mutates the template; it returns a new value.
//!
//! Row `a` of the operator holds the weights `w(d(a, b) / sigma)` of every
//! accessible cell `b` within the cutoff radius, optionally rescaled to sum to
//! the normalisation target. Applying it computes `y[a] = sum_b M[a, b] x[b]`.

use std::sync::Arc;

use kdtree::ErrorKind as KdTreeError;
use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ConfigurationError, GeometryMismatchError, StageError};
use super::geometric_utils::{cell_distance, has_support, window_extent, within_radius};
use super::geometry::{CellLayout, SpatialDomain};
use super::kernel::Kernel;
use super::sparse::SparseMatrix;
use super::spatial::CellIndex;

/// How operators are evaluated inside a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Recompute neighbour weights on the raster at every call.
    Raster,
    /// Use the sparse matrices precomputed at binding time.
    #[default]
    Matrix,
}

/// Kernel plus optional n-step mixture weights, not tied to any geometry.
#[derive(Debug, Clone)]
pub struct UnboundOperator {
    kernel: Kernel,
    steps: Option<Vec<f64>>,
}

impl UnboundOperator {
    /// Kernel the operator is built from.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// n-step mixture weights, if any.
    pub fn steps(&self) -> Option<&[f64]> {
        self.steps.as_deref()
    }
}

/// An operator realised against the accessible layout of one domain.
#[derive(Debug, Clone)]
pub struct BoundOperator {
    template: UnboundOperator,
    layout: CellLayout,
    matrix: Arc<SparseMatrix>,
    from_habitable: Arc<SparseMatrix>,
    habitable_columns: Vec<usize>,
}

impl BoundOperator {
    /// Full accessible x accessible weight matrix.
    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    /// Accessible positions of the habitable cells, in habitable order.
    pub fn habitable_columns(&self) -> &[usize] {
        &self.habitable_columns
    }

    /// Layout the matrix was built for.
    pub fn layout(&self) -> &CellLayout {
        &self.layout
    }

    /// Unbound template the matrix was derived from.
    pub fn template(&self) -> &UnboundOperator {
        &self.template
    }

    pub fn check_layout(&self, domain: &SpatialDomain) -> Result<(), GeometryMismatchError> {
        let target = domain.layout();
        if self.layout == target {
            return Ok(());
        }
        Err(GeometryMismatchError {
            bound_cells: self.layout.len(),
            bound_rows: self.layout.geometry().nrows,
            bound_cols: self.layout.geometry().ncols,
            found_cells: target.len(),
            found_rows: target.geometry().nrows,
            found_cols: target.geometry().ncols,
        })
    }
}

/// A spatial smoothing operator.
#[derive(Debug, Clone)]
pub enum MigrationOperator {
    /// No smoothing; values stay in their cell.
    Identity,
    /// Kernel template, evaluated lazily on the raster.
    Unbound(UnboundOperator),
    /// Template plus precomputed sparse matrix for one layout.
    Bound(BoundOperator),
}

impl MigrationOperator {
    /// Unbound operator from a kernel.
    pub fn new(kernel: Kernel) -> Self {
        MigrationOperator::Unbound(UnboundOperator {
            kernel,
            steps: None,
        })
    }

    /// Sets n-step mixture weights `n_1, n_2, ...`.
    ///
    /// The operator then computes `(1 - sum n_k) x + sum_k n_k M^k x`. The
    /// weights need not sum to one.
    pub fn with_steps(self, steps: Vec<f64>) -> Result<Self, ConfigurationError> {
        if steps.iter().any(|s| !s.is_finite()) {
            return Err(ConfigurationError::InvalidSteps(steps));
        }
        let steps = if steps.is_empty() { None } else { Some(steps) };
        Ok(match self {
            MigrationOperator::Identity => MigrationOperator::Identity,
            MigrationOperator::Unbound(mut template) => {
                template.steps = steps;
                MigrationOperator::Unbound(template)
            }
            MigrationOperator::Bound(mut bound) => {
                bound.template.steps = steps;
                MigrationOperator::Bound(bound)
            }
        })
    }

    /// Kernel template, `None` for the identity.
    pub fn template(&self) -> Option<&UnboundOperator> {
        match self {
            MigrationOperator::Identity => None,
            MigrationOperator::Unbound(template) => Some(template),
            MigrationOperator::Bound(bound) => Some(&bound.template),
        }
    }

    /// Kernel, `None` for the identity.
    pub fn kernel(&self) -> Option<&Kernel> {
        self.template().map(UnboundOperator::kernel)
    }

    /// Bound form, if realised.
    pub fn as_bound(&self) -> Option<&BoundOperator> {
        match self {
            MigrationOperator::Bound(bound) => Some(bound),
            _ => None,
        }
    }

    /// Fails if the operator was realised for a layout other than `domain`'s.
    /// Identity and unbound operators fit any layout.
    pub fn check_layout(&self, domain: &SpatialDomain) -> Result<(), GeometryMismatchError> {
        match self {
            MigrationOperator::Bound(bound) => bound.check_layout(domain),
            _ => Ok(()),
        }
    }

    /// Whether the matrix backend can use this operator on `domain` as is.
    pub fn is_ready_for(&self, domain: &SpatialDomain) -> bool {
        match self {
            MigrationOperator::Identity => true,
            MigrationOperator::Unbound(_) => false,
            MigrationOperator::Bound(bound) => bound.layout == domain.layout(),
        }
    }

    /// Realises the operator against `domain`.
    ///
    /// Returns a new value; an operator already bound to the same layout is
    /// cloned unchanged, one bound elsewhere is rebuilt from its template.
    pub fn bind(&self, domain: &SpatialDomain) -> Result<Self, ConfigurationError> {
        match self {
            MigrationOperator::Identity => Ok(MigrationOperator::Identity),
            MigrationOperator::Unbound(template) => realize(template, domain),
            MigrationOperator::Bound(bound) if bound.layout == domain.layout() => {
                Ok(self.clone())
            }
            MigrationOperator::Bound(bound) => realize(&bound.template, domain),
        }
    }

    /// Drops any realised matrix, keeping the template.
    pub fn unbind(&self) -> Self {
        match self {
            MigrationOperator::Bound(bound) => MigrationOperator::Unbound(bound.template.clone()),
            other => other.clone(),
        }
    }

    /// Raster backend: smooths raster-indexed values.
    ///
    /// `values` has one row per raster cell. Inaccessible cells are excluded
    /// from every neighbourhood and come back as `NaN`.
    pub fn apply_raster(
        &self,
        domain: &SpatialDomain,
        values: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, ConfigurationError> {
        let cells = domain.geometry().cell_count();
        if values.nrows() != cells {
            return Err(ConfigurationError::OperatorInputShape {
                expected: cells,
                found: values.nrows(),
            });
        }
        let Some(template) = self.template() else {
            return Ok(domain.accessible_to_raster(domain.raster_to_accessible(values).view()));
        };
        let masked = domain.accessible_to_raster(domain.raster_to_accessible(values).view());
        Ok(mix_steps(template.steps(), masked.view(), |x| {
            convolve_raster(&template.kernel, domain, x)
        }))
    }

    /// Matrix backend: multiplies accessible-indexed values by the bound matrix.
    pub fn apply_matrix(&self, values: ArrayView2<'_, f64>) -> Result<Array2<f64>, ConfigurationError> {
        match self {
            MigrationOperator::Identity => Ok(values.to_owned()),
            MigrationOperator::Unbound(_) => Err(ConfigurationError::UnboundOperator(
                "migration operator".to_string(),
            )),
            MigrationOperator::Bound(bound) => {
                let expected = bound.matrix.nrows();
                if values.nrows() != expected {
                    return Err(ConfigurationError::OperatorInputShape {
                        expected,
                        found: values.nrows(),
                    });
                }
                Ok(mix_steps(bound.template.steps(), values, |x| {
                    bound.matrix.mul_dense(x)
                }))
            }
        }
    }

    /// Smooths accessible-indexed values with the selected backend.
    pub fn apply(
        &self,
        domain: &SpatialDomain,
        values: ArrayView2<'_, f64>,
        backend: Backend,
    ) -> Result<Array2<f64>, StageError> {
        let expected = domain.n_accessible();
        if values.nrows() != expected {
            return Err(ConfigurationError::OperatorInputShape {
                expected,
                found: values.nrows(),
            }
            .into());
        }
        match (self, backend) {
            (MigrationOperator::Identity, _) => Ok(values.to_owned()),
            (MigrationOperator::Bound(bound), Backend::Matrix) => {
                bound.check_layout(domain)?;
                Ok(self.apply_matrix(values)?)
            }
            (MigrationOperator::Unbound(_), Backend::Matrix) => Err(
                ConfigurationError::UnboundOperator("migration operator".to_string()).into(),
            ),
            (_, Backend::Raster) => {
                self.check_layout(domain)?;
                let raster = domain.accessible_to_raster(values);
                let smoothed = self.apply_raster(domain, raster.view())?;
                Ok(domain.raster_to_accessible(smoothed.view()))
            }
        }
    }

    /// Smooths habitable-indexed values and returns the habitable rows of the
    /// result. Mass landing on accessible but uninhabitable cells is dropped.
    pub fn apply_habitable(
        &self,
        domain: &SpatialDomain,
        values: ArrayView2<'_, f64>,
        backend: Backend,
    ) -> Result<Array2<f64>, StageError> {
        let expected = domain.n_habitable();
        if values.nrows() != expected {
            return Err(ConfigurationError::OperatorInputShape {
                expected,
                found: values.nrows(),
            }
            .into());
        }
        match (self, backend) {
            (MigrationOperator::Identity, _) => Ok(values.to_owned()),
            (MigrationOperator::Bound(bound), Backend::Matrix) if bound.template.steps.is_none() => {
                bound.check_layout(domain)?;
                let smoothed = bound.from_habitable.mul_dense(values);
                Ok(domain.accessible_to_habitable(smoothed.view()))
            }
            _ => {
                let spread = domain.habitable_to_accessible(values);
                let smoothed = self.apply(domain, spread.view(), backend)?;
                Ok(domain.accessible_to_habitable(smoothed.view()))
            }
        }
    }
}

/// Mixes repeated applications of `one_step` by the n-step weights.
///
/// `M^k x` is obtained by applying `one_step` k times; no matrix power is
/// ever formed.
fn mix_steps(
    steps: Option<&[f64]>,
    x: ArrayView2<'_, f64>,
    one_step: impl Fn(ArrayView2<'_, f64>) -> Array2<f64>,
) -> Array2<f64> {
    let Some(steps) = steps else {
        return one_step(x);
    };
    let stay: f64 = 1.0 - steps.iter().sum::<f64>();
    let mut out = if stay == 0.0 {
        Array2::zeros(x.raw_dim())
    } else {
        x.mapv(|v| v * stay)
    };
    let mut current = x.to_owned();
    for &weight in steps {
        current = one_step(current.view());
        if weight != 0.0 {
            out.scaled_add(weight, &current);
        }
    }
    out
}

/// Rescales a row to sum to `target`. Returns `false` for zero rows, which
/// are left untouched.
fn normalize_row(row: &mut [(usize, f64)], target: Option<f64>) -> bool {
    let sum: f64 = row.iter().map(|&(_, w)| w).sum();
    if sum <= 0.0 {
        return false;
    }
    if let Some(target) = target {
        let factor = target / sum;
        for (_, w) in row.iter_mut() {
            *w *= factor;
        }
    }
    true
}

/// Weighted neighbours of one raster cell, found by scanning a square window.
///
/// Entries are keyed by raster index and ordered row-major, which matches the
/// accessible ordering used by the matrix backend.
fn raster_neighbours(kernel: &Kernel, domain: &SpatialDomain, cell: usize) -> Vec<(usize, f64)> {
    let geometry = domain.geometry();
    let radius = kernel.radius();
    let extent = window_extent(radius, geometry.resolution);
    let (row, col) = geometry.row_col(cell);
    let centre = geometry.cell_center(cell);

    let row_lo = row.saturating_sub(extent);
    let row_hi = row.saturating_add(extent).min(geometry.nrows - 1);
    let col_lo = col.saturating_sub(extent);
    let col_hi = col.saturating_add(extent).min(geometry.ncols - 1);

    let mut neighbours = Vec::new();
    for r in row_lo..=row_hi {
        for c in col_lo..=col_hi {
            let other = geometry.index(r, c);
            if domain.accessible_index(other).is_none() {
                continue;
            }
            let distance = cell_distance(centre, geometry.cell_center(other));
            if within_radius(distance, radius) {
                let weight = kernel.weight(distance);
                if weight > 0.0 {
                    neighbours.push((other, weight));
                }
            }
        }
    }
    neighbours
}

/// One lazy convolution step over raster-indexed values.
fn convolve_raster(kernel: &Kernel, domain: &SpatialDomain, x: ArrayView2<'_, f64>) -> Array2<f64> {
    let geometry = domain.geometry();
    let supported = has_support(kernel.radius(), geometry.resolution);
    let mut out = Array2::from_elem(x.raw_dim(), f64::NAN);

    Zip::indexed(out.rows_mut()).par_for_each(|cell, mut out_row| {
        if domain.accessible_index(cell).is_none() {
            return;
        }
        out_row.fill(0.0);
        if !supported {
            return;
        }
        let mut neighbours = raster_neighbours(kernel, domain, cell);
        if !normalize_row(&mut neighbours, kernel.normalization()) {
            debug!(cell, "raster convolution row has no neighbours");
            return;
        }
        for (other, weight) in neighbours {
            out_row.scaled_add(weight, &x.row(other));
        }
    });
    out
}

/// Builds the sparse weight matrix of `kernel` over the accessible cells.
fn build_matrix(kernel: &Kernel, domain: &SpatialDomain) -> Result<SparseMatrix, KdTreeError> {
    let n = domain.n_accessible();
    let radius = kernel.radius();
    if !has_support(radius, domain.geometry().resolution) {
        warn!(
            radius,
            resolution = domain.geometry().resolution,
            cells = n,
            "kernel radius is shorter than one grid step; every operator row is zero"
        );
        return Ok(SparseMatrix::from_rows(n, vec![Vec::new(); n]));
    }

    let index = CellIndex::build(domain)?;
    let rows: Vec<(Vec<(usize, f64)>, bool)> = (0..n)
        .into_par_iter()
        .map(|a| -> Result<(Vec<(usize, f64)>, bool), KdTreeError> {
            let mut row: Vec<(usize, f64)> = index
                .query_within(a, radius)?
                .into_iter()
                .map(|(distance, b)| (b, kernel.weight(distance)))
                .filter(|&(_, w)| w > 0.0)
                .collect();
            let nonzero = normalize_row(&mut row, kernel.normalization());
            Ok((row, nonzero))
        })
        .collect::<Result<_, KdTreeError>>()?;

    let zero_rows = rows.iter().filter(|(_, nonzero)| !nonzero).count();
    if zero_rows > 0 {
        warn!(
            zero_rows,
            cells = n,
            "migration operator has rows without neighbours; they stay zero"
        );
    }
    Ok(SparseMatrix::from_rows(
        n,
        rows.into_iter().map(|(row, _)| row).collect(),
    ))
}

/// Keeps only the habitable columns of `matrix`, renumbered in habitable order.
fn habitable_block(matrix: &SparseMatrix, domain: &SpatialDomain) -> SparseMatrix {
    let mut column_of = vec![None; matrix.ncols()];
    for (h, &a) in domain.habitable_in_accessible().iter().enumerate() {
        column_of[a] = Some(h);
    }
    let rows = (0..matrix.nrows())
        .map(|i| {
            let (cols, vals) = matrix.row(i);
            cols.iter()
                .zip(vals)
                .filter_map(|(&c, &v)| column_of[c].map(|h| (h, v)))
                .collect()
        })
        .collect();
    SparseMatrix::from_rows(domain.n_habitable(), rows)
}

fn realize(
    template: &UnboundOperator,
    domain: &SpatialDomain,
) -> Result<MigrationOperator, ConfigurationError> {
    let matrix = build_matrix(&template.kernel, domain).map_err(|e| {
        ConfigurationError::InvalidDomain(format!("failed to index cell centres: {e:?}"))
    })?;
    let from_habitable = habitable_block(&matrix, domain);
    debug!(
        cells = matrix.nrows(),
        nnz = matrix.nnz(),
        "realised migration operator"
    );
    Ok(MigrationOperator::Bound(BoundOperator {
        template: template.clone(),
        layout: domain.layout(),
        matrix: Arc::new(matrix),
        from_habitable: Arc::new(from_habitable),
        habitable_columns: domain.habitable_in_accessible().to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::geometry::RasterGeometry;
    use ndarray::array;

    fn line_domain(n: usize) -> SpatialDomain {
        SpatialDomain::full(RasterGeometry::new(1, n, 1.0).unwrap()).unwrap()
    }

    #[test]
    fn uniform_kernel_averages_neighbours() {
        let kernel = Kernel::new(crate::simulation::kernel::KernelPreset::Uniform, 1.0, 1.0)
            .unwrap()
            .normalized(1.0)
            .unwrap();
        let op = MigrationOperator::new(kernel)
            .bind(&line_domain(3))
            .unwrap();
        let dense = op.as_bound().unwrap().matrix().to_dense();
        let half = 0.5;
        let third = 1.0 / 3.0;
        assert!((dense[[0, 0]] - half).abs() < 1e-12);
        assert!((dense[[1, 2]] - third).abs() < 1e-12);
        assert_eq!(dense[[0, 2]], 0.0);
    }

    #[test]
    fn steps_mix_repeated_applications() {
        let m = SparseMatrix::from_rows(2, vec![vec![(1, 1.0)], vec![(0, 1.0)]]);
        let x = array![[1.0], [0.0]];
        let y = mix_steps(Some(&[0.25, 0.5]), x.view(), |v| m.mul_dense(v));
        // 0.25 x + 0.25 Mx + 0.5 M^2 x
        assert_eq!(y, array![[0.75], [0.25]]);
    }

    #[test]
    fn zero_rows_are_not_normalised() {
        let mut row: Vec<(usize, f64)> = Vec::new();
        assert!(!normalize_row(&mut row, Some(1.0)));
        let mut row = vec![(0, 2.0), (1, 6.0)];
        assert!(normalize_row(&mut row, Some(2.0)));
        assert_eq!(row, vec![(0, 0.5), (1, 1.5)]);
    }
}
