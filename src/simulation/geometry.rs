//! Raster geometry and the accessible / habitable partition of its cells.
//!
//! Three index spaces coexist:
//!
//! - raster indices, row-major over every cell of the grid;
//! - accessible indices, positions in the sorted list of accessible cells;
//! - habitable indices, positions in the sorted list of habitable cells.
//!
//! Values move between them only through the conversion helpers on
//! [`SpatialDomain`]. Cells outside the accessible set carry `NaN` in the
//! raster space.

use std::sync::Arc;

use geo::Point;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

/// Size, resolution and placement of a regular grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGeometry {
    /// Number of rows.
    pub nrows: usize,
    /// Number of columns.
    pub ncols: usize,
    /// Side length of one square cell.
    pub resolution: f64,
    /// Coordinates of the upper-left corner of cell (0, 0).
    pub origin: (f64, f64),
}

impl RasterGeometry {
    /// Creates a geometry with its origin at (0, 0).
    pub fn new(nrows: usize, ncols: usize, resolution: f64) -> Result<Self, ConfigurationError> {
        let geometry = Self {
            nrows,
            ncols,
            resolution,
            origin: (0.0, 0.0),
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks that the grid is non-empty with a positive, finite resolution.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.nrows == 0 || self.ncols == 0 {
            return Err(ConfigurationError::InvalidDomain(format!(
                "raster of {}x{} cells is empty",
                self.nrows, self.ncols
            )));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(ConfigurationError::InvalidDomain(format!(
                "resolution {} must be positive",
                self.resolution
            )));
        }
        if !(self.origin.0.is_finite() && self.origin.1.is_finite()) {
            return Err(ConfigurationError::InvalidDomain(
                "origin must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of raster cells.
    pub fn cell_count(&self) -> usize {
        self.nrows * self.ncols
    }

    /// Row-major raster index of (`row`, `col`).
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.ncols + col
    }

    /// (row, col) of a raster index.
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.ncols, index % self.ncols)
    }

    /// Centre coordinates of a cell. Rows grow downwards from the origin.
    pub fn cell_center(&self, index: usize) -> Point<f64> {
        let (row, col) = self.row_col(index);
        Point::new(
            self.origin.0 + (col as f64 + 0.5) * self.resolution,
            self.origin.1 - (row as f64 + 0.5) * self.resolution,
        )
    }
}

/// Identifies the accessible-cell layout an operator was realised against.
#[derive(Debug, Clone)]
pub struct CellLayout {
    geometry: RasterGeometry,
    accessible: Arc<[usize]>,
}

impl CellLayout {
    /// Raster geometry of the layout.
    pub fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    /// Number of accessible cells.
    pub fn len(&self) -> usize {
        self.accessible.len()
    }

    /// Whether the layout has no accessible cells.
    pub fn is_empty(&self) -> bool {
        self.accessible.is_empty()
    }
}

impl PartialEq for CellLayout {
    fn eq(&self, other: &Self) -> bool {
        self.geometry == other.geometry
            && (Arc::ptr_eq(&self.accessible, &other.accessible)
                || self.accessible == other.accessible)
    }
}

/// Raster geometry plus the accessible and habitable cell sets.
///
/// Immutable once built; populations share it through an `Arc`.
#[derive(Debug, Clone)]
pub struct SpatialDomain {
    geometry: RasterGeometry,
    accessible: Arc<[usize]>,
    habitable: Vec<usize>,
    habitable_in_accessible: Vec<usize>,
    raster_to_accessible: Vec<Option<usize>>,
}

impl SpatialDomain {
    /// Builds a domain from explicit raster index sets.
    ///
    /// Both lists are sorted and deduplicated. Every habitable cell must also
    /// be accessible.
    pub fn new(
        geometry: RasterGeometry,
        mut accessible: Vec<usize>,
        mut habitable: Vec<usize>,
    ) -> Result<Self, ConfigurationError> {
        geometry.validate()?;
        accessible.sort_unstable();
        accessible.dedup();
        habitable.sort_unstable();
        habitable.dedup();

        let cells = geometry.cell_count();
        if let Some(&bad) = accessible.iter().find(|&&i| i >= cells) {
            return Err(ConfigurationError::InvalidDomain(format!(
                "accessible cell {bad} outside a raster of {cells} cells"
            )));
        }

        let mut raster_to_accessible = vec![None; cells];
        for (position, &cell) in accessible.iter().enumerate() {
            raster_to_accessible[cell] = Some(position);
        }

        let habitable_in_accessible = habitable
            .iter()
            .map(|&cell| {
                raster_to_accessible
                    .get(cell)
                    .copied()
                    .flatten()
                    .ok_or_else(|| {
                        ConfigurationError::InvalidDomain(format!(
                            "habitable cell {cell} is not accessible"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            geometry,
            accessible: accessible.into(),
            habitable,
            habitable_in_accessible,
            raster_to_accessible,
        })
    }

    /// Builds a domain from a habitat raster.
    ///
    /// `NaN` marks inaccessible cells, any finite value is accessible, and
    /// finite values above zero are habitable.
    pub fn from_habitat(
        geometry: RasterGeometry,
        habitat: ArrayView2<'_, f64>,
    ) -> Result<Self, ConfigurationError> {
        if habitat.dim() != (geometry.nrows, geometry.ncols) {
            return Err(ConfigurationError::InvalidDomain(format!(
                "habitat raster has shape {:?}, geometry is {}x{}",
                habitat.dim(),
                geometry.nrows,
                geometry.ncols
            )));
        }
        let mut accessible = Vec::new();
        let mut habitable = Vec::new();
        for ((row, col), &value) in habitat.indexed_iter() {
            if value.is_nan() {
                continue;
            }
            let index = geometry.index(row, col);
            accessible.push(index);
            if value > 0.0 {
                habitable.push(index);
            }
        }
        Self::new(geometry, accessible, habitable)
    }

    /// Domain in which every raster cell is accessible and habitable.
    pub fn full(geometry: RasterGeometry) -> Result<Self, ConfigurationError> {
        let all: Vec<usize> = (0..geometry.cell_count()).collect();
        Self::new(geometry, all.clone(), all)
    }

    /// Raster geometry.
    pub fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    /// Accessible raster indices, ascending.
    pub fn accessible(&self) -> &[usize] {
        &self.accessible
    }

    /// Habitable raster indices, ascending.
    pub fn habitable(&self) -> &[usize] {
        &self.habitable
    }

    /// Position of each habitable cell within the accessible list.
    pub fn habitable_in_accessible(&self) -> &[usize] {
        &self.habitable_in_accessible
    }

    /// Number of accessible cells.
    pub fn n_accessible(&self) -> usize {
        self.accessible.len()
    }

    /// Number of habitable cells.
    pub fn n_habitable(&self) -> usize {
        self.habitable.len()
    }

    /// Accessible index of a raster cell, if it is accessible.
    pub fn accessible_index(&self, raster_index: usize) -> Option<usize> {
        self.raster_to_accessible
            .get(raster_index)
            .copied()
            .flatten()
    }

    /// Layout tag used to tie realised operators to this domain.
    pub fn layout(&self) -> CellLayout {
        CellLayout {
            geometry: self.geometry,
            accessible: Arc::clone(&self.accessible),
        }
    }

    /// Spreads habitable rows into accessible space, zero elsewhere.
    pub fn habitable_to_accessible(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_accessible(), values.ncols()));
        for (row, &target) in values.rows().into_iter().zip(&self.habitable_in_accessible) {
            out.row_mut(target).assign(&row);
        }
        out
    }

    /// Selects the habitable rows of an accessible-space matrix.
    pub fn accessible_to_habitable(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        values.select(Axis(0), &self.habitable_in_accessible)
    }

    /// Spreads accessible rows into raster space, `NaN` elsewhere.
    pub fn accessible_to_raster(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::from_elem((self.geometry.cell_count(), values.ncols()), f64::NAN);
        for (row, &target) in values.rows().into_iter().zip(self.accessible.iter()) {
            out.row_mut(target).assign(&row);
        }
        out
    }

    /// Selects the accessible rows of a raster-space matrix.
    pub fn raster_to_accessible(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        values.select(Axis(0), &self.accessible)
    }

    /// Spreads habitable rows into raster space; accessible but uninhabitable
    /// cells get zero, inaccessible cells `NaN`.
    pub fn habitable_to_raster(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        self.accessible_to_raster(self.habitable_to_accessible(values).view())
    }

    /// Selects the habitable rows of a raster-space matrix.
    pub fn raster_to_habitable(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        values.select(Axis(0), &self.habitable)
    }
}
