//! Spatial indexing of accessible cell centres for radius queries.

use kdtree::distance::squared_euclidean;
use kdtree::{ErrorKind as KdTreeError, KdTree};

use super::geometric_utils::within_radius;
use super::geometry::SpatialDomain;

/// Type alias for the 2D KD-tree over cell centres, keyed by accessible index.
pub type Tree2D = KdTree<f64, usize, [f64; 2]>;

/// Result of a spatial radius query: (distance, accessible index) pairs.
pub type SpatialQueryResult = Vec<(f64, usize)>;

/// KD-tree over the centres of the accessible cells of a domain.
pub struct CellIndex {
    tree: Tree2D,
    centres: Vec<[f64; 2]>,
}

impl CellIndex {
    /// Builds the index for every accessible cell of `domain`.
    pub fn build(domain: &SpatialDomain) -> Result<Self, KdTreeError> {
        let geometry = domain.geometry();
        let centres: Vec<[f64; 2]> = domain
            .accessible()
            .iter()
            .map(|&cell| {
                let p = geometry.cell_center(cell);
                [p.x(), p.y()]
            })
            .collect();
        let tree = build_tree(&centres)?;
        Ok(Self { tree, centres })
    }

    /// Accessible cells whose centre lies within `radius` of accessible cell
    /// `from`, including `from` itself. Distances are Euclidean, not squared.
    pub fn query_within(&self, from: usize, radius: f64) -> Result<SpatialQueryResult, KdTreeError> {
        // Slightly widened so cells exactly on the cutoff survive rounding;
        // the exact predicate is applied afterwards.
        let search = (radius * (1.0 + 1e-6)).powi(2);
        let mut found: SpatialQueryResult = self
            .tree
            .within(&self.centres[from], search, &squared_euclidean)?
            .into_iter()
            .map(|(dist_sq, &idx)| (dist_sq.sqrt(), idx))
            .filter(|&(dist, _)| within_radius(dist, radius))
            .collect();
        found.sort_unstable_by_key(|&(_, idx)| idx);
        Ok(found)
    }

    /// Number of indexed cells.
    pub fn len(&self) -> usize {
        self.centres.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }
}

/// Helper function to build a KD-tree from a list of points.
fn build_tree(points: &[[f64; 2]]) -> Result<Tree2D, KdTreeError> {
    let mut tree = KdTree::with_capacity(2, points.len().max(1));
    for (i, point) in points.iter().enumerate() {
        tree.add(*point, i)?;
    }
    Ok(tree)
}
