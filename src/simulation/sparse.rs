//! Compressed sparse row matrices for precomputed migration weights.

use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Row-major sparse matrix (CSR layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Assembles a matrix from per-row `(column, value)` entries.
    ///
    /// Entries of a row must reference columns below `ncols`; zero values are
    /// dropped.
    pub fn from_rows(ncols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let nrows = rows.len();
        let nnz = rows.iter().map(Vec::len).sum();
        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        indptr.push(0);
        for row in rows {
            for (col, value) in row {
                debug_assert!(col < ncols, "column {col} out of bounds");
                if value != 0.0 {
                    indices.push(col);
                    values.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            nrows,
            ncols,
            indptr,
            indices,
            values,
        }
    }

    /// Square identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_rows(n, (0..n).map(|i| vec![(i, 1.0)]).collect())
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let span = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[span.clone()], &self.values[span])
    }

    /// Value at (`i`, `j`), zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.iter()
            .position(|&c| c == j)
            .map_or(0.0, |pos| vals[pos])
    }

    /// Sum of every row.
    pub fn row_sums(&self) -> Array1<f64> {
        (0..self.nrows)
            .map(|i| self.row(i).1.iter().sum())
            .collect()
    }

    /// Dense copy, mostly useful in tests.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                dense[[i, j]] = v;
            }
        }
        dense
    }

    /// Computes `self * x` for a multi-column right-hand side.
    ///
    /// Output rows are filled in parallel; each worker only reads `x` and
    /// writes its own row.
    pub fn mul_dense(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        assert_eq!(
            x.nrows(),
            self.ncols,
            "sparse product with mismatched inner dimension"
        );
        let mut out = Array2::zeros((self.nrows, x.ncols()));
        Zip::indexed(out.rows_mut()).par_for_each(|i, mut out_row| {
            let (cols, vals) = self.row(i);
            for (&j, &w) in cols.iter().zip(vals) {
                out_row.scaled_add(w, &x.row(j));
            }
        });
        out
    }
}
