//! Floating-point comparisons and column-matrix helpers.

use faer::Mat;

/// Tolerance for clock and remainder comparisons.
pub const NUMERICAL_ZERO_DIFFERENCE: f64 = 1.0e-14;

pub fn equals(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
}

pub fn greater(a: f64, b: f64, eps: f64) -> bool {
    a - b > eps
}

pub fn greater_equals(a: f64, b: f64, eps: f64) -> bool {
    a - b >= -eps
}

pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Copy of column `j`.
pub fn column(m: &Mat<f64>, j: usize) -> Vec<f64> {
    (0..m.nrows()).map(|i| m[(i, j)]).collect()
}

/// Stack value slices into one vector, preserving order.
pub fn concat<I, S>(parts: I) -> Vec<f64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[f64]>,
{
    let mut stacked = Vec::new();
    for part in parts {
        stacked.extend_from_slice(part.as_ref());
    }
    stacked
}

/// Append `col` as the new last column. An empty matrix adopts the column height.
pub fn append_column(m: &mut Mat<f64>, col: &[f64]) {
    let old = std::mem::replace(m, Mat::new());
    let nrows = if old.ncols() == 0 { col.len() } else { old.nrows() };
    assert_eq!(nrows, col.len(), "column height mismatch");
    let ncols = old.ncols();
    *m = Mat::from_fn(
        nrows,
        ncols + 1,
        |i, j| if j < ncols { old[(i, j)] } else { col[i] },
    );
}

/// Append `count` zero columns of height `nrows`.
pub fn append_zero_columns(m: &mut Mat<f64>, nrows: usize, count: usize) {
    let zeros = vec![0.0; nrows];
    for _ in 0..count {
        append_column(m, &zeros);
    }
}

/// Shift all columns one to the right (dropping the last) and set column 0 to `v`.
pub fn shift_set_first(m: &mut Mat<f64>, v: &[f64]) {
    let (nrows, ncols) = (m.nrows(), m.ncols());
    assert!(ncols > 0 && nrows == v.len(), "shape mismatch");
    for j in (1..ncols).rev() {
        for i in 0..nrows {
            m[(i, j)] = m[(i, j - 1)];
        }
    }
    for i in 0..nrows {
        m[(i, 0)] = v[i];
    }
}
