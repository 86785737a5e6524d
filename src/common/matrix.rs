use num::traits::{Float, Zero};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// A 3×3 matrix, used for position and velocity covariances.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mat3<T> {
    pub(crate) data: [[T; 3]; 3],
}

impl<T> Mat3<T>
where T: Copy
{
    pub fn new(data: [[T; 3]; 3]) -> Self { Mat3 { data } }
}

impl<T> Mat3<T>
where T: Copy + Zero
{
    pub fn zero() -> Self { Self { data: [[T::zero(); 3]; 3] } }

    /// Diagonal matrix with the given entries.
    pub fn diagonal(diag: [T; 3]) -> Self {
        let mut result = Self::zero();
        for (i, val) in diag.into_iter().enumerate() {
            result.data[i][i] = val;
        }
        result
    }

    /// Sum of the diagonal entries.
    pub fn trace(&self) -> T { self.data[0][0] + self.data[1][1] + self.data[2][2] }
}

impl<T> Mat3<T>
where T: Float
{
    /// Multiplies every entry with `factor`.
    pub fn scale(&self, factor: T) -> Self { Mat3::new(self.data.map(|row| row.map(|v| v * factor))) }

    pub fn determinant(&self) -> T {
        let m = &self.data;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    pub fn is_finite(&self) -> bool { self.data.iter().flatten().all(|v| v.is_finite()) }

    /// Checks whether the matrix is a valid covariance, i.e. symmetric and
    /// positive-semidefinite.
    ///
    /// A symmetric matrix is PSD iff all of its principal minors (not only the leading
    /// ones) are non-negative; `tol` absorbs rounding in the sensor pipeline.
    pub fn is_positive_semidefinite(&self, tol: T) -> bool {
        if !self.is_finite() {
            return false;
        }
        let m = &self.data;
        let symmetric = (0..3).all(|i| (0..3).all(|j| (m[i][j] - m[j][i]).abs() <= tol));
        if !symmetric {
            return false;
        }
        let diag_ok = (0..3).all(|i| m[i][i] >= -tol);
        let minors_ok = [(0, 1), (0, 2), (1, 2)]
            .iter()
            .all(|&(a, b)| m[a][a] * m[b][b] - m[a][b] * m[b][a] >= -tol);
        diag_ok && minors_ok && self.determinant() >= -tol
    }
}

impl<T> Add for Mat3<T>
where T: Copy + Add<Output = T>
{
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let mut result = self.data;
        for (i, row) in result.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = self.data[i][j] + rhs.data[i][j];
            }
        }
        Mat3::new(result)
    }
}
