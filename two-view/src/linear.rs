use float_ord::FloatOrd;
use nalgebra::{Matrix3, SMatrix, SVector};

pub(crate) type Row = SVector<f64, 9>;

/// Normal equations `A^T A` of a homogeneous system with nine unknowns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NormalEquations {
    ata: SMatrix<f64, 9, 9>,
    rows: usize,
}

impl NormalEquations {
    pub(crate) fn new() -> Self {
        Self {
            ata: SMatrix::zeros(),
            rows: 0,
        }
    }

    pub(crate) fn push(&mut self, row: &Row) {
        self.ata += row * row.transpose();
        self.rows += 1;
    }

    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    /// The `N` right singular vectors of `A` with the smallest singular
    /// values, smallest first.
    pub(crate) fn null_space<const N: usize>(
        &self,
        epsilon: f64,
        iterations: usize,
    ) -> Option<[Matrix3<f64>; N]> {
        let eigens = self.ata.try_symmetric_eigen(epsilon, iterations)?;
        let mut order = [0usize, 1, 2, 3, 4, 5, 6, 7, 8];
        order.sort_unstable_by_key(|&ix| FloatOrd(eigens.eigenvalues[ix]));
        let mut out = [Matrix3::zeros(); N];
        for (matrix, &ix) in out.iter_mut().zip(&order) {
            let vector: Row = eigens.eigenvectors.column(ix).into_owned();
            *matrix = Matrix3::from_row_slice(vector.as_slice());
        }
        Some(out)
    }
}
