use nalgebra::DMatrix;

/// Reduced row echelon form of the augmented system [a | rhs] with partial pivoting.
/// Rows that turn out linearly dependent are dropped, so the returned matrix has rank(a) rows.
pub fn linear_rref(a: &DMatrix<f64>, rhs: &[f64], tol: f64) -> (DMatrix<f64>, Vec<f64>) {
    let (nrows, ncols) = a.shape();
    let mut aug = DMatrix::zeros(nrows, ncols + 1);
    aug.view_mut((0, 0), (nrows, ncols)).copy_from(a);
    for (i, r) in rhs.iter().enumerate() {
        aug[(i, ncols)] = *r;
    }

    let mut pivot_row = 0;
    for col in 0..ncols {
        if pivot_row == nrows {
            break;
        }
        let (best, best_val) = (pivot_row..nrows)
            .map(|r| (r, aug[(r, col)].abs()))
            .fold((pivot_row, 0.0), |acc, x| if x.1 > acc.1 { x } else { acc });
        if best_val <= tol {
            continue;
        }
        aug.swap_rows(pivot_row, best);
        let p = aug[(pivot_row, col)];
        for c in 0..=ncols {
            aug[(pivot_row, c)] /= p;
        }
        for r in 0..nrows {
            if r != pivot_row {
                let factor = aug[(r, col)];
                if factor != 0.0 {
                    for c in 0..=ncols {
                        aug[(r, c)] -= factor * aug[(pivot_row, c)];
                    }
                }
            }
        }
        pivot_row += 1;
    }

    let reduced = aug.view((0, 0), (pivot_row, ncols)).into_owned();
    let reduced_rhs = (0..pivot_row).map(|r| aug[(r, ncols)]).collect();
    (reduced, reduced_rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rref_drops_dependent_rows() {
        // third row = first + second
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0]);
        let (r, rhs) = linear_rref(&a, &[1.0, 2.0, 3.0], 1e-12);
        assert_eq!(r.nrows(), 2);
        assert_relative_eq!(r[(0, 0)], 1.0);
        assert_relative_eq!(r[(0, 2)], 1.0);
        assert_relative_eq!(r[(1, 1)], 1.0);
        assert_relative_eq!(rhs[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(rhs[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rref_full_rank() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let (r, rhs) = linear_rref(&a, &[3.0, 5.0], 1e-12);
        assert_eq!(r.nrows(), 2);
        assert_relative_eq!(r[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[(0, 1)], 0.0, epsilon = 1e-12);
        // x = 0.8, y = 1.4
        assert_relative_eq!(rhs[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(rhs[1], 1.4, epsilon = 1e-12);
    }
}
