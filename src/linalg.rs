//! Square-root covariance helpers.
//!
//! All factors are lower triangular: a factor `S` stands for the covariance
//! `S·Sᵀ`.

use crate::{FusionError, Result};
use nalgebra::{DMatrix, SMatrix, SVector};

/// Lower Cholesky factor of a symmetric positive *semi*-definite matrix.
///
/// Pivots that vanish (relative to the largest diagonal entry) produce zero
/// columns instead of failing, so rank-deficient noise models factor cleanly.
pub fn psd_cholesky<const D: usize>(m: &SMatrix<f64, D, D>) -> Result<SMatrix<f64, D, D>> {
    let scale = (0..D).map(|i| m[(i, i)].abs()).fold(0.0_f64, f64::max);
    let tolerance = 1.0e-12 * scale.max(f64::MIN_POSITIVE);
    let mut l = SMatrix::<f64, D, D>::zeros();

    for j in 0..D {
        let mut pivot = m[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)];
        }

        if !pivot.is_finite() || pivot < -tolerance {
            return Err(FusionError::Numerical("cholesky of an indefinite matrix"));
        }
        if pivot <= tolerance {
            continue;
        }

        let diagonal = pivot.sqrt();
        l[(j, j)] = diagonal;
        for i in (j + 1)..D {
            let mut sum = m[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = sum / diagonal;
        }
    }

    Ok(l)
}

/// Lower factor `S` with `S·Sᵀ = Aᵀ·A` for a tall matrix `A` (rows ≥ `D`),
/// taken from the `R` of a QR decomposition.
pub fn qr_lower_factor<const D: usize>(stacked: DMatrix<f64>) -> Result<SMatrix<f64, D, D>> {
    if stacked.ncols() != D || stacked.nrows() < D {
        return Err(FusionError::Numerical("qr input shape"));
    }

    let r = stacked.qr().r();
    let mut s = SMatrix::<f64, D, D>::zeros();
    for i in 0..D {
        // Row sign flips leave RᵀR unchanged; keep the diagonal non-negative.
        let sign = if r[(i, i)] < 0.0 { -1.0 } else { 1.0 };
        for j in i..D {
            s[(j, i)] = sign * r[(i, j)];
        }
    }

    if s.iter().all(|v| v.is_finite()) {
        Ok(s)
    } else {
        Err(FusionError::Numerical("qr decomposition"))
    }
}

/// Turn `S` into the factor of `S·Sᵀ + sigma·v·vᵀ`.
///
/// A negative `sigma` is a downdate and fails if the result would no longer
/// be positive definite.
pub fn rank_one_update<const D: usize>(
    s: &mut SMatrix<f64, D, D>,
    v: &SVector<f64, D>,
    sigma: f64,
) -> Result<()> {
    if sigma == 0.0 {
        return Ok(());
    }
    if !sigma.is_finite() {
        return Err(FusionError::Numerical("rank-one update weight"));
    }

    let mut x = v * sigma.abs().sqrt();
    let downdate = sigma < 0.0;

    for k in 0..D {
        let diagonal = s[(k, k)];
        let xk = x[k];
        if xk == 0.0 {
            continue;
        }

        if downdate {
            let r_squared = diagonal * diagonal - xk * xk;
            if r_squared.is_nan() || r_squared <= 0.0 || diagonal <= 0.0 {
                return Err(FusionError::Numerical("indefinite rank-one downdate"));
            }
            let r = r_squared.sqrt();
            let c = r / diagonal;
            let sn = xk / diagonal;
            s[(k, k)] = r;
            for i in (k + 1)..D {
                s[(i, k)] = (s[(i, k)] - sn * x[i]) / c;
                x[i] = c * x[i] - sn * s[(i, k)];
            }
        } else {
            let r = diagonal.hypot(xk);
            if r == 0.0 {
                continue;
            }
            let c = diagonal / r;
            let sn = xk / r;
            s[(k, k)] = r;
            for i in (k + 1)..D {
                let lik = s[(i, k)];
                s[(i, k)] = c * lik + sn * x[i];
                x[i] = c * x[i] - sn * lik;
            }
        }
    }

    if s.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FusionError::Numerical("rank-one update"))
    }
}

/// Solve `K·(S_y·S_yᵀ) = P_xz` for `K` with two triangular substitutions.
pub fn solve_gain<const N: usize, const M: usize>(
    s_y: &SMatrix<f64, M, M>,
    cross_covariance: &SMatrix<f64, N, M>,
) -> Result<SMatrix<f64, N, M>> {
    let forward = s_y
        .solve_lower_triangular(&cross_covariance.transpose())
        .ok_or(FusionError::Numerical("kalman gain forward substitution"))?;
    let gain_t = s_y
        .transpose()
        .solve_upper_triangular(&forward)
        .ok_or(FusionError::Numerical("kalman gain back substitution"))?;

    if gain_t.iter().all(|v| v.is_finite()) {
        Ok(gain_t.transpose())
    } else {
        Err(FusionError::Numerical("kalman gain"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn spd() -> Matrix3<f64> {
        Matrix3::new(4.0, 2.0, 0.6, 2.0, 5.0, 1.0, 0.6, 1.0, 3.0)
    }

    #[test]
    fn test_cholesky_matches_input() {
        let l = psd_cholesky(&spd()).unwrap();
        assert_relative_eq!(l * l.transpose(), spd(), epsilon = 1e-12);
        assert_eq!(l[(0, 1)], 0.0);
    }

    #[test]
    fn test_cholesky_rank_deficient() {
        let g = Vector3::new(0.5, 1.0, 2.0);
        let m = g * g.transpose() * 3.0;
        let l = psd_cholesky(&m).unwrap();
        assert_relative_eq!(l * l.transpose(), m, epsilon = 1e-12);
        assert_eq!(l[(1, 1)], 0.0);
        assert_eq!(l[(2, 2)], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(psd_cholesky(&m).is_err());
    }

    #[test]
    fn test_qr_lower_factor() {
        let a = DMatrix::from_row_slice(
            4,
            3,
            &[1.0, 2.0, 0.0, -1.0, 0.5, 3.0, 0.0, 1.0, 1.0, 2.0, -2.0, 0.5],
        );
        let expected = a.transpose() * &a;
        let s: Matrix3<f64> = qr_lower_factor(a).unwrap();
        let product = s * s.transpose();
        for i in 0..3 {
            assert!(s[(i, i)] >= 0.0);
            for j in 0..3 {
                assert_relative_eq!(product[(i, j)], expected[(i, j)], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_rank_one_update_and_downdate() {
        let l = psd_cholesky(&spd()).unwrap();
        let v = Vector3::new(0.3, -1.0, 0.7);

        let mut up = l;
        rank_one_update(&mut up, &v, 2.0).unwrap();
        assert_relative_eq!(up * up.transpose(), spd() + v * v.transpose() * 2.0, epsilon = 1e-10);

        let mut down = up;
        rank_one_update(&mut down, &v, -2.0).unwrap();
        assert_relative_eq!(down * down.transpose(), spd(), epsilon = 1e-10);
    }

    #[test]
    fn test_update_fills_zero_pivot() {
        let mut s = Matrix3::<f64>::zeros();
        s[(0, 0)] = 1.0;
        let v = Vector3::new(0.0, 1.0, 0.0);
        rank_one_update(&mut s, &v, 1.0).unwrap();
        assert_relative_eq!(s * s.transpose(), Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_indefinite_downdate_fails() {
        let mut s = Matrix3::<f64>::identity();
        let v = Vector3::new(2.0, 0.0, 0.0);
        assert!(matches!(
            rank_one_update(&mut s, &v, -1.0),
            Err(FusionError::Numerical(_))
        ));
    }

    #[test]
    fn test_solve_gain() {
        let s_y = psd_cholesky(&spd()).unwrap();
        let pxz = nalgebra::Matrix2x3::new(1.0, 0.0, 2.0, -1.0, 3.0, 0.5);
        let gain = solve_gain(&s_y, &pxz).unwrap();
        assert_relative_eq!(gain * spd(), pxz, epsilon = 1e-10);
    }

    #[test]
    fn test_solve_gain_singular() {
        let s_y = Matrix3::<f64>::zeros();
        let pxz = nalgebra::Matrix2x3::<f64>::zeros();
        assert!(solve_gain(&s_y, &pxz).is_err());
    }
}
