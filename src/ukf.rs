//! Square-root unscented Kalman filter over the pose state.
//!
//! Follows the square-root formulation of van der Merwe & Wan: the state
//! covariance is carried as a lower factor `S` and rebuilt from sigma-point
//! deviations with a QR decomposition plus a rank-one correction for the
//! central point.

use crate::config::FilterTuning;
use crate::linalg::{qr_lower_factor, rank_one_update, solve_gain};
use crate::manifold::{addition, difference, weighted_average, RotationBlock};
use crate::measurement::MeasurementModel;
use crate::process::ProcessModel;
use crate::state::{StateMatrix, StateVector, SIGMA_COUNT, STATE_DIM, STATE_ROTATION};
use crate::{FusionError, Result};
use nalgebra::{DMatrix, SMatrix, SVector};

const DEGENERATE_EPSILON: f64 = 1.0e-9;

/// Unscented transform weights for an `n`-dimensional state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaWeights {
    pub lambda: f64,
    /// Spread applied to the columns of `S`: `sqrt(n + lambda)`.
    pub gamma: f64,
    pub mean_center: f64,
    pub covariance_center: f64,
    /// Shared mean and covariance weight of every non-central point.
    pub other: f64,
}

impl SigmaWeights {
    pub fn new(tuning: &FilterTuning, n: usize) -> Result<Self> {
        let FilterTuning { alpha, beta, kappa } = *tuning;
        if !(alpha.is_finite() && beta.is_finite() && kappa.is_finite()) {
            return Err(FusionError::Configuration(format!(
                "non-finite sigma parameters (alpha={}, beta={}, kappa={})",
                alpha, beta, kappa
            )));
        }

        let n = n as f64;
        if (n + kappa).abs() < DEGENERATE_EPSILON {
            return Err(FusionError::Configuration(format!(
                "state dimension + kappa must be non-zero (kappa={})",
                kappa
            )));
        }

        let lambda = alpha * alpha * (n + kappa) - n;
        let spread = n + lambda;
        if spread.abs() < DEGENERATE_EPSILON {
            return Err(FusionError::Configuration(format!(
                "state dimension + lambda must be non-zero (alpha={}, kappa={})",
                alpha, kappa
            )));
        }
        if spread < 0.0 {
            return Err(FusionError::Configuration(format!(
                "state dimension + lambda must be positive, got {}",
                spread
            )));
        }

        let mean_center = lambda / spread;
        Ok(SigmaWeights {
            lambda,
            gamma: spread.sqrt(),
            mean_center,
            covariance_center: mean_center + (1.0 - alpha * alpha + beta),
            other: 1.0 / (2.0 * spread),
        })
    }

    fn mean_weights(&self) -> [f64; SIGMA_COUNT] {
        let mut weights = [self.other; SIGMA_COUNT];
        weights[0] = self.mean_center;
        weights
    }

    fn covariance_weights(&self) -> [f64; SIGMA_COUNT] {
        let mut weights = [self.other; SIGMA_COUNT];
        weights[0] = self.covariance_center;
        weights
    }
}

/// Sigma points together with the offsets that generated them.
struct SigmaPoints {
    points: Vec<StateVector>,
    offsets: Vec<StateVector>,
}

/// Square-root UKF holding the mean state and its covariance factor.
#[derive(Debug, Clone)]
pub struct SquareRootUkf {
    weights: SigmaWeights,
    mean_weights: [f64; SIGMA_COUNT],
    covariance_weights: [f64; SIGMA_COUNT],
    x: StateVector,
    s: StateMatrix,
}

impl SquareRootUkf {
    /// Build a filter; fails on a degenerate sigma-weight configuration.
    pub fn new(tuning: &FilterTuning) -> Result<Self> {
        let weights = SigmaWeights::new(tuning, STATE_DIM)?;
        Ok(SquareRootUkf {
            weights,
            mean_weights: weights.mean_weights(),
            covariance_weights: weights.covariance_weights(),
            x: StateVector::zeros(),
            s: StateMatrix::identity(),
        })
    }

    /// Reset the mean to `x` and the covariance to identity.
    pub fn init(&mut self, x: StateVector) {
        self.x = x;
        self.s = StateMatrix::identity();
    }

    pub fn weights(&self) -> &SigmaWeights {
        &self.weights
    }

    pub fn state(&self) -> &StateVector {
        &self.x
    }

    /// Replace the mean without touching the covariance.
    pub fn set_state(&mut self, x: StateVector) {
        self.x = x;
    }

    pub fn covariance_sqrt(&self) -> &StateMatrix {
        &self.s
    }

    pub fn covariance(&self) -> StateMatrix {
        self.s * self.s.transpose()
    }

    /// Propagate the estimate through `model`.
    pub fn predict<P: ProcessModel>(&mut self, model: &P) -> Result<&StateVector> {
        let sigma = self.sigma_points();
        let propagated: Vec<StateVector> = sigma.points.iter().map(|p| model.f(p)).collect();

        let mean = weighted_average(&propagated, &self.mean_weights, Some(STATE_ROTATION));
        let deviations: Vec<StateVector> = propagated
            .iter()
            .map(|p| difference(p, &mean, Some(STATE_ROTATION)))
            .collect();
        let s = self.sqrt_covariance(&deviations, model.covariance_sqrt())?;

        self.x = mean;
        self.s = s;
        Ok(&self.x)
    }

    /// Mean of the measurements predicted for the current sigma points.
    pub fn predicted_measurement<const M: usize, H: MeasurementModel<M>>(
        &self,
        model: &H,
    ) -> SVector<f64, M> {
        let sigma = self.sigma_points();
        let predicted: Vec<SVector<f64, M>> = sigma.points.iter().map(|p| model.h(p)).collect();
        weighted_average(&predicted, &self.mean_weights, model.rotation_block())
    }

    /// Fuse the observation `z` using `model`.
    pub fn update<const M: usize, H: MeasurementModel<M>>(
        &mut self,
        model: &H,
        z: &SVector<f64, M>,
    ) -> Result<&StateVector> {
        let rotation: Option<RotationBlock> = model.rotation_block();
        let sigma = self.sigma_points();
        let predicted: Vec<SVector<f64, M>> = sigma.points.iter().map(|p| model.h(p)).collect();

        let y = weighted_average(&predicted, &self.mean_weights, rotation);
        let deviations: Vec<SVector<f64, M>> =
            predicted.iter().map(|p| difference(p, &y, rotation)).collect();
        let s_y = self.sqrt_covariance(&deviations, model.covariance_sqrt())?;

        let mut cross_covariance = SMatrix::<f64, STATE_DIM, M>::zeros();
        for ((offset, deviation), weight) in sigma
            .offsets
            .iter()
            .zip(deviations.iter())
            .zip(self.covariance_weights.iter())
        {
            cross_covariance += offset * deviation.transpose() * *weight;
        }

        let gain = solve_gain(&s_y, &cross_covariance)?;
        let innovation = difference(z, &y, rotation);
        let x = addition(&self.x, &(gain * innovation), Some(STATE_ROTATION));

        let u = gain * s_y;
        let mut s = self.s;
        for j in 0..M {
            rank_one_update(&mut s, &u.column(j).into_owned(), -1.0)?;
        }

        if !x.iter().all(|v| v.is_finite()) {
            return Err(FusionError::Numerical("state correction"));
        }

        self.x = x;
        self.s = s;
        Ok(&self.x)
    }

    fn sigma_points(&self) -> SigmaPoints {
        let mut points = Vec::with_capacity(SIGMA_COUNT);
        let mut offsets = Vec::with_capacity(SIGMA_COUNT);
        points.push(self.x);
        offsets.push(StateVector::zeros());

        for sign in [1.0, -1.0] {
            for i in 0..STATE_DIM {
                let offset: StateVector = self.s.column(i) * (sign * self.weights.gamma);
                points.push(addition(&self.x, &offset, Some(STATE_ROTATION)));
                offsets.push(offset);
            }
        }

        SigmaPoints { points, offsets }
    }

    /// Factor of `Σ Wc·dᵢ·dᵢᵀ + noise_sqrt·noise_sqrtᵀ` for sigma deviations `d`.
    fn sqrt_covariance<const D: usize>(
        &self,
        deviations: &[SVector<f64, D>],
        noise_sqrt: &SMatrix<f64, D, D>,
    ) -> Result<SMatrix<f64, D, D>> {
        let scaled_rows = SIGMA_COUNT - 1;
        let mut stacked = DMatrix::<f64>::zeros(scaled_rows + D, D);
        let scale = self.weights.other.sqrt();

        for (row, deviation) in deviations.iter().skip(1).enumerate() {
            for col in 0..D {
                stacked[(row, col)] = deviation[col] * scale;
            }
        }
        for j in 0..D {
            for col in 0..D {
                stacked[(scaled_rows + j, col)] = noise_sqrt[(col, j)];
            }
        }

        let mut s = qr_lower_factor::<D>(stacked)?;
        rank_one_update(&mut s, &deviations[0], self.weights.covariance_center)?;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::WandMeasurementModel;
    use crate::process::PoseProcessModel;
    use crate::state;
    use crate::types::PoseFilterConstants;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    /// Optical position only, which is linear in the state.
    struct PositionOnly {
        noise_sqrt: Matrix3<f64>,
    }

    impl MeasurementModel<3> for PositionOnly {
        fn h(&self, x: &StateVector) -> Vector3<f64> {
            state::position(x)
        }

        fn covariance_sqrt(&self) -> &Matrix3<f64> {
            &self.noise_sqrt
        }
    }

    fn position_only() -> PositionOnly {
        PositionOnly {
            noise_sqrt: Matrix3::identity() * 0.05,
        }
    }

    #[test]
    fn test_weights_match_unscented_transform() {
        let w = SigmaWeights::new(&FilterTuning::default(), STATE_DIM).unwrap();
        assert_relative_eq!(w.lambda, -1.0);
        assert_relative_eq!(w.gamma, 14.0_f64.sqrt());
        assert_relative_eq!(w.mean_center, -1.0 / 14.0);
        assert_relative_eq!(w.covariance_center, -1.0 / 14.0 + 2.0);
        assert_relative_eq!(w.other, 1.0 / 28.0);

        let total: f64 = w.mean_weights().iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_kappa_rejected() {
        let tuning = FilterTuning {
            kappa: -(STATE_DIM as f64),
            ..FilterTuning::default()
        };
        assert!(matches!(
            SquareRootUkf::new(&tuning),
            Err(FusionError::Configuration(_))
        ));
    }

    #[test]
    fn test_degenerate_lambda_rejected() {
        let tuning = FilterTuning {
            alpha: 0.0,
            ..FilterTuning::default()
        };
        assert!(SigmaWeights::new(&tuning, STATE_DIM).is_err());
    }

    #[test]
    fn test_sigma_points_are_symmetric() {
        let mut ukf = SquareRootUkf::new(&FilterTuning::default()).unwrap();
        let mut x = StateVector::zeros();
        state::set_position(&mut x, &Vector3::new(1.0, 2.0, 3.0));
        ukf.init(x);

        let sigma = ukf.sigma_points();
        assert_eq!(sigma.points.len(), SIGMA_COUNT);
        assert_eq!(sigma.points[0], x);
        let gamma = ukf.weights().gamma;
        assert_relative_eq!(sigma.points[1][state::POSITION_X], 1.0 + gamma);
        assert_relative_eq!(sigma.points[1 + STATE_DIM][state::POSITION_X], 1.0 - gamma);
    }

    #[test]
    fn test_predict_keeps_static_mean() {
        let constants = PoseFilterConstants::default();
        let process = PoseProcessModel::new(&constants).unwrap();
        let mut ukf = SquareRootUkf::new(&FilterTuning::default()).unwrap();
        ukf.init(StateVector::zeros());

        let before = ukf.covariance().trace();
        ukf.predict(&process).unwrap();
        assert_relative_eq!(*ukf.state(), StateVector::zeros(), epsilon = 1e-9);
        assert!(ukf.covariance().trace() > before * 0.5);
        assert!(ukf.covariance_sqrt().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_innovation_leaves_mean_unchanged() {
        let constants = PoseFilterConstants::default();
        let process = PoseProcessModel::new(&constants).unwrap();
        let model = position_only();
        let mut ukf = SquareRootUkf::new(&FilterTuning::default()).unwrap();
        let mut x = StateVector::zeros();
        state::set_position(&mut x, &Vector3::new(0.2, -0.1, 1.5));
        state::set_linear_velocity(&mut x, &Vector3::new(0.1, 0.0, 0.0));
        ukf.init(x);

        ukf.predict(&process).unwrap();
        let predicted = *ukf.state();
        let trace_before = ukf.covariance().trace();

        let z = model.h(&predicted);
        ukf.update(&model, &z).unwrap();

        assert_relative_eq!(*ukf.state(), predicted, epsilon = 1e-9);
        assert!(ukf.covariance().trace() < trace_before);
    }

    #[test]
    fn test_update_with_own_prediction_is_stationary() {
        let constants = PoseFilterConstants::default();
        let process = PoseProcessModel::new(&constants).unwrap();
        let model = WandMeasurementModel::new(&constants);
        let mut ukf = SquareRootUkf::new(&FilterTuning::default()).unwrap();
        ukf.init(StateVector::zeros());

        ukf.predict(&process).unwrap();
        let predicted = *ukf.state();
        let trace_before = ukf.covariance().trace();

        let z = ukf.predicted_measurement(&model);
        ukf.update(&model, &z).unwrap();

        assert_relative_eq!(*ukf.state(), predicted, epsilon = 1e-9);
        assert!(ukf.covariance().trace() < trace_before);
    }

    #[test]
    fn test_update_pulls_towards_observation() {
        let constants = PoseFilterConstants::default();
        let process = PoseProcessModel::new(&constants).unwrap();
        let model = position_only();
        let mut ukf = SquareRootUkf::new(&FilterTuning::default()).unwrap();
        ukf.init(StateVector::zeros());
        ukf.predict(&process).unwrap();

        let z = Vector3::new(0.5, 0.0, 0.0);
        ukf.update(&model, &z).unwrap();
        let px = ukf.state()[state::POSITION_X];
        assert!(px > 0.4 && px < 0.5);
    }
}
