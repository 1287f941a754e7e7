use nalgebra::{Matrix4, SMatrix, SVector};

pub type StateMean = SVector<f32, 8>;
pub type StateCov = SMatrix<f32, 8, 8>;

/// Constant-velocity Kalman filter over (x, y, w, h) boxes.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: SMatrix<f32, 8, 8>,
    update_mat: SMatrix<f32, 4, 8>,
    std_weight_position: f32,
    std_weight_velocity: f32,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = SMatrix::<f32, 8, 8>::identity();
        for i in 0..4 {
            motion_mat[(i, 4 + i)] = 1.0;
        }
        KalmanFilter {
            motion_mat,
            update_mat: SMatrix::<f32, 4, 8>::identity(),
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Create track state from measurement [x,y,w,h]; velocities start at zero.
    pub fn initiate(&self, measurement: &SVector<f32, 4>) -> (StateMean, StateCov) {
        let mut mean = StateMean::zeros();
        mean.fixed_rows_mut::<4>(0).copy_from(measurement);
        let (w, h) = (measurement[2], measurement[3]);
        let std = StateMean::from([
            2.0 * self.std_weight_position * w,
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * w,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * w,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * w,
            10.0 * self.std_weight_velocity * h,
        ]);
        (mean, StateCov::from_diagonal(&std.component_mul(&std)))
    }

    /// x' = F x, P' = F P F^T + Q
    pub fn predict(&self, mean: &StateMean, covariance: &StateCov) -> (StateMean, StateCov) {
        let (w, h) = (mean[2], mean[3]);
        let p = self.std_weight_position;
        let v = self.std_weight_velocity;
        let q_std = StateMean::from([p * w, p * h, p * w, p * h, v * w, v * h, v * w, v * h]);
        let q = StateCov::from_diagonal(&q_std.component_mul(&q_std));

        let new_mean = self.motion_mat * mean;
        let new_cov = self.motion_mat * covariance * self.motion_mat.transpose() + q;
        (new_mean, new_cov)
    }

    /// z = H x, S = H P H^T + R
    pub fn project(&self, mean: &StateMean, covariance: &StateCov) -> (SVector<f32, 4>, Matrix4<f32>) {
        let (w, h) = (mean[2], mean[3]);
        let p = self.std_weight_position;
        let r_std = SVector::<f32, 4>::new(p * w, p * h, p * w, p * h);
        let r = Matrix4::from_diagonal(&r_std.component_mul(&r_std));

        let z = self.update_mat * mean;
        let s = self.update_mat * covariance * self.update_mat.transpose() + r;
        (z, s)
    }

    /// Correction step with measurement [x,y,w,h].
    pub fn update(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
        measurement: &SVector<f32, 4>,
    ) -> (StateMean, StateCov) {
        let (z, s) = self.project(mean, covariance);
        let mut s_reg = s;
        for i in 0..4 {
            s_reg[(i, i)] += 1e-8;
        }

        // K = P H^T S^-1, solved as S K^T = H P^T.
        let pht = covariance * self.update_mat.transpose();
        let Some(k_t) = s_reg.lu().solve(&pht.transpose()) else {
            return (*mean, *covariance);
        };
        let k = k_t.transpose();

        let innovation = measurement - z;
        let new_mean = mean + k * innovation;
        let new_cov = covariance - k * s * k.transpose();
        (new_mean, new_cov)
    }
}
