use polymer_common::{CorrelationMatrix, SimParams, Vec3};
use rand::prelude::*;
use rand_distr::StandardNormal;

/// Overdamped Langevin integrator with correlated thermal noise.
///
/// Per monomer and axis the update is
/// `x += (D/kT) * F * dt + sqrt(2 D dt) * xi`,
/// where the unit-variance noise couples a shared per-channel Gaussian with an
/// independent per-monomer one:
/// `xi_i = sum_k w_ki * eta_k + sqrt(max(0, 1 - sum_k w_ki^2)) * zeta_i`.
/// Weights of +/-1 within one channel give fully (anti-)correlated driving;
/// zero weight recovers independent Brownian motion.
pub struct CorrelatedNoiseIntegrator {
    dt_ps: f64,
    kt: f64,
    particle_d: Vec<Vec3>,
    weights: CorrelationMatrix,
    /// Cached independent-noise weight per monomer.
    residuals: Vec<f64>,
    /// Shared channel noise for the current step, one 3-vector per channel.
    channel_noise: Vec<Vec3>,
    rng: StdRng,
}

impl CorrelatedNoiseIntegrator {
    pub fn new(params: &SimParams, weights: CorrelationMatrix, seed: u64) -> Self {
        let residuals = (0..params.n_monomers)
            .map(|i| weights.residual_weight(i))
            .collect();
        let channel_noise = vec![Vec3::zero(); weights.n_channels()];
        Self {
            dt_ps: params.dt_ps,
            kt: params.kt_kj_per_mol,
            particle_d: params.particle_d.clone(),
            weights,
            residuals,
            channel_noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[inline(always)]
    fn normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    fn normal_vec(&mut self) -> Vec3 {
        Vec3::new(self.normal(), self.normal(), self.normal())
    }

    /// Advances all monomers by one timestep. Forces are read, positions are
    /// updated in place, and velocities are set to displacement over dt.
    pub fn step(&mut self, positions: &mut [Vec3], forces: &[Vec3], velocities: &mut [Vec3]) {
        // One shared noise draw per channel per step; every monomer weighted
        // on the channel sees the same draw.
        for k in 0..self.channel_noise.len() {
            let eta = self.normal_vec();
            self.channel_noise[k] = eta;
        }

        let dt = self.dt_ps;
        let inv_kt = 1.0 / self.kt;
        for i in 0..positions.len() {
            let d = self.particle_d[i];

            let mut noise = self.normal_vec().scale(self.residuals[i]);
            for k in 0..self.channel_noise.len() {
                let w = self.weights.channel_weights(k)[i];
                noise = noise.add(self.channel_noise[k].scale(w));
            }

            let displacement = Vec3::new(
                d.x * inv_kt * forces[i].x * dt + (2.0 * d.x * dt).sqrt() * noise.x,
                d.y * inv_kt * forces[i].y * dt + (2.0 * d.y * dt).sqrt() * noise.y,
                d.z * inv_kt * forces[i].z * dt + (2.0 * d.z * dt).sqrt() * noise.z,
            );

            positions[i] = positions[i].add(displacement);
            velocities[i] = displacement.scale(1.0 / dt);
        }
    }
}
