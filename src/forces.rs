use polymer_common::Vec3;
use rayon::prelude::*;

/// A named force contribution. Implementations accumulate their forces into the
/// shared per-monomer buffer and return their potential energy (kJ/mol).
pub trait ForceTerm: Send + Sync {
    fn name(&self) -> &'static str;
    fn accumulate(&self, positions: &[Vec3], forces: &mut [Vec3]) -> f64;
}

/// Harmonic spherical confinement centered at the origin: no force inside the
/// target radius, restoring force `k * (r - radius)` pointing inward beyond it.
pub struct SphericalConfinement {
    /// Confinement radius (nm).
    pub radius: f64,
    /// Stiffness (kJ/mol/nm^2).
    pub stiffness: f64,
}

impl ForceTerm for SphericalConfinement {
    fn name(&self) -> &'static str {
        "spherical_confinement"
    }

    fn accumulate(&self, positions: &[Vec3], forces: &mut [Vec3]) -> f64 {
        let mut energy = 0.0;
        for (pos, force) in positions.iter().zip(forces.iter_mut()) {
            let r = pos.length();
            if r > self.radius {
                let excess = r - self.radius;
                energy += 0.5 * self.stiffness * excess * excess;
                // r > radius > 0, so the normalization is safe.
                let inward = pos.scale(-self.stiffness * excess / r);
                *force = force.add(inward);
            }
        }
        energy
    }
}

/// Harmonic bonds along the single linear chain: one bond per consecutive
/// monomer pair, all with the same rest length and stiffness.
pub struct HarmonicBonds {
    /// Rest length (nm).
    pub rest_length: f64,
    /// Stiffness (kJ/mol/nm^2), derived from the configured wiggle distance.
    pub stiffness: f64,
}

impl HarmonicBonds {
    /// Stiffness such that the thermal bond-length fluctuation matches the
    /// configured tolerance: `k = 2 kT / wiggle^2`.
    pub fn stiffness_from_wiggle(kt: f64, wiggle: f64) -> f64 {
        2.0 * kt / (wiggle * wiggle)
    }
}

impl ForceTerm for HarmonicBonds {
    fn name(&self) -> &'static str {
        "harmonic_bonds"
    }

    fn accumulate(&self, positions: &[Vec3], forces: &mut [Vec3]) -> f64 {
        let mut energy = 0.0;
        for i in 0..positions.len().saturating_sub(1) {
            let bond = positions[i + 1].sub(positions[i]);
            let dist = bond.length();
            let stretch = dist - self.rest_length;
            energy += 0.5 * self.stiffness * stretch * stretch;
            let direction = bond.normalize_or_zero();
            let pull = direction.scale(self.stiffness * stretch);
            forces[i] = forces[i].add(pull);
            forces[i + 1] = forces[i + 1].sub(pull);
        }
        energy
    }
}

/// Soft-core pairwise repulsion: `E(r) = trunc * (1 - (r/sigma)^2)^3` for
/// r < sigma, zero beyond. The barrier at full overlap is finite (`trunc`),
/// so whether chains can pass through each other is set by the truncation
/// energy relative to kT.
pub struct PolynomialRepulsive {
    /// Cutoff radius sigma (nm).
    pub radius: f64,
    /// Barrier height at r = 0 (kJ/mol).
    pub truncation: f64,
    /// Skip pairs that are connected by a chain bond.
    pub except_bonds: bool,
}

impl PolynomialRepulsive {
    #[inline(always)]
    fn pair_energy(&self, dist_sq: f64) -> f64 {
        let s = 1.0 - dist_sq / (self.radius * self.radius);
        self.truncation * s * s * s
    }

    /// Magnitude of dE/dr divided by r, for the force direction `r_ij / r`.
    #[inline(always)]
    fn pair_force_over_r(&self, dist_sq: f64) -> f64 {
        let inv_sigma_sq = 1.0 / (self.radius * self.radius);
        let s = 1.0 - dist_sq * inv_sigma_sq;
        6.0 * self.truncation * inv_sigma_sq * s * s
    }
}

impl ForceTerm for PolynomialRepulsive {
    fn name(&self) -> &'static str {
        "polynomial_repulsive"
    }

    fn accumulate(&self, positions: &[Vec3], forces: &mut [Vec3]) -> f64 {
        let cutoff_sq = self.radius * self.radius;
        let except_bonds = self.except_bonds;

        // Capture positions immutably; each monomer's contribution is computed
        // independently so the pair loop parallelizes without locking.
        let contributions: Vec<(Vec3, f64)> = (0..positions.len())
            .into_par_iter()
            .map(|i| {
                let pos_i = positions[i];
                let mut force = Vec3::zero();
                let mut energy = 0.0;
                for (j, pos_j) in positions.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    if except_bonds && j.abs_diff(i) == 1 {
                        continue;
                    }
                    let dist_sq = pos_i.distance_squared(*pos_j);
                    if dist_sq >= cutoff_sq {
                        continue;
                    }
                    // Each pair is visited from both ends: halve the energy,
                    // keep the full force on monomer i.
                    energy += 0.5 * self.pair_energy(dist_sq);
                    let separation = pos_i.sub(*pos_j);
                    if dist_sq > 1e-24 {
                        force = force.add(separation.scale(self.pair_force_over_r(dist_sq)));
                    }
                }
                (force, energy)
            })
            .collect();

        let mut total_energy = 0.0;
        for (force_out, (force, energy)) in forces.iter_mut().zip(contributions) {
            *force_out = force_out.add(force);
            total_energy += energy;
        }
        total_energy
    }
}
