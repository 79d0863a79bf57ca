use serde::{Deserialize, Serialize};
use crate::vecmath::Vec3;

/// Boltzmann constant times Avogadro's number, kJ/(mol K).
pub const BOLTZMANN_KJ_PER_MOL_K: f64 = 0.008_314_462_618;

/// Radius of the spherical confinement volume holding `n` monomers at the
/// target number density: `r = (3n / (4 pi density))^(1/3)`.
pub fn confinement_radius(n: usize, density: f64) -> f64 {
    (3.0 * n as f64 / (4.0 * std::f64::consts::PI * density)).cbrt()
}

/// Simulation parameters derived from the configuration, used frequently during
/// integration. Built once per run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    pub n_monomers: usize,
    pub density: f64,
    pub confinement_radius_nm: f64,
    /// Thermal energy kT (kJ/mol).
    pub kt_kj_per_mol: f64,
    /// Solvent collision rate (ps^-1).
    pub friction_per_ps: f64,
    pub mass_amu: f64,
    /// Integration timestep (ps).
    pub dt_ps: f64,
    pub bond_length_nm: f64,
    /// Per-monomer diffusion coefficients, one 3-vector per monomer.
    pub particle_d: Vec<Vec3>,
}
