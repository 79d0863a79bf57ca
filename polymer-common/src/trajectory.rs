use serde::{Serialize, Deserialize};
use crate::vecmath::Vec3;

/// One checkpointed integration block: the trajectory's append-only output unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryBlock {
    /// Block index within the run, starting at 0.
    pub block: u64,
    /// Simulation time at the end of the block (ps).
    pub time_ps: f64,
    /// Monomer positions, rounded to the configured number of decimals.
    pub positions: Vec<Vec3>,
    /// Potential energy summed over all force terms at the end of the block (kJ/mol).
    pub potential_energy: f64,
}

/// End-of-run statistics reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub device_id: u32,
    pub n_monomers: usize,
    pub blocks_completed: u64,
    pub steps_completed: u64,
    /// Wall-clock duration of the integration loop (seconds).
    pub wall_time_s: f64,
    pub steps_per_sec: f64,
    /// Radius of gyration of the final conformation (nm).
    pub radius_of_gyration_nm: f64,
    pub mean_bond_length_nm: f64,
    /// Largest monomer distance from the chain's center of mass (nm).
    pub max_center_distance_nm: f64,
    pub potential_energy: f64,
}
