use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::correlation::{ChannelConfig, CorrelationMatrix, WeightOverride};
use crate::sim_params::{confinement_radius, SimParams, BOLTZMANN_KJ_PER_MOL_K};
use crate::vecmath::Vec3;
use std::path::Path;

// Configuration for the physical system: one linear chain in implicit solvent.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SystemConfig {
    pub n_monomers: usize,
    /// Target monomer number density inside the confinement volume (nm^-3).
    pub density: f64,
    pub temperature_k: f64,
    /// Collision (friction) rate of the implicit solvent (ps^-1).
    pub collision_rate_per_ps: f64,
    pub mass_amu: f64,
    pub bond_length_nm: f64,
    /// Optional per-monomer scaling of the baseline diffusion coefficient.
    /// Ranges not named here keep a scale of 1.0.
    #[serde(default)]
    pub diffusion_scales: Vec<ScaleOverride>,
}

/// A half-open monomer index range `[start, end)` with a diffusion scale factor.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ScaleOverride {
    pub range: [usize; 2],
    pub scale: f64,
}

// Configuration for integration granularity
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IntegrationConfig {
    pub timestep_fs: f64,
    /// Number of integration blocks per run. May be zero (checkpoint flush only).
    pub total_blocks: u64,
    /// Micro-steps per block.
    pub block_size: u32,
    /// Base RNG seed; each run derives its own seed from this and its run id.
    #[serde(default = "default_base_seed")]
    pub base_seed: u64,
}

fn default_base_seed() -> u64 {
    42
}

// Correlated thermal noise: shared channels driving groups of monomers.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NoiseConfig {
    #[serde(default = "default_baseline_weight")]
    pub baseline_weight: f64,
    pub channels: Vec<ChannelConfig>,
}

fn default_baseline_weight() -> f64 {
    0.5
}

// Force-term parameters, loaded from ensemble.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForcesConfig {
    /// Confinement stiffness in kT/nm^2.
    pub confinement_stiffness: f64,
    /// Target thermal bond-length fluctuation (nm).
    pub bond_wiggle_nm: f64,
    /// Soft-core repulsion barrier in kT. Around 3 the chains may cross each
    /// other occasionally; around 10 crossings are suppressed. A modeling
    /// choice left to the operator.
    pub repulsion_truncation_kt: f64,
    /// Repulsion cutoff radius (nm).
    #[serde(default = "default_repulsion_radius")]
    pub repulsion_radius_nm: f64,
}

fn default_repulsion_radius() -> f64 {
    1.0
}

// Configuration for trajectory output, loaded from ensemble.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    /// Per-run directory template; `{run}` is replaced by the run id.
    pub path_template: String,
    /// Checkpoint format: "json", "bincode", "messagepack".
    pub format: Option<String>,
    /// Blocks buffered in memory before a checkpoint file is written.
    pub max_blocks_per_file: u32,
    /// Remove stale checkpoint files when re-running an existing run directory.
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
    /// Decimal places kept for checkpointed positions.
    #[serde(default = "default_save_decimals")]
    pub save_decimals: u32,
    #[serde(default)]
    pub save_final_positions: bool,
}

fn default_overwrite() -> bool {
    true
}

fn default_save_decimals() -> u32 {
    2
}

// Ensemble fan-out, replacing the old module-level globals.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnsembleConfig {
    pub total_runs: u64,
    /// Worker/accelerator slot all runs of this invocation are pinned to.
    pub device_id: u32,
    /// Optional CSV collecting one summary row per run.
    #[serde(default)]
    pub summary_path: Option<String>,
}

// Main simulation configuration structure, loaded from ensemble.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub system: SystemConfig,
    pub integration: IntegrationConfig,
    pub noise: NoiseConfig,
    pub forces: ForcesConfig,
    pub output: OutputConfig,
    pub ensemble: EnsembleConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration invariants that the rest of the code relies on.
    pub fn validate(&self) -> Result<()> {
        if self.system.n_monomers == 0 {
            anyhow::bail!("n_monomers must be greater than 0.");
        }
        if self.system.density <= 0.0 || !self.system.density.is_finite() {
            anyhow::bail!("density must be positive and finite.");
        }
        if self.system.temperature_k <= 0.0 {
            anyhow::bail!("temperature_k must be positive.");
        }
        if self.system.collision_rate_per_ps <= 0.0 {
            anyhow::bail!("collision_rate_per_ps must be positive.");
        }
        if self.system.mass_amu <= 0.0 {
            anyhow::bail!("mass_amu must be positive.");
        }
        if self.system.bond_length_nm <= 0.0 {
            anyhow::bail!("bond_length_nm must be positive.");
        }
        for ov in &self.system.diffusion_scales {
            let [start, end] = ov.range;
            if start >= end || end > self.system.n_monomers {
                anyhow::bail!(
                    "diffusion scale range [{}, {}) invalid for {} monomers.",
                    start, end, self.system.n_monomers
                );
            }
            if ov.scale < 0.0 || !ov.scale.is_finite() {
                anyhow::bail!("diffusion scale {} must be non-negative and finite.", ov.scale);
            }
        }
        if self.integration.timestep_fs <= 0.0 {
            anyhow::bail!("timestep_fs must be positive.");
        }
        if self.integration.block_size == 0 {
            anyhow::bail!("block_size must be greater than 0.");
        }
        if self.forces.bond_wiggle_nm <= 0.0 {
            anyhow::bail!("bond_wiggle_nm must be positive.");
        }
        if self.forces.repulsion_truncation_kt < 0.0 {
            anyhow::bail!("repulsion_truncation_kt must not be negative.");
        }
        if self.forces.repulsion_radius_nm <= 0.0 {
            anyhow::bail!("repulsion_radius_nm must be positive.");
        }
        if self.output.max_blocks_per_file == 0 {
            anyhow::bail!("max_blocks_per_file must be greater than 0.");
        }
        if !self.output.path_template.contains("{run}") {
            anyhow::bail!("output path_template must contain the '{{run}}' placeholder.");
        }
        if let Some(format) = self.output.format.as_deref() {
            match format {
                "json" | "bincode" | "messagepack" => {}
                other => anyhow::bail!(
                    "Unknown output format '{}'. Expected json, bincode or messagepack.",
                    other
                ),
            }
        }
        // Building the matrix performs the weight/range validation.
        self.correlation_matrix()?;
        Ok(())
    }

    /// Builds the noise-correlation weight matrix for this configuration.
    pub fn correlation_matrix(&self) -> Result<CorrelationMatrix> {
        CorrelationMatrix::build(
            self.system.n_monomers,
            self.noise.baseline_weight,
            &self.noise.channels,
        )
    }

    /// Converts the configuration into the derived parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let n = self.system.n_monomers;

        // --- Derived physical constants ---
        let confinement_radius_nm = confinement_radius(n, self.system.density);
        let kt_kj_per_mol = BOLTZMANN_KJ_PER_MOL_K * self.system.temperature_k;
        let friction_per_ps = self.system.collision_rate_per_ps;
        let d0 = kt_kj_per_mol / (friction_per_ps * self.system.mass_amu);

        // Per-monomer diffusion coefficients: baseline everywhere, then the
        // configured range overrides (mirrors the noise-weight machinery).
        let mut particle_d = vec![Vec3::new(d0, d0, d0); n];
        for ov in &self.system.diffusion_scales {
            let [start, end] = ov.range;
            for d in &mut particle_d[start..end] {
                *d = Vec3::new(d0 * ov.scale, d0 * ov.scale, d0 * ov.scale);
            }
        }

        SimParams {
            n_monomers: n,
            density: self.system.density,
            confinement_radius_nm,
            kt_kj_per_mol,
            friction_per_ps,
            mass_amu: self.system.mass_amu,
            dt_ps: self.integration.timestep_fs / 1000.0,
            bond_length_nm: self.system.bond_length_nm,
            particle_d,
        }
    }
}

impl Default for SimulationConfig {
    /// Built-in parameter set matching the reference correlated-noise ensemble:
    /// a 100-monomer chain at density 0.224, 300 K, 2500 sequential runs.
    fn default() -> Self {
        SimulationConfig {
            system: SystemConfig {
                n_monomers: 100,
                density: 0.224,
                temperature_k: 300.0,
                collision_rate_per_ps: 2.0,
                mass_amu: 100.0,
                bond_length_nm: 1.0,
                diffusion_scales: Vec::new(),
            },
            integration: IntegrationConfig {
                timestep_fs: 170.0,
                total_blocks: 10_000,
                block_size: 100,
                base_seed: default_base_seed(),
            },
            noise: NoiseConfig {
                baseline_weight: default_baseline_weight(),
                channels: vec![ChannelConfig {
                    overrides: vec![
                        WeightOverride { range: [0, 20], weight: -0.5 },
                        WeightOverride { range: [20, 40], weight: 0.0 },
                        WeightOverride { range: [60, 80], weight: 0.0 },
                    ],
                }],
            },
            forces: ForcesConfig {
                confinement_stiffness: 5.0,
                bond_wiggle_nm: 0.3,
                repulsion_truncation_kt: 3.0,
                repulsion_radius_nm: default_repulsion_radius(),
            },
            output: OutputConfig {
                path_template: "runs/run{run}".to_string(),
                format: Some("json".to_string()),
                max_blocks_per_file: 100,
                overwrite: default_overwrite(),
                save_decimals: default_save_decimals(),
                save_final_positions: true,
            },
            ensemble: EnsembleConfig {
                total_runs: 2500,
                device_id: 3,
                summary_path: Some("runs/ensemble_summary.csv".to_string()),
            },
        }
    }
}
