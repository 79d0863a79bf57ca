pub mod config;
pub mod correlation;
pub mod sim_params;
pub mod trajectory;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{SimulationConfig, SystemConfig, IntegrationConfig, NoiseConfig, ForcesConfig, OutputConfig, EnsembleConfig, ScaleOverride};
pub use correlation::{CorrelationMatrix, ChannelConfig, WeightOverride};
pub use sim_params::{SimParams, confinement_radius, BOLTZMANN_KJ_PER_MOL_K};
pub use trajectory::{TrajectoryBlock, RunSummary};
pub use vecmath::Vec3;
