use crate::forces::ForceTerm;
use crate::integrator::CorrelatedNoiseIntegrator;
use crate::reporter::Reporter;
use anyhow::Result;
use log::debug;
use polymer_common::{SimParams, TrajectoryBlock, Vec3};

/// Result of one completed integration block.
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub block: u64,
    /// Simulation time at the end of the block (ps).
    pub time_ps: f64,
    /// Potential energy of the final conformation (kJ/mol).
    pub potential_energy: f64,
}

/// Capability interface of a simulation engine, as seen by the driver.
///
/// The driver only configures state, registers force terms, advances blocks
/// and flushes checkpoints; everything else is the engine's business. Tests
/// exercise the driver against a fake implementation.
pub trait Engine {
    /// Loads a conformation, optionally moving its center of mass to the origin.
    fn set_conformation(&mut self, positions: Vec<Vec3>, center: bool) -> Result<()>;
    fn set_velocities(&mut self, velocities: Vec<Vec3>) -> Result<()>;
    fn add_force(&mut self, force: Box<dyn ForceTerm>);
    /// Runs `n_steps` micro-steps and reports the completed block to the
    /// engine's checkpoint sinks.
    fn do_block(&mut self, n_steps: u32) -> Result<BlockReport>;
    /// Force-flushes buffered trajectory data in every checkpoint sink.
    fn finalize(&mut self) -> Result<()>;
}

/// Mutable per-run state: one linear chain.
#[derive(Debug, Default)]
pub struct ChainState {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    /// Force accumulation buffer, zeroed at the start of every micro-step.
    pub forces: Vec<Vec3>,
    /// Completed integration blocks.
    pub block_index: u64,
    pub time_ps: f64,
}

impl ChainState {
    pub fn center_of_mass(&self) -> Vec3 {
        if self.positions.is_empty() {
            return Vec3::zero();
        }
        let sum = self
            .positions
            .iter()
            .fold(Vec3::zero(), |acc, p| acc.add(*p));
        sum.scale(1.0 / self.positions.len() as f64)
    }

    pub fn radius_of_gyration(&self) -> f64 {
        if self.positions.is_empty() {
            return 0.0;
        }
        let com = self.center_of_mass();
        let mean_sq: f64 = self
            .positions
            .iter()
            .map(|p| p.distance_squared(com))
            .sum::<f64>()
            / self.positions.len() as f64;
        mean_sq.sqrt()
    }

    pub fn mean_bond_length(&self) -> f64 {
        if self.positions.len() < 2 {
            return 0.0;
        }
        let total: f64 = self
            .positions
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum();
        total / (self.positions.len() - 1) as f64
    }

    pub fn max_center_distance(&self) -> f64 {
        let com = self.center_of_mass();
        self.positions
            .iter()
            .map(|p| p.distance(com))
            .fold(0.0, f64::max)
    }

    /// Positions rounded to `decimals` places, as stored in checkpoints.
    pub fn rounded_positions(&self, decimals: u32) -> Vec<Vec3> {
        let factor = 10f64.powi(decimals as i32);
        self.positions
            .iter()
            .map(|p| {
                Vec3::new(
                    (p.x * factor).round() / factor,
                    (p.y * factor).round() / factor,
                    (p.z * factor).round() / factor,
                )
            })
            .collect()
    }
}

/// In-process Brownian-dynamics engine: correlated-noise integration over the
/// registered force terms, with automatic per-block checkpointing.
pub struct BrownianEngine {
    params: SimParams,
    state: ChainState,
    force_terms: Vec<Box<dyn ForceTerm>>,
    integrator: CorrelatedNoiseIntegrator,
    reporters: Vec<Box<dyn Reporter>>,
    save_decimals: u32,
}

impl BrownianEngine {
    pub fn new(
        params: SimParams,
        integrator: CorrelatedNoiseIntegrator,
        reporters: Vec<Box<dyn Reporter>>,
        save_decimals: u32,
    ) -> Self {
        Self {
            params,
            state: ChainState::default(),
            force_terms: Vec::new(),
            integrator,
            reporters,
            save_decimals,
        }
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Zeroes the force buffer and accumulates every registered term.
    /// Returns the total potential energy of the current conformation.
    fn accumulate_forces(&mut self) -> f64 {
        for f in &mut self.state.forces {
            *f = Vec3::zero();
        }
        let mut potential = 0.0;
        for term in &self.force_terms {
            potential += term.accumulate(&self.state.positions, &mut self.state.forces);
        }
        potential
    }
}

impl Engine for BrownianEngine {
    fn set_conformation(&mut self, positions: Vec<Vec3>, center: bool) -> Result<()> {
        if positions.len() != self.params.n_monomers {
            anyhow::bail!(
                "Conformation has {} monomers, expected {}.",
                positions.len(),
                self.params.n_monomers
            );
        }
        self.state.positions = positions;
        self.state.velocities = vec![Vec3::zero(); self.params.n_monomers];
        self.state.forces = vec![Vec3::zero(); self.params.n_monomers];
        if center {
            let com = self.state.center_of_mass();
            for p in &mut self.state.positions {
                *p = p.sub(com);
            }
        }
        Ok(())
    }

    fn set_velocities(&mut self, velocities: Vec<Vec3>) -> Result<()> {
        if velocities.len() != self.params.n_monomers {
            anyhow::bail!(
                "Velocity set has {} entries, expected {}.",
                velocities.len(),
                self.params.n_monomers
            );
        }
        self.state.velocities = velocities;
        Ok(())
    }

    fn add_force(&mut self, force: Box<dyn ForceTerm>) {
        debug!("Registered force term '{}'.", force.name());
        self.force_terms.push(force);
    }

    fn do_block(&mut self, n_steps: u32) -> Result<BlockReport> {
        if self.state.positions.is_empty() {
            anyhow::bail!("Engine has no conformation loaded.");
        }

        for _ in 0..n_steps {
            self.accumulate_forces();
            self.integrator.step(
                &mut self.state.positions,
                &self.state.forces,
                &mut self.state.velocities,
            );
        }

        // One extra accumulation so the reported energy matches the positions
        // that go into the checkpoint.
        let potential_energy = self.accumulate_forces();

        let block = self.state.block_index;
        self.state.block_index += 1;
        self.state.time_ps += n_steps as f64 * self.params.dt_ps;

        let trajectory_block = TrajectoryBlock {
            block,
            time_ps: self.state.time_ps,
            positions: self.state.rounded_positions(self.save_decimals),
            potential_energy,
        };
        for reporter in &mut self.reporters {
            reporter.report(&trajectory_block)?;
        }

        Ok(BlockReport {
            block,
            time_ps: self.state.time_ps,
            potential_energy,
        })
    }

    fn finalize(&mut self) -> Result<()> {
        for reporter in &mut self.reporters {
            reporter.dump()?;
        }
        Ok(())
    }
}
