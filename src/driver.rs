use crate::conformations::{grow_cubic, growth_box_side};
use crate::engine::{BlockReport, BrownianEngine, Engine};
use crate::forces::{HarmonicBonds, PolynomialRepulsive, SphericalConfinement};
use crate::integrator::CorrelatedNoiseIntegrator;
use crate::reporter::{ParameterRecord, TrajectoryReporter};
use anyhow::Result;
use log::info;
use polymer_common::{RunSummary, SimParams, SimulationConfig, Vec3};
use rand::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Derives the independent RNG seed for one run.
pub fn derive_run_seed(base_seed: u64, run_id: u64, device_id: u32) -> u64 {
    base_seed
        .wrapping_add(run_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((device_id as u64).wrapping_mul(0x58C7))
}

/// Expands the output path template for one run.
pub fn run_dir(template: &str, run_id: u64) -> PathBuf {
    PathBuf::from(template.replace("{run}", &run_id.to_string()))
}

/// Registers the three force contributions on the engine: spherical
/// confinement, harmonic chain bonds, soft-core repulsion. Stiffness and
/// barrier values configured in kT units are converted to kJ/mol here.
pub fn configure_forces<E: Engine>(
    engine: &mut E,
    params: &SimParams,
    config: &SimulationConfig,
) {
    let kt = params.kt_kj_per_mol;
    engine.add_force(Box::new(SphericalConfinement {
        radius: params.confinement_radius_nm,
        stiffness: config.forces.confinement_stiffness * kt,
    }));
    engine.add_force(Box::new(HarmonicBonds {
        rest_length: params.bond_length_nm,
        stiffness: HarmonicBonds::stiffness_from_wiggle(kt, config.forces.bond_wiggle_nm),
    }));
    engine.add_force(Box::new(PolynomialRepulsive {
        radius: config.forces.repulsion_radius_nm,
        truncation: config.forces.repulsion_truncation_kt * kt,
        except_bonds: true,
    }));
}

/// Runs the integration loop: `total_blocks` blocks of `block_size` steps,
/// then force-flushes the engine's checkpoint sinks. Returns the last block
/// report, if any block ran.
pub fn integrate<E: Engine>(
    engine: &mut E,
    total_blocks: u64,
    block_size: u32,
) -> Result<Option<BlockReport>> {
    let start = Instant::now();
    let mut previous_print_time = start;
    let mut last_report = None;

    for block in 0..total_blocks {
        let report = engine.do_block(block_size)?;

        let now = Instant::now();
        let is_last = block + 1 == total_blocks;
        if now.duration_since(previous_print_time).as_secs_f64() >= 5.0 || is_last {
            info!(
                "Block [{}/{}] ({:.2} ps) | E_pot: {:.3} kJ/mol | Elapsed: {:.2} s",
                block + 1,
                total_blocks,
                report.time_ps,
                report.potential_energy,
                start.elapsed().as_secs_f64()
            );
            previous_print_time = now;
        }
        last_report = Some(report);
    }

    engine.finalize()?;
    Ok(last_report)
}

/// Configures and executes one simulation run.
///
/// `run_id` derives the run's seed and output directory; `device_id` names the
/// worker slot the run is pinned to. Any engine or filesystem failure
/// propagates unchanged.
pub fn run_simulation(
    config: &SimulationConfig,
    run_id: u64,
    device_id: u32,
) -> Result<RunSummary> {
    let params = config.get_sim_params();
    let weights = config.correlation_matrix()?;
    let n = params.n_monomers;

    info!(
        "Run {} (device {}): radius of confinement {:.4} nm",
        run_id, device_id, params.confinement_radius_nm
    );

    let seed = derive_run_seed(config.integration.base_seed, run_id, device_id);
    let mut rng = StdRng::seed_from_u64(seed);

    let dir = run_dir(&config.output.path_template, run_id);
    let record = ParameterRecord {
        run_id,
        device_id,
        seed,
        config: config.clone(),
        params: params.clone(),
    };
    let reporter = TrajectoryReporter::create(&dir, &config.output, &record)?;

    // The conformation draws from the run RNG before it is handed to the
    // integrator, so both stay reproducible from the single run seed.
    let conformation = grow_cubic(n, growth_box_side(n), &mut rng)?;
    let integrator = CorrelatedNoiseIntegrator::new(&params, weights, rng.next_u64());

    let mut engine = BrownianEngine::new(
        params.clone(),
        integrator,
        vec![Box::new(reporter)],
        config.output.save_decimals,
    );
    engine.set_conformation(conformation, true)?;
    engine.set_velocities(vec![Vec3::zero(); n])?;
    configure_forces(&mut engine, &params, config);

    let tic = Instant::now();
    let last_report = integrate(
        &mut engine,
        config.integration.total_blocks,
        config.integration.block_size,
    )?;
    let wall_time_s = tic.elapsed().as_secs_f64();

    let state = engine.state();
    let steps_completed = state.block_index * config.integration.block_size as u64;
    let summary = RunSummary {
        run_id,
        device_id,
        n_monomers: n,
        blocks_completed: state.block_index,
        steps_completed,
        wall_time_s,
        steps_per_sec: steps_completed as f64 / wall_time_s.max(1e-9),
        radius_of_gyration_nm: state.radius_of_gyration(),
        mean_bond_length_nm: state.mean_bond_length(),
        max_center_distance_nm: state.max_center_distance(),
        potential_energy: last_report.map(|r| r.potential_energy).unwrap_or(0.0),
    };

    info!("Ran simulation in {:.4} s", wall_time_s);
    info!(
        "Run {} stats: Rg = {:.3} nm | mean bond = {:.3} nm | max |r - com| = {:.3} nm | E_pot = {:.3} kJ/mol",
        run_id,
        summary.radius_of_gyration_nm,
        summary.mean_bond_length_nm,
        summary.max_center_distance_nm,
        summary.potential_energy
    );

    Ok(summary)
}

/// Run ids handled by one invocation: the odd ids `1, 3, 5, ...`, one per
/// `total_runs / 2` slot. Even ids belong to a sibling invocation.
pub fn odd_run_ids(total_runs: u64) -> impl Iterator<Item = u64> {
    (0..total_runs / 2).map(|k| 2 * k + 1)
}

/// Executes every run of this invocation strictly sequentially on the
/// configured device slot.
pub fn orchestrate(config: &SimulationConfig) -> Result<Vec<RunSummary>> {
    let total_runs = config.ensemble.total_runs;
    let device_id = config.ensemble.device_id;
    let run_count = total_runs / 2;

    info!(
        "Orchestrating {} run(s) (odd ids of {}) on device {}.",
        run_count, total_runs, device_id
    );

    let mut summaries = Vec::with_capacity(run_count as usize);
    for (index, run_id) in odd_run_ids(total_runs).enumerate() {
        info!("Starting run {} ({}/{})...", run_id, index + 1, run_count);
        let summary = run_simulation(config, run_id, device_id)?;
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Appends one row per run to the ensemble summary CSV.
pub fn write_ensemble_summary(path: &Path, summaries: &[RunSummary]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "run_id",
        "device_id",
        "blocks",
        "steps",
        "wall_time_s",
        "rg_nm",
        "mean_bond_nm",
        "max_center_distance_nm",
        "potential_energy",
    ])?;
    for s in summaries {
        writer.write_record(&[
            s.run_id.to_string(),
            s.device_id.to_string(),
            s.blocks_completed.to_string(),
            s.steps_completed.to_string(),
            format!("{:.4}", s.wall_time_s),
            format!("{:.4}", s.radius_of_gyration_nm),
            format!("{:.4}", s.mean_bond_length_nm),
            format!("{:.4}", s.max_center_distance_nm),
            format!("{:.4}", s.potential_energy),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forces::ForceTerm;
    use tempfile::TempDir;

    /// Fake engine capturing the driver's call sequence.
    #[derive(Default)]
    struct FakeEngine {
        conformation_len: Option<usize>,
        centered: bool,
        velocities_len: Option<usize>,
        force_names: Vec<&'static str>,
        block_calls: Vec<u32>,
        finalized: u32,
    }

    impl Engine for FakeEngine {
        fn set_conformation(&mut self, positions: Vec<Vec3>, center: bool) -> Result<()> {
            self.conformation_len = Some(positions.len());
            self.centered = center;
            Ok(())
        }

        fn set_velocities(&mut self, velocities: Vec<Vec3>) -> Result<()> {
            self.velocities_len = Some(velocities.len());
            Ok(())
        }

        fn add_force(&mut self, force: Box<dyn ForceTerm>) {
            self.force_names.push(force.name());
        }

        fn do_block(&mut self, n_steps: u32) -> Result<BlockReport> {
            self.block_calls.push(n_steps);
            Ok(BlockReport {
                block: self.block_calls.len() as u64 - 1,
                time_ps: 0.0,
                potential_energy: -1.0,
            })
        }

        fn finalize(&mut self) -> Result<()> {
            self.finalized += 1;
            Ok(())
        }
    }

    fn small_config(dir: &TempDir) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.system.n_monomers = 8;
        config.integration.total_blocks = 3;
        config.integration.block_size = 5;
        config.output.path_template = dir
            .path()
            .join("run{run}")
            .to_string_lossy()
            .into_owned();
        config.output.max_blocks_per_file = 2;
        config.ensemble.total_runs = 4;
        config.ensemble.summary_path = None;
        // Reference overrides address monomers up to 80; shrink to the chain.
        config.noise.channels[0].overrides = vec![];
        config
    }

    #[test]
    fn odd_run_ids_cover_half_the_ensemble() {
        let ids: Vec<u64> = odd_run_ids(2500).collect();
        assert_eq!(ids.len(), 1250);
        assert_eq!(ids[0], 1);
        assert_eq!(*ids.last().unwrap(), 2499);
        assert!(ids.iter().all(|id| id % 2 == 1));
    }

    #[test]
    fn odd_run_ids_edge_counts() {
        assert_eq!(odd_run_ids(0).count(), 0);
        assert_eq!(odd_run_ids(1).count(), 0);
        let ids: Vec<u64> = odd_run_ids(5).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn run_dir_expands_template() {
        assert_eq!(run_dir("runs/run{run}", 17), PathBuf::from("runs/run17"));
    }

    #[test]
    fn run_seeds_differ_across_runs() {
        let a = derive_run_seed(42, 1, 3);
        let b = derive_run_seed(42, 3, 3);
        let c = derive_run_seed(42, 1, 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_run_seed(42, 1, 3));
    }

    #[test]
    fn configure_forces_registers_three_named_terms() {
        let config = SimulationConfig::default();
        let params = config.get_sim_params();
        let mut engine = FakeEngine::default();
        configure_forces(&mut engine, &params, &config);
        assert_eq!(
            engine.force_names,
            vec![
                "spherical_confinement",
                "harmonic_bonds",
                "polynomial_repulsive"
            ]
        );
    }

    #[test]
    fn integrate_runs_every_block_then_finalizes() {
        let mut engine = FakeEngine::default();
        let last = integrate(&mut engine, 4, 25).unwrap();
        assert_eq!(engine.block_calls, vec![25, 25, 25, 25]);
        assert_eq!(engine.finalized, 1);
        assert_eq!(last.unwrap().block, 3);
    }

    #[test]
    fn integrate_zero_blocks_still_finalizes() {
        let mut engine = FakeEngine::default();
        let last = integrate(&mut engine, 0, 25).unwrap();
        assert!(engine.block_calls.is_empty());
        assert_eq!(engine.finalized, 1);
        assert!(last.is_none());
    }

    #[test]
    fn run_simulation_produces_trajectory_and_summary() {
        let tmp = TempDir::new().unwrap();
        let config = small_config(&tmp);
        let summary = run_simulation(&config, 1, 3).unwrap();

        assert_eq!(summary.run_id, 1);
        assert_eq!(summary.blocks_completed, 3);
        assert_eq!(summary.steps_completed, 15);
        assert!(summary.radius_of_gyration_nm > 0.0);
        assert!(summary.mean_bond_length_nm > 0.0);

        let dir = tmp.path().join("run1");
        assert!(dir.join("parameters.json").exists());
        assert!(dir.join("blocks_0-1.json").exists());
        assert!(dir.join("blocks_2-2.json").exists());
        assert!(dir.join("final_positions.csv").exists());
    }

    #[test]
    fn rerunning_a_run_id_overwrites_cleanly() {
        let tmp = TempDir::new().unwrap();
        let config = small_config(&tmp);
        run_simulation(&config, 1, 3).unwrap();
        run_simulation(&config, 1, 3).unwrap();
        let dir = tmp.path().join("run1");
        assert!(dir.join("blocks_0-1.json").exists());
    }

    #[test]
    fn zero_block_run_writes_parameter_record_only() {
        let tmp = TempDir::new().unwrap();
        let mut config = small_config(&tmp);
        config.integration.total_blocks = 0;
        let summary = run_simulation(&config, 7, 0).unwrap();
        assert_eq!(summary.blocks_completed, 0);
        assert_eq!(summary.steps_completed, 0);

        let dir = tmp.path().join("run7");
        assert!(dir.join("parameters.json").exists());
        let blocks: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("blocks_"))
            .collect();
        assert!(blocks.is_empty());
    }

    #[test]
    fn orchestrate_invokes_driver_per_odd_id() {
        let tmp = TempDir::new().unwrap();
        let mut config = small_config(&tmp);
        config.integration.total_blocks = 1;
        let summaries = orchestrate(&config).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].run_id, 1);
        assert_eq!(summaries[1].run_id, 3);
        assert!(tmp.path().join("run1").exists());
        assert!(tmp.path().join("run3").exists());
        assert!(!tmp.path().join("run2").exists());
    }

    #[test]
    fn ensemble_summary_csv_has_row_per_run() {
        let tmp = TempDir::new().unwrap();
        let mut config = small_config(&tmp);
        config.integration.total_blocks = 1;
        let summaries = orchestrate(&config).unwrap();
        let path = tmp.path().join("summary.csv");
        write_ensemble_summary(&path, &summaries).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().starts_with("run_id,"));
    }
}
