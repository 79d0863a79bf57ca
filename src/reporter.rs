use anyhow::{Context, Result};
use log::{debug, info};
use polymer_common::{OutputConfig, SimParams, SimulationConfig, TrajectoryBlock, Vec3};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A checkpoint sink. The engine hands every completed block to `report`;
/// `dump` force-flushes whatever is still buffered at the end of a run.
pub trait Reporter {
    fn report(&mut self, block: &TrajectoryBlock) -> Result<()>;
    fn dump(&mut self) -> Result<()>;
}

/// On-disk encoding of checkpoint files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryFormat {
    Json,
    Bincode,
    MessagePack,
}

impl TrajectoryFormat {
    /// Parses the configured format name; `None` means JSON.
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name.unwrap_or("json") {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            "messagepack" => Ok(Self::MessagePack),
            other => anyhow::bail!("Unknown trajectory format: {}", other),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bin",
            Self::MessagePack => "msgpack",
        }
    }
}

/// The full parameter set applied to one run, written to `parameters.json` so
/// a run directory always identifies its configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterRecord {
    pub run_id: u64,
    pub device_id: u32,
    pub seed: u64,
    pub config: SimulationConfig,
    pub params: SimParams,
}

/// Buffered trajectory writer for one run directory.
///
/// Blocks accumulate in memory and are written out as a numbered file every
/// `max_blocks_per_file` blocks; the buffer is cleared after each flush and
/// `dump` writes the remainder. File names carry the block range they hold
/// (`blocks_0-99.json`).
pub struct TrajectoryReporter {
    dir: PathBuf,
    format: TrajectoryFormat,
    max_blocks_per_file: usize,
    save_final_positions: bool,
    buffer: Vec<TrajectoryBlock>,
    last_positions: Option<Vec<Vec3>>,
}

impl TrajectoryReporter {
    /// Opens the run directory (creating it if needed), applies the overwrite
    /// policy to stale checkpoint files, and writes the parameter record.
    pub fn create(dir: &Path, output: &OutputConfig, record: &ParameterRecord) -> Result<Self> {
        let format = TrajectoryFormat::parse(output.format.as_deref())?;

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create run directory '{}'", dir.display()))?;

        let stale = Self::checkpoint_files(dir)?;
        if !stale.is_empty() {
            if output.overwrite {
                debug!(
                    "Removing {} stale checkpoint file(s) from '{}'.",
                    stale.len(),
                    dir.display()
                );
                for path in stale {
                    std::fs::remove_file(&path).with_context(|| {
                        format!("Failed to remove stale checkpoint '{}'", path.display())
                    })?;
                }
            } else {
                anyhow::bail!(
                    "Run directory '{}' already holds checkpoint data and overwrite is disabled.",
                    dir.display()
                );
            }
        }

        let params_path = dir.join("parameters.json");
        let file = File::create(&params_path)
            .with_context(|| format!("Failed to create '{}'", params_path.display()))?;
        serde_json::to_writer_pretty(file, record)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            format,
            max_blocks_per_file: output.max_blocks_per_file as usize,
            save_final_positions: output.save_final_positions,
            buffer: Vec::new(),
            last_positions: None,
        })
    }

    /// Files a previous run with the same id may have left behind.
    fn checkpoint_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("blocks_")
                || name == "parameters.json"
                || name == "final_positions.csv"
            {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let first = self.buffer[0].block;
        let last = self.buffer[self.buffer.len() - 1].block;
        let filename = format!("blocks_{}-{}.{}", first, last, self.format.extension());
        let path = self.dir.join(filename);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create checkpoint file '{}'", path.display()))?;

        match self.format {
            TrajectoryFormat::Json => serde_json::to_writer(file, &self.buffer)?,
            TrajectoryFormat::Bincode => bincode::serialize_into(file, &self.buffer)?,
            TrajectoryFormat::MessagePack => {
                let mut file = file;
                rmp_serde::encode::write(&mut file, &self.buffer)?
            }
        }

        debug!(
            "Checkpointed blocks {}-{} to '{}'.",
            first,
            last,
            path.display()
        );
        self.buffer.clear();
        Ok(())
    }

    fn write_final_positions(&self, positions: &[Vec3]) -> Result<()> {
        let path = self.dir.join("final_positions.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create '{}'", path.display()))?;
        writer.write_record(["x_nm", "y_nm", "z_nm"])?;
        for p in positions {
            writer.write_record(&[
                format!("{:.4}", p.x),
                format!("{:.4}", p.y),
                format!("{:.4}", p.z),
            ])?;
        }
        writer.flush()?;
        info!("Final positions saved to '{}'.", path.display());
        Ok(())
    }
}

impl Reporter for TrajectoryReporter {
    fn report(&mut self, block: &TrajectoryBlock) -> Result<()> {
        self.last_positions = Some(block.positions.clone());
        self.buffer.push(block.clone());
        if self.buffer.len() >= self.max_blocks_per_file {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn dump(&mut self) -> Result<()> {
        self.flush_buffer()?;
        if self.save_final_positions {
            if let Some(positions) = self.last_positions.take() {
                self.write_final_positions(&positions)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymer_common::SimulationConfig;
    use tempfile::TempDir;

    fn record() -> ParameterRecord {
        let config = SimulationConfig::default();
        let params = config.get_sim_params();
        ParameterRecord {
            run_id: 1,
            device_id: 3,
            seed: 99,
            config,
            params,
        }
    }

    fn output(max_blocks: u32, format: &str, overwrite: bool) -> OutputConfig {
        OutputConfig {
            path_template: "runs/run{run}".to_string(),
            format: Some(format.to_string()),
            max_blocks_per_file: max_blocks,
            overwrite,
            save_decimals: 2,
            save_final_positions: true,
        }
    }

    fn block(index: u64) -> TrajectoryBlock {
        TrajectoryBlock {
            block: index,
            time_ps: index as f64 * 17.0,
            positions: vec![Vec3::new(index as f64, 0.0, 0.0); 4],
            potential_energy: 1.5,
        }
    }

    fn block_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("blocks_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn create_writes_parameter_record() {
        let tmp = TempDir::new().unwrap();
        let _reporter =
            TrajectoryReporter::create(tmp.path(), &output(10, "json", true), &record()).unwrap();
        let text = std::fs::read_to_string(tmp.path().join("parameters.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["run_id"], 1);
        assert_eq!(value["config"]["system"]["n_monomers"], 100);
        assert!(value["params"]["confinement_radius_nm"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn flushes_every_max_blocks_and_remainder_on_dump() {
        let tmp = TempDir::new().unwrap();
        let mut reporter =
            TrajectoryReporter::create(tmp.path(), &output(3, "json", true), &record()).unwrap();
        for i in 0..7 {
            reporter.report(&block(i)).unwrap();
        }
        assert_eq!(
            block_files(tmp.path()),
            vec!["blocks_0-2.json", "blocks_3-5.json"]
        );
        reporter.dump().unwrap();
        assert_eq!(
            block_files(tmp.path()),
            vec!["blocks_0-2.json", "blocks_3-5.json", "blocks_6-6.json"]
        );
    }

    #[test]
    fn flushed_blocks_round_trip_through_json() {
        let tmp = TempDir::new().unwrap();
        let mut reporter =
            TrajectoryReporter::create(tmp.path(), &output(2, "json", true), &record()).unwrap();
        reporter.report(&block(0)).unwrap();
        reporter.report(&block(1)).unwrap();
        let text = std::fs::read_to_string(tmp.path().join("blocks_0-1.json")).unwrap();
        let blocks: Vec<TrajectoryBlock> = serde_json::from_str(&text).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].block, 1);
        assert_eq!(blocks[1].positions.len(), 4);
    }

    #[test]
    fn bincode_and_messagepack_formats_write_files() {
        for format in ["bincode", "messagepack"] {
            let tmp = TempDir::new().unwrap();
            let mut reporter =
                TrajectoryReporter::create(tmp.path(), &output(1, format, true), &record())
                    .unwrap();
            reporter.report(&block(0)).unwrap();
            reporter.dump().unwrap();
            let files = block_files(tmp.path());
            assert_eq!(files.len(), 1, "format {}", format);
            let data = std::fs::read(tmp.path().join(&files[0])).unwrap();
            assert!(!data.is_empty());
        }
    }

    #[test]
    fn zero_block_run_still_dumps_cleanly() {
        let tmp = TempDir::new().unwrap();
        let mut reporter =
            TrajectoryReporter::create(tmp.path(), &output(5, "json", true), &record()).unwrap();
        reporter.dump().unwrap();
        assert!(block_files(tmp.path()).is_empty());
        assert!(tmp.path().join("parameters.json").exists());
        assert!(!tmp.path().join("final_positions.csv").exists());
    }

    #[test]
    fn overwrite_clears_stale_checkpoints() {
        let tmp = TempDir::new().unwrap();
        {
            let mut reporter =
                TrajectoryReporter::create(tmp.path(), &output(1, "json", true), &record())
                    .unwrap();
            reporter.report(&block(0)).unwrap();
            reporter.report(&block(1)).unwrap();
            reporter.dump().unwrap();
        }
        assert_eq!(block_files(tmp.path()).len(), 2);

        // Re-running the same run id must not fail and must clear stale files.
        let _reporter =
            TrajectoryReporter::create(tmp.path(), &output(1, "json", true), &record()).unwrap();
        assert!(block_files(tmp.path()).is_empty());
        assert!(tmp.path().join("parameters.json").exists());
    }

    #[test]
    fn refuses_existing_data_without_overwrite() {
        let tmp = TempDir::new().unwrap();
        {
            let mut reporter =
                TrajectoryReporter::create(tmp.path(), &output(1, "json", true), &record())
                    .unwrap();
            reporter.report(&block(0)).unwrap();
        }
        let result = TrajectoryReporter::create(tmp.path(), &output(1, "json", false), &record());
        assert!(result.is_err());
    }

    #[test]
    fn dump_writes_final_positions_csv() {
        let tmp = TempDir::new().unwrap();
        let mut reporter =
            TrajectoryReporter::create(tmp.path(), &output(10, "json", true), &record()).unwrap();
        reporter.report(&block(0)).unwrap();
        reporter.dump().unwrap();
        let text = std::fs::read_to_string(tmp.path().join("final_positions.csv")).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "x_nm,y_nm,z_nm");
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn rejects_unknown_format_name() {
        assert!(TrajectoryFormat::parse(Some("hdf5")).is_err());
        assert_eq!(TrajectoryFormat::parse(None).unwrap(), TrajectoryFormat::Json);
    }
}
