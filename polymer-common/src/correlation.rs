use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A half-open monomer index range `[start, end)` assigned a fixed noise weight.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WeightOverride {
    pub range: [usize; 2],
    pub weight: f64,
}

/// One correlated-noise channel: monomers not named by an override keep the
/// baseline weight.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub overrides: Vec<WeightOverride>,
}

/// Noise-correlation weight matrix: one row per channel, one column per monomer.
///
/// Row entries are in [-1, 1]. A monomer's weight on a channel sets how strongly
/// the channel's shared thermal noise drives it; the sign flips the direction,
/// so two monomers with weights of opposite sign on the same channel are
/// anti-correlated.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    n_monomers: usize,
    channels: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Builds the matrix from channel configs: fill each row with `baseline`,
    /// then apply the overrides. Rejects weights outside [-1, 1] and override
    /// ranges that are empty or exceed the monomer count.
    pub fn build(
        n_monomers: usize,
        baseline: f64,
        channel_configs: &[ChannelConfig],
    ) -> Result<Self> {
        if n_monomers == 0 {
            anyhow::bail!("correlation matrix requires at least one monomer");
        }
        if !(-1.0..=1.0).contains(&baseline) {
            anyhow::bail!("baseline noise weight {} outside [-1, 1]", baseline);
        }
        if channel_configs.is_empty() {
            anyhow::bail!("at least one noise channel is required");
        }

        let mut channels = Vec::with_capacity(channel_configs.len());
        for (ch_idx, ch) in channel_configs.iter().enumerate() {
            let mut row = vec![baseline; n_monomers];
            for ov in &ch.overrides {
                let [start, end] = ov.range;
                if start >= end || end > n_monomers {
                    anyhow::bail!(
                        "channel {}: override range [{}, {}) invalid for {} monomers",
                        ch_idx, start, end, n_monomers
                    );
                }
                if !(-1.0..=1.0).contains(&ov.weight) {
                    anyhow::bail!(
                        "channel {}: weight {} outside [-1, 1]",
                        ch_idx, ov.weight
                    );
                }
                for w in &mut row[start..end] {
                    *w = ov.weight;
                }
            }
            channels.push(row);
        }

        Ok(Self { n_monomers, channels })
    }

    pub fn n_monomers(&self) -> usize {
        self.n_monomers
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Weight row for one channel (length `n_monomers`).
    pub fn channel_weights(&self, channel: usize) -> &[f64] {
        &self.channels[channel]
    }

    /// Weight of the independent noise component for monomer `i`:
    /// `sqrt(max(0, 1 - sum_k w_ki^2))`. The clamp covers multi-channel
    /// configurations whose summed squares exceed one.
    pub fn residual_weight(&self, i: usize) -> f64 {
        let sum_sq: f64 = self.channels.iter().map(|row| row[i] * row[i]).sum();
        (1.0 - sum_sq).max(0.0).sqrt()
    }
}
