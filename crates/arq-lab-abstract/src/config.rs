use serde::{Deserialize, Serialize};

use crate::error::ArqError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArqConfig {
    /// Number of frames generated for the run.
    pub total_frames: u32,
    pub window_size: u32,
    /// Applied independently to every transmission, data and ACK alike.
    pub loss_probability: f64,
    pub reorder_probability: f64,
    pub timeout_ms: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Extra delay range added to a message picked for reordering.
    pub reorder_delay_min_ms: u64,
    pub reorder_delay_max_ms: u64,
    pub seed: u64,
    /// Per-frame retransmission budget. `None` retries forever.
    pub max_retransmissions: Option<u32>,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            total_frames: 10,
            window_size: 4,
            loss_probability: 0.2,
            reorder_probability: 0.2,
            timeout_ms: 2000,
            delay_min_ms: 500,
            delay_max_ms: 1500,
            reorder_delay_min_ms: 1000,
            reorder_delay_max_ms: 2000,
            seed: 0,
            max_retransmissions: None,
        }
    }
}

impl ArqConfig {
    /// A lossless, reorder-free channel with a fixed one-way delay.
    ///
    /// The timeout is kept well above the round trip so no timer fires
    /// unless a message is actually lost.
    pub fn ideal(total_frames: u32, window_size: u32) -> Self {
        Self {
            total_frames,
            window_size,
            loss_probability: 0.0,
            reorder_probability: 0.0,
            timeout_ms: 1000,
            delay_min_ms: 100,
            delay_max_ms: 100,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ArqError> {
        if self.window_size == 0 {
            return Err(ArqError::InvalidConfig(
                "window_size must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ArqError::InvalidConfig("timeout_ms must be positive".into()));
        }
        for (name, p) in [
            ("loss_probability", self.loss_probability),
            ("reorder_probability", self.reorder_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ArqError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(ArqError::InvalidConfig(format!(
                "delay range is inverted ({} > {})",
                self.delay_min_ms, self.delay_max_ms
            )));
        }
        if self.reorder_delay_min_ms > self.reorder_delay_max_ms {
            return Err(ArqError::InvalidConfig(format!(
                "reorder delay range is inverted ({} > {})",
                self.reorder_delay_min_ms, self.reorder_delay_max_ms
            )));
        }
        Ok(())
    }
}

/// Optional values layered over an [`ArqConfig`], used by scenario files and
/// command-line flags.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ArqConfigOverride {
    pub total_frames: Option<u32>,
    pub window_size: Option<u32>,
    pub loss_probability: Option<f64>,
    pub reorder_probability: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub delay_min_ms: Option<u64>,
    pub delay_max_ms: Option<u64>,
    pub reorder_delay_min_ms: Option<u64>,
    pub reorder_delay_max_ms: Option<u64>,
    pub seed: Option<u64>,
    pub max_retransmissions: Option<u32>,
}

impl ArqConfigOverride {
    pub fn apply_to(&self, config: &mut ArqConfig) {
        if let Some(v) = self.total_frames {
            config.total_frames = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.loss_probability {
            config.loss_probability = v;
        }
        if let Some(v) = self.reorder_probability {
            config.reorder_probability = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.delay_min_ms {
            config.delay_min_ms = v;
        }
        if let Some(v) = self.delay_max_ms {
            config.delay_max_ms = v;
        }
        if let Some(v) = self.reorder_delay_min_ms {
            config.reorder_delay_min_ms = v;
        }
        if let Some(v) = self.reorder_delay_max_ms {
            config.reorder_delay_max_ms = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.max_retransmissions.is_some() {
            config.max_retransmissions = self.max_retransmissions;
        }
    }
}
