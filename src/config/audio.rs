// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::engine::OutputConfig;

const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_DESIRED_LATENCY: Duration = Duration::from_millis(50);

/// Scale factors at or below this level are silent.
pub const SILENT_DB: f32 = -120.0;

/// Converts a level in dB to a linear gain.
pub fn db_to_linear(db: f32) -> f32 {
    if db <= SILENT_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// How loud one audio group's left and right sides are on a device channel, in dB.
/// A missing side is silent.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ScaleFactor {
    group: String,
    left: Option<f32>,
    right: Option<f32>,
}

impl ScaleFactor {
    pub fn new(group: &str, left: Option<f32>, right: Option<f32>) -> ScaleFactor {
        ScaleFactor {
            group: group.to_string(),
            left,
            right,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// The linear gains of the left and right side.
    pub fn gains(&self) -> (f32, f32) {
        let gain = |db: Option<f32>| db.map_or(0.0, db_to_linear);
        (gain(self.left), gain(self.right))
    }
}

/// A YAML representation of one output device.
#[derive(Deserialize, Clone, Debug)]
pub struct AudioDevice {
    /// The device name. Names starting with "mock" select a mock device.
    name: String,

    /// The number of channels to open (default: 2).
    channels: Option<u16>,

    /// The latency to ask the device for (default: 50ms).
    desired_latency: Option<String>,

    /// Per channel, the audio groups routed to it.
    scale_factors: Option<Vec<Vec<ScaleFactor>>>,
}

impl AudioDevice {
    /// New will create a new device configuration with default routing.
    pub fn new(name: &str) -> AudioDevice {
        AudioDevice {
            name: name.to_string(),
            channels: None,
            desired_latency: None,
            scale_factors: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same device configuration under another name.
    pub fn renamed(&self, name: &str) -> AudioDevice {
        AudioDevice {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Returns the number of channels (default: 2).
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    /// Returns the desired latency (default: 50ms).
    pub fn desired_latency(&self) -> Result<Duration, ConfigError> {
        match &self.desired_latency {
            Some(latency) => Ok(DurationString::from_string(latency.clone())
                .map_err(|e| ConfigError::Duration(latency.clone(), e.to_string()))?
                .into()),
            None => Ok(DEFAULT_DESIRED_LATENCY),
        }
    }

    /// Builds the linear routing matrix of this device for the given audio groups. Without
    /// explicit scale factors the first channel gets every group's left side and the second
    /// every group's right side; a mono device gets half of both.
    pub fn output_config(&self, audio_groups: &[String]) -> Result<OutputConfig, ConfigError> {
        let channels = self.channels() as usize;
        if channels == 0 {
            return Err(ConfigError::Invalid(format!(
                "device {} has no channels",
                self.name
            )));
        }

        let Some(scale_factors) = &self.scale_factors else {
            return Ok(default_routing(channels, audio_groups.len()));
        };

        if scale_factors.len() > channels {
            return Err(ConfigError::Invalid(format!(
                "device {} has scale factors for {} channels but only {} channels",
                self.name,
                scale_factors.len(),
                channels
            )));
        }

        let mut matrix = vec![vec![0.0; audio_groups.len() * 2]; channels];
        for (channel, factors) in scale_factors.iter().enumerate() {
            for factor in factors {
                let group = audio_groups
                    .iter()
                    .position(|name| name == factor.group())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "device {} routes unknown audio group {}",
                            self.name,
                            factor.group()
                        ))
                    })?;
                let (left, right) = factor.gains();
                matrix[channel][group * 2] = left;
                matrix[channel][group * 2 + 1] = right;
            }
        }

        Ok(OutputConfig {
            channels,
            scale_factors: matrix,
        })
    }
}

fn default_routing(channels: usize, groups: usize) -> OutputConfig {
    let mut matrix = vec![vec![0.0; groups * 2]; channels];
    for group in 0..groups {
        if channels == 1 {
            matrix[0][group * 2] = 0.5;
            matrix[0][group * 2 + 1] = 0.5;
        } else {
            matrix[0][group * 2] = 1.0;
            matrix[1][group * 2 + 1] = 1.0;
        }
    }
    OutputConfig {
        channels,
        scale_factors: matrix,
    }
}
