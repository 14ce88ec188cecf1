use core::fmt;

use serde::{Deserialize, Serialize};

use crate::firing::MainsFrequency;

/// Hardware limit on independently fired triac outputs.
pub const MAX_CHANNELS: usize = 3;

/// Configuration rejected at the call that introduced it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "rp2040", derive(defmt::Format))]
pub enum ConfigError {
    InvalidFrequency(u8),
    InvalidChannelCount(u8),
    NegativeGain,
    InvalidOutputLimits,
    ZeroSampleTime,
    ZeroControlPeriod,
    Parse,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidFrequency(hz) => write!(f, "Unsupported mains frequency {} Hz", hz),
            ConfigError::InvalidChannelCount(n) => write!(
                f,
                "Channel count {} outside 1..={}",
                n, MAX_CHANNELS
            ),
            ConfigError::NegativeGain => write!(f, "PID gains must not be negative"),
            ConfigError::InvalidOutputLimits => write!(f, "Output minimum must be below maximum"),
            ConfigError::ZeroSampleTime => write!(f, "Sample time must be greater than zero"),
            ConfigError::ZeroControlPeriod => write!(f, "Control period must be greater than zero"),
            ConfigError::Parse => write!(f, "Configuration parse error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MainsConfig {
    #[serde(rename = "frequency_hz")]
    pub frequency: MainsFrequency,
    pub channel_count: u8,
    /// Rated power of the element behind each channel.
    pub rated_watts: u16,
}

impl MainsConfig {
    pub fn new(frequency_hz: u8, channel_count: u8, rated_watts: u16) -> Result<Self, ConfigError> {
        let config = Self {
            frequency: MainsFrequency::try_from(frequency_hz)?,
            channel_count,
            rated_watts,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 || usize::from(self.channel_count) > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount(self.channel_count));
        }
        Ok(())
    }
}

impl Default for MainsConfig {
    fn default() -> Self {
        Self {
            frequency: MainsFrequency::Hz50,
            channel_count: 3,
            rated_watts: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub output_min: f32,
    pub output_max: f32,
    pub sample_time_ms: u32,
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gains(self.kp, self.ki, self.kd)?;
        validate_limits(self.output_min, self.output_max)?;
        if self.sample_time_ms == 0 {
            return Err(ConfigError::ZeroSampleTime);
        }
        Ok(())
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 25.0,
            ki: 0.5,
            kd: 10.0,
            output_min: 0.0,
            output_max: 100.0,
            sample_time_ms: 1000,
        }
    }
}

pub(crate) fn validate_gains(kp: f32, ki: f32, kd: f32) -> Result<(), ConfigError> {
    // NaN fails these comparisons too
    if !(kp >= 0.0 && ki >= 0.0 && kd >= 0.0) {
        return Err(ConfigError::NegativeGain);
    }
    Ok(())
}

pub(crate) fn validate_limits(min: f32, max: f32) -> Result<(), ConfigError> {
    if !(min < max) {
        return Err(ConfigError::InvalidOutputLimits);
    }
    Ok(())
}

/// Everything the heater core needs at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub mains: MainsConfig,
    pub pid: PidConfig,
    pub control_period_ms: u32,
}

impl ThermostatConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_slice::<Self>(bytes).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mains.validate()?;
        self.pid.validate()?;
        if self.control_period_ms == 0 {
            return Err(ConfigError::ZeroControlPeriod);
        }
        Ok(())
    }
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            mains: MainsConfig::default(),
            pid: PidConfig::default(),
            control_period_ms: 1000,
        }
    }
}
