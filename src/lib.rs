#![cfg_attr(not(test), no_std)]

#[cfg(feature = "rp2040")]
pub use defmt as log;

#[cfg(not(feature = "rp2040"))]
pub use log;

pub mod config;
pub mod firing;
pub mod phase;
pub mod pid;
pub mod reporting;
pub mod thermostat;
pub mod triac;

#[cfg(feature = "rp2040")]
pub mod resources_rp2040;
#[cfg(feature = "rp2040")]
pub use resources_rp2040 as resources;
#[cfg(feature = "rp2040")]
pub use resources_rp2040::*;

#[cfg(feature = "rp2040")]
pub mod inputs_rp2040;
#[cfg(feature = "rp2040")]
pub use inputs_rp2040 as inputs;

#[cfg(feature = "rp2040")]
pub mod heater_rp2040;
#[cfg(feature = "rp2040")]
pub use heater_rp2040 as heater;

#[cfg(feature = "std")]
pub mod heater_std;
#[cfg(feature = "std")]
pub use heater_std as heater;

#[cfg(any(feature = "std", test))]
pub mod temperature_sensor_mock;
#[cfg(feature = "std")]
pub use temperature_sensor_mock as temperature_sensor;

pub static VERSION: &str = "v0.1";

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::watch::Watch;

pub use config::{ConfigError, MainsConfig, PidConfig, ThermostatConfig};
pub use firing::MainsFrequency;
pub use thermostat::{ControlCommand, ControlInputs, HeaterStatus, Status, Thermostat};
pub use triac::{ChannelError, TriacBank};

/// Latest temperature, setpoint and window readings from the collaborators.
pub static CONTROL_INPUTS: Watch<CriticalSectionRawMutex, ControlInputs, 2> = Watch::new();
/// Heater status published once per control period.
pub static HEATER_STATUS: Watch<CriticalSectionRawMutex, HeaterStatus, 2> = Watch::new();
pub static CONTROL_COMMANDS: Channel<CriticalSectionRawMutex, ControlCommand, 4> = Channel::new();
