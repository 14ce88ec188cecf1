use embassy_time::{Duration, Instant, Ticker};
use num_traits::float::Float;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::log::*;
use crate::pid::PidController;
use crate::triac::{Channel, TriacBank};
use crate::{CONTROL_COMMANDS, CONTROL_INPUTS, HEATER_STATUS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "rp2040", derive(defmt::Format))]
pub enum Status {
    Idle,
    Heating,
    /// Heating forced off by a safety interlock (window open).
    Interlocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "Idle",
            Status::Heating => "Heating",
            Status::Interlocked => "Interlocked",
        }
    }
}

/// Values supplied by the sensor and UI collaborators. Temperatures are
/// taken as already sanitized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlInputs {
    pub current_temperature: f32,
    /// `<= 0` means heating off.
    pub target_temperature: f32,
    pub window_open: bool,
    pub window_detection_enabled: bool,
}

impl Default for ControlInputs {
    /// Heating off, window detection on.
    fn default() -> Self {
        Self {
            current_temperature: 0.0,
            target_temperature: 0.0,
            window_open: false,
            window_detection_enabled: true,
        }
    }
}

/// Reported to the wireless collaborator after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeaterStatus {
    pub status: Status,
    pub heating: bool,
    pub power_percent: u8,
    pub power_watts: u32,
    pub current_temperature: f32,
    pub target_temperature: f32,
    pub overruns: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    SetTunings { kp: f32, ki: f32, kd: f32 },
    SetOutputLimits { min: f32, max: f32 },
    SetSampleTime(u32),
}

pub struct Thermostat<'a> {
    bank: &'a TriacBank,
    pid: PidController,
    status: Status,
    power: u8,
}

impl<'a> Thermostat<'a> {
    pub fn new(bank: &'a TriacBank, pid: PidController) -> Self {
        Self {
            bank,
            pid,
            status: Status::Idle,
            power: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    /// One control period: interlocks first, then the PID, then the channels.
    pub fn tick(&mut self, inputs: &ControlInputs, now: Instant) -> HeaterStatus {
        if inputs.window_open && inputs.window_detection_enabled {
            if self.status != Status::Interlocked {
                info!("Window open, heating interlocked");
            }
            self.pid.reset();
            self.set_power(0);
            self.enter(Status::Interlocked);
        } else if inputs.target_temperature > 0.0 {
            if self.status == Status::Interlocked {
                info!("Interlock released");
            }
            if let Some(output) = self.pid.evaluate(
                inputs.target_temperature,
                inputs.current_temperature,
                now,
            ) {
                let percent = Float::round(output).clamp(0.0, 100.0) as u8;
                self.set_power(percent);
                debug!(
                    "PID: Target={} Current={} Output={}%",
                    inputs.target_temperature, inputs.current_temperature, percent
                );
            }
            self.enter(if self.power > 0 {
                Status::Heating
            } else {
                Status::Idle
            });
        } else {
            self.set_power(0);
            self.enter(Status::Idle);
        }

        self.report(inputs)
    }

    /// Apply a tuning command. Accepted changes reset the controller so the
    /// next evaluation starts clean.
    pub fn handle_command(&mut self, command: ControlCommand) -> Result<(), ConfigError> {
        let result = match command {
            ControlCommand::SetTunings { kp, ki, kd } => {
                info!("Updating PID parameters: Kp={}, Ki={}, Kd={}", kp, ki, kd);
                self.pid.set_tunings(kp, ki, kd).map(|()| self.pid.reset())
            }
            ControlCommand::SetOutputLimits { min, max } => {
                info!("Updating PID output limits: {}..{}", min, max);
                self.pid.set_output_limits(min, max).map(|()| self.pid.reset())
            }
            ControlCommand::SetSampleTime(ms) => {
                info!("Updating PID sample time: {}ms", ms);
                self.pid.set_sample_time(ms)
            }
        };
        if result.is_err() {
            warn!("PID configuration rejected, keeping previous settings");
        }
        result
    }

    /// Periodic control task body. Reads the latest collaborator inputs,
    /// drains tuning commands and publishes status every period.
    pub async fn run(&mut self, period: Duration) -> ! {
        let mut inputs_rx = CONTROL_INPUTS.anon_receiver();
        let status_tx = HEATER_STATUS.sender();
        let mut ticker = Ticker::every(period);

        loop {
            while let Ok(command) = CONTROL_COMMANDS.try_receive() {
                let _ = self.handle_command(command);
            }

            // No inputs yet means no target, which is "off"
            let inputs = inputs_rx.try_get().unwrap_or_default();
            let status = self.tick(&inputs, Instant::now());
            status_tx.send(status);

            ticker.next().await;
        }
    }

    fn set_power(&mut self, percent: u8) {
        if let Err(e) = self.bank.set_power(Channel::All, percent) {
            error!("Failed to set triac power: {}", e);
            return;
        }
        self.power = percent;
    }

    fn enter(&mut self, status: Status) {
        if self.status != status {
            info!("{} -> {}", self.status.as_str(), status.as_str());
            self.status = status;
        }
    }

    fn report(&self, inputs: &ControlInputs) -> HeaterStatus {
        HeaterStatus {
            status: self.status,
            heating: self.bank.is_heating_active(),
            power_percent: self.bank.average_power(),
            power_watts: self.bank.estimated_power_watts(),
            current_temperature: inputs.current_temperature,
            target_temperature: inputs.target_temperature,
            overruns: self.bank.overruns(),
        }
    }
}

#[cfg(any(feature = "std", feature = "rp2040"))]
#[embassy_executor::task]
pub async fn controller_task(mut thermostat: Thermostat<'static>, period: Duration) {
    thermostat.run(period).await;
}
