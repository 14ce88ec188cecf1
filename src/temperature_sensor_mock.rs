use embassy_time::Duration;

/// Lumped room model: heater input against Newton cooling to ambient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalModel {
    pub temperature: f32,
    pub ambient: f32,
    /// Degrees C per second at 100% heater power.
    pub max_heating_rate: f32,
    /// Loss to ambient per degree of difference, per second.
    pub heat_loss_coefficient: f32,
    pub thermal_mass: f32,
}

impl ThermalModel {
    pub fn new(start: f32, ambient: f32) -> Self {
        Self {
            temperature: start,
            ambient,
            max_heating_rate: 0.03,
            heat_loss_coefficient: 0.002,
            thermal_mass: 0.5,
        }
    }

    pub fn step(&mut self, power_percent: u8, window_open: bool, dt_secs: f32) -> f32 {
        let heat_input = self.max_heating_rate * f32::from(power_percent) / 100.0;

        let mut heat_loss = self.heat_loss_coefficient * (self.temperature - self.ambient);
        // Open window roughly quadruples the draught
        if window_open {
            heat_loss *= 4.0;
        }

        self.temperature += (heat_input - heat_loss) * self.thermal_mass * dt_secs;
        self.temperature
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationSettings {
    pub target_temperature: f32,
    pub start_temperature: f32,
    pub ambient_temperature: f32,
    pub window_detection_enabled: bool,
    /// Window open interval, in seconds since start.
    pub window_open_at: Option<u64>,
    pub window_closed_at: Option<u64>,
    pub update_interval: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            target_temperature: 21.0,
            start_temperature: 15.0,
            ambient_temperature: 10.0,
            window_detection_enabled: true,
            window_open_at: None,
            window_closed_at: None,
            update_interval: Duration::from_secs(1),
        }
    }
}

impl SimulationSettings {
    fn window_open(&self, elapsed_secs: u64) -> bool {
        match (self.window_open_at, self.window_closed_at) {
            (Some(open), Some(closed)) => elapsed_secs >= open && elapsed_secs < closed,
            (Some(open), None) => elapsed_secs >= open,
            _ => false,
        }
    }
}

#[cfg(feature = "std")]
#[embassy_executor::task]
pub async fn run_temperature_sensor(
    bank: &'static crate::triac::TriacBank,
    settings: SimulationSettings,
) -> ! {
    use crate::log::*;
    use crate::thermostat::ControlInputs;
    use crate::CONTROL_INPUTS;
    use embassy_time::{Instant, Timer};

    info!(
        "Simulating room: start={}C ambient={}C target={}C",
        settings.start_temperature, settings.ambient_temperature, settings.target_temperature
    );

    let mut room = ThermalModel::new(settings.start_temperature, settings.ambient_temperature);
    let sender = CONTROL_INPUTS.sender();
    let started = Instant::now();
    let dt = settings.update_interval.as_millis() as f32 / 1000.0;
    let mut window_was_open = false;

    loop {
        let window_open = settings.window_open(started.elapsed().as_secs());
        if window_open != window_was_open {
            info!("Window {}", if window_open { "opened" } else { "closed" });
            window_was_open = window_open;
        }

        let power = bank.average_power();
        let temperature = room.step(power, window_open, dt);

        // Sensor noise of about +-0.05C
        let noise = (Instant::now().as_millis() % 100) as f32 / 1000.0 - 0.05;

        sender.send(ControlInputs {
            current_temperature: temperature + noise,
            target_temperature: settings.target_temperature,
            window_open,
            window_detection_enabled: settings.window_detection_enabled,
        });
        Timer::after(settings.update_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_warms_and_window_cools() {
        let mut heated = ThermalModel::new(15.0, 10.0);
        let mut unheated = ThermalModel::new(15.0, 10.0);
        for _ in 0..600 {
            heated.step(100, false, 1.0);
            unheated.step(0, false, 1.0);
        }
        assert!(heated.temperature > 15.0);
        assert!(unheated.temperature < 15.0);
        assert!(unheated.temperature > 10.0);

        let mut draughty = ThermalModel::new(20.0, 10.0);
        let mut closed = ThermalModel::new(20.0, 10.0);
        draughty.step(0, true, 10.0);
        closed.step(0, false, 10.0);
        assert!(draughty.temperature < closed.temperature);
    }

    #[test]
    fn window_schedule() {
        let settings = SimulationSettings {
            window_open_at: Some(60),
            window_closed_at: Some(120),
            ..SimulationSettings::default()
        };
        assert!(!settings.window_open(59));
        assert!(settings.window_open(60));
        assert!(!settings.window_open(120));
        assert!(!SimulationSettings::default().window_open(1_000));
    }
}
