use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;
use embassy_executor::Spawner;
use embassy_time::Duration;
use log::*;
use static_cell::StaticCell;
use thermor_heater::heater::phase_task;
use thermor_heater::pid::PidController;
use thermor_heater::reporting::{parse_tunings, report_task};
use thermor_heater::temperature_sensor::{run_temperature_sensor, SimulationSettings};
use thermor_heater::thermostat::controller_task;
use thermor_heater::{Thermostat, ThermostatConfig, TriacBank, CONTROL_COMMANDS, VERSION};

/// Host simulation of the heater: simulated mains, room and gates.
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[clap(long)]
    config: Option<PathBuf>,

    /// Setpoint in degrees C, 0 for off
    #[clap(long, default_value_t = 21.0)]
    target: f32,

    #[clap(long, default_value_t = 15.0)]
    start: f32,

    #[clap(long, default_value_t = 10.0)]
    ambient: f32,

    /// Seconds after start at which the window opens
    #[clap(long)]
    window_open_at: Option<u64>,

    #[clap(long)]
    window_closed_at: Option<u64>,

    #[clap(long)]
    no_window_detection: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<ThermostatConfig, String> {
    let Some(path) = path else {
        return Ok(ThermostatConfig::default());
    };
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    ThermostatConfig::from_json(&bytes).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Feeds `{"kp":..,"ki":..,"kd":..}` lines from stdin to the controller.
fn spawn_tuning_reader() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_tunings(&line) {
                Some(command) => {
                    if CONTROL_COMMANDS.try_send(command).is_err() {
                        warn!("Command queue full, dropped {}", line.trim());
                    }
                }
                None => warn!("Unknown command: {}", line.trim()),
            }
        }
    });
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp_nanos()
        .init();

    let args = Args::parse();
    info!("thermor-heater {} (simulation)", VERSION);

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration, heater stays off: {}", e);
            return;
        }
    };

    static BANK: StaticCell<TriacBank> = StaticCell::new();
    let bank = match TriacBank::new(config.mains) {
        Ok(bank) => BANK.init(bank),
        Err(e) => {
            error!("Invalid mains configuration, heater stays off: {}", e);
            return;
        }
    };
    let pid = match PidController::new(&config.pid) {
        Ok(pid) => pid,
        Err(e) => {
            error!("Invalid PID configuration, heater stays off: {}", e);
            return;
        }
    };

    let settings = SimulationSettings {
        target_temperature: args.target,
        start_temperature: args.start,
        ambient_temperature: args.ambient,
        window_detection_enabled: !args.no_window_detection,
        window_open_at: args.window_open_at,
        window_closed_at: args.window_closed_at,
        ..SimulationSettings::default()
    };

    spawn_tuning_reader();

    let period = Duration::from_millis(config.control_period_ms.into());
    spawner.spawn(phase_task(bank).unwrap());
    spawner.spawn(run_temperature_sensor(bank, settings).unwrap());
    spawner.spawn(report_task().unwrap());
    spawner.spawn(controller_task(Thermostat::new(bank, pid), period).unwrap());
}
