use heapless::String;
use serde::Deserialize;
use serde_json_core::{de::from_str, ser::to_string};

use crate::thermostat::{ControlCommand, HeaterStatus};

pub const STATUS_JSON_LEN: usize = 256;

/// Status as a single JSON line. `None` only if the buffer is too small.
pub fn to_json(status: &HeaterStatus) -> Option<String<STATUS_JSON_LEN>> {
    to_string(status).ok()
}

#[derive(Debug, Deserialize)]
struct TuningRequest {
    kp: f32,
    ki: f32,
    kd: f32,
}

/// Parse a `{"kp":..,"ki":..,"kd":..}` request into a tuning command.
/// Range checks happen when the controller applies it.
pub fn parse_tunings(line: &str) -> Option<ControlCommand> {
    let (request, _) = from_str::<TuningRequest>(line.trim()).ok()?;
    Some(ControlCommand::SetTunings {
        kp: request.kp,
        ki: request.ki,
        kd: request.kd,
    })
}

#[cfg(any(feature = "std", feature = "rp2040"))]
#[embassy_executor::task]
pub async fn report_task() {
    use crate::log::*;
    use crate::HEATER_STATUS;

    let Some(mut receiver) = HEATER_STATUS.receiver() else {
        error!("No status receiver left");
        return;
    };

    loop {
        let status = receiver.changed().await;
        match to_json(&status) {
            Some(json) => info!("{}", json.as_str()),
            None => warn!("Status did not fit the report buffer"),
        }
    }
}
