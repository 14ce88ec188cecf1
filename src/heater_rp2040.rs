use defmt::{error, info};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_time::Delay;

use crate::phase::{run_phase_engine, FiringPulseGenerator};
use crate::resources_rp2040::TriacResources;
use crate::triac::TriacBank;

/// Phase engine on the real zero-cross input and gate pins. Spawn on the
/// high-priority interrupt executor.
#[embassy_executor::task]
pub async fn phase_task(bank: &'static TriacBank, r: TriacResources) {
    info!("Starting phase control on {} triacs", bank.channel_count());

    // Optocoupler output is open collector
    let zero_cross = Input::new(r.zero_cross, Pull::Up);

    let gates = [
        Output::new(r.gate_0, Level::Low),
        Output::new(r.gate_1, Level::Low),
        Output::new(r.gate_2, Level::Low),
    ];
    let gates = gates.into_iter().take(bank.channel_count());

    let pulses = match FiringPulseGenerator::new(bank, gates, Delay) {
        Ok(pulses) => pulses,
        Err(e) => {
            error!("Phase control not started: {}", e);
            return;
        }
    };
    run_phase_engine(bank, zero_cross, pulses).await;
}
