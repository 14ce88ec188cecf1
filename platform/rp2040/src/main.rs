#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_time::Duration;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use thermor_heater::heater::phase_task;
use thermor_heater::inputs::window_task;
use thermor_heater::pid::PidController;
use thermor_heater::reporting::report_task;
use thermor_heater::thermostat::controller_task;
use thermor_heater::{split_resources, AssignedResources, TriacResources, WindowResources};
use thermor_heater::{Thermostat, ThermostatConfig, TriacBank, VERSION};

static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    EXECUTOR_HIGH.on_interrupt()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    info!("thermor-heater {}", VERSION);

    let config = ThermostatConfig::default();

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

    // Zero-cross and gate timing preempt everything else
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let high = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
    high.spawn(unwrap!(phase_task(bank, r.triacs)));

    // Temperature and setpoint arrive on CONTROL_INPUTS from the sensor and
    // front-end firmware; until then the heater stays off
    let period = Duration::from_millis(config.control_period_ms.into());
    spawner.spawn(unwrap!(window_task(r.window)));
    spawner.spawn(unwrap!(report_task()));
    spawner.spawn(unwrap!(controller_task(Thermostat::new(bank, pid), period)));
}
