use defmt::*;
use embassy_rp::gpio::{Input, Pull};
use embassy_time::Timer;

use crate::resources_rp2040::WindowResources;
use crate::thermostat::ControlInputs;
use crate::CONTROL_INPUTS;

/// Reed switch pulls the pin low while the window is shut.
#[embassy_executor::task]
pub async fn window_task(r: WindowResources) -> ! {
    let mut switch = Input::new(r.window_switch, Pull::Up);
    let sender = CONTROL_INPUTS.sender();

    loop {
        let open = switch.is_high();
        info!("Window {}", if open { "open" } else { "closed" });
        sender.send_modify(|inputs| {
            inputs.get_or_insert_with(ControlInputs::default).window_open = open;
        });

        switch.wait_for_any_edge().await;
        Timer::after_millis(100).await; // Debounce delay
    }
}
