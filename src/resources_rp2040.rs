use assign_resources::assign_resources;
use embassy_rp::peripherals;
use embassy_rp::Peri;

assign_resources! {
    triacs: TriacResources {
        zero_cross: PIN_21,
        gate_0: PIN_18,
        gate_1: PIN_19,
        gate_2: PIN_20,
    },
    window: WindowResources {
        window_switch: PIN_3,
    },
}
