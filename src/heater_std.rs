use core::convert::Infallible;

use embassy_time::{Delay, Duration, Ticker};
use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::firing::MainsFrequency;
use crate::log::*;
use crate::phase::{run_phase_engine, FiringPulseGenerator};
use crate::triac::TriacBank;

/// Zero-cross detector stand-in: an edge every half mains cycle.
pub struct SimulatedMains {
    ticker: Ticker,
}

impl SimulatedMains {
    pub fn new(frequency: MainsFrequency) -> Self {
        Self {
            ticker: Ticker::every(Duration::from_micros(frequency.half_cycle_us().into())),
        }
    }

    async fn crossing(&mut self) -> Result<(), Infallible> {
        self.ticker.next().await;
        Ok(())
    }
}

impl ErrorType for SimulatedMains {
    type Error = Infallible;
}

impl Wait for SimulatedMains {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        self.crossing().await
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        self.crossing().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.crossing().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.crossing().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.crossing().await
    }
}

/// Gate output that only traces its transitions.
pub struct LoggedGate {
    channel: usize,
}

impl LoggedGate {
    pub fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl ErrorType for LoggedGate {
    type Error = Infallible;
}

impl OutputPin for LoggedGate {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        trace!("Gate {} fired", self.channel);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[embassy_executor::task]
pub async fn phase_task(bank: &'static TriacBank) {
    info!("Starting simulated phase control");
    let gates = (0..bank.channel_count()).map(LoggedGate::new);
    let pulses = match FiringPulseGenerator::new(bank, gates, Delay) {
        Ok(pulses) => pulses,
        Err(e) => {
            error!("Phase control not started: {}", e);
            return;
        }
    };
    let mains = SimulatedMains::new(bank.mains().frequency);
    run_phase_engine(bank, mains, pulses).await;
}
