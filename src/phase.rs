//! Phase-angle firing: zero-cross synchronizer and gate pulse generator.
//!
//! Both handlers run in interrupt context and only consume values the
//! control task already committed to the [`TriacBank`]. The synchronizer
//! arms one countdown per enabled channel on every mains zero crossing; the
//! pulse generator fires the gate when that countdown expires. A countdown
//! still pending at the next crossing is re-armed from the new crossing and
//! counted as an overrun.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::digital::Wait;
use heapless::Vec;

use crate::config::{ConfigError, MAX_CHANNELS};
use crate::log::*;
use crate::triac::TriacBank;

/// Gate pulse width needed to latch the triac.
pub const PULSE_WIDTH_US: u32 = 20;

/// One-shot countdown per channel, started relative to "now".
pub trait Countdown {
    /// Start or restart the countdown for `channel`.
    fn arm(&mut self, channel: usize, delay_us: u16);
    fn cancel(&mut self, channel: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "rp2040", derive(defmt::Format))]
pub enum SyncState {
    /// Waiting for the next zero crossing.
    Idle,
    /// At least one channel countdown is running.
    Armed,
}

pub struct ZeroCrossSynchronizer<'a, C: Countdown> {
    bank: &'a TriacBank,
    countdown: C,
    crossings: u32,
}

impl<'a, C: Countdown> ZeroCrossSynchronizer<'a, C> {
    pub fn new(bank: &'a TriacBank, countdown: C) -> Self {
        Self {
            bank,
            countdown,
            crossings: 0,
        }
    }

    /// Zero-crossing handler. Never blocks and never takes the channel lock.
    pub fn on_zero_cross(&mut self) -> SyncState {
        self.crossings = self.crossings.wrapping_add(1);
        for index in 0..self.bank.channel_count() {
            let Some(state) = self.bank.snapshot(index) else {
                continue;
            };
            if state.enabled {
                self.bank.armed.arm(index);
                self.countdown.arm(index, state.firing_delay_us);
            } else if self.bank.armed.take(index) {
                self.countdown.cancel(index);
            }
        }
        self.state()
    }

    pub fn state(&self) -> SyncState {
        if self.bank.armed.any() {
            SyncState::Armed
        } else {
            SyncState::Idle
        }
    }

    pub fn crossings(&self) -> u32 {
        self.crossings
    }

    pub fn countdown(&self) -> &C {
        &self.countdown
    }

    pub fn countdown_mut(&mut self) -> &mut C {
        &mut self.countdown
    }
}

pub struct FiringPulseGenerator<'a, P: OutputPin, D: DelayNs> {
    bank: &'a TriacBank,
    gates: Vec<P, MAX_CHANNELS>,
    delay: D,
}

impl<'a, P: OutputPin, D: DelayNs> FiringPulseGenerator<'a, P, D> {
    /// Takes one gate output per configured channel, all driven low.
    pub fn new(
        bank: &'a TriacBank,
        gates: impl IntoIterator<Item = P>,
        delay: D,
    ) -> Result<Self, ConfigError> {
        let count = bank.mains().channel_count;
        let mut collected = Vec::new();
        for gate in gates {
            collected
                .push(gate)
                .map_err(|_| ConfigError::InvalidChannelCount(count))?;
        }
        if collected.len() != bank.channel_count() {
            return Err(ConfigError::InvalidChannelCount(count));
        }
        let mut generator = Self {
            bank,
            gates: collected,
            delay,
        };
        generator.release_all();
        Ok(generator)
    }

    /// Countdown expiry handler. Pulses the gate only if the synchronizer
    /// armed this channel; returns whether a pulse was emitted.
    pub fn on_countdown_expired(&mut self, channel: usize) -> Result<bool, P::Error> {
        if channel >= self.gates.len() || !self.bank.armed.take(channel) {
            return Ok(false);
        }
        let Some(gate) = self.gates.get_mut(channel) else {
            return Ok(false);
        };
        if let Err(e) = gate.set_high() {
            let _ = gate.set_low();
            return Err(e);
        }
        self.delay.delay_us(PULSE_WIDTH_US);
        gate.set_low()?;
        Ok(true)
    }

    /// Drive every gate low.
    pub fn release_all(&mut self) {
        for gate in self.gates.iter_mut() {
            let _ = gate.set_low();
        }
    }
}

/// Countdown backed by embassy-time deadlines, for the async phase driver.
pub struct DeadlineCountdown {
    deadlines: [Option<Instant>; MAX_CHANNELS],
}

impl DeadlineCountdown {
    pub const fn new() -> Self {
        Self {
            deadlines: [None; MAX_CHANNELS],
        }
    }

    /// Earliest pending deadline and its channel.
    pub fn next_expiry(&self) -> Option<(usize, Instant)> {
        self.deadlines
            .iter()
            .enumerate()
            .filter_map(|(channel, deadline)| deadline.map(|at| (channel, at)))
            .min_by_key(|&(_, at)| at)
    }

    pub fn expire(&mut self, channel: usize) {
        if let Some(deadline) = self.deadlines.get_mut(channel) {
            *deadline = None;
        }
    }
}

impl Default for DeadlineCountdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Countdown for DeadlineCountdown {
    fn arm(&mut self, channel: usize, delay_us: u16) {
        if let Some(deadline) = self.deadlines.get_mut(channel) {
            *deadline = Some(Instant::now() + Duration::from_micros(delay_us.into()));
        }
    }

    fn cancel(&mut self, channel: usize) {
        self.expire(channel);
    }
}

/// Drive the phase engine from a zero-cross input. Meant to run on a
/// high-priority executor so it preempts the control loop.
pub async fn run_phase_engine<Z, P, D>(
    bank: &TriacBank,
    mut zero_cross: Z,
    mut pulses: FiringPulseGenerator<'_, P, D>,
) -> !
where
    Z: Wait,
    P: OutputPin,
    D: DelayNs,
{
    let mut sync = ZeroCrossSynchronizer::new(bank, DeadlineCountdown::new());
    let mut reported_overruns = 0;

    loop {
        let crossed = match sync.countdown().next_expiry() {
            None => zero_cross.wait_for_rising_edge().await.is_ok(),
            Some((channel, at)) => {
                match select(zero_cross.wait_for_rising_edge(), Timer::at(at)).await {
                    Either::First(edge) => edge.is_ok(),
                    Either::Second(()) => {
                        sync.countdown_mut().expire(channel);
                        if pulses.on_countdown_expired(channel).is_err() {
                            warn!("Failed to pulse triac gate {}", channel);
                        }
                        continue;
                    }
                }
            }
        };

        if !crossed {
            warn!("Zero-cross input error");
            continue;
        }

        sync.on_zero_cross();

        let overruns = bank.overruns();
        if overruns != reported_overruns {
            warn!("Firing overrun, {} total", overruns);
            reported_overruns = overruns;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MainsConfig;
    use crate::firing::{half_cycle_us, power_to_delay, MainsFrequency};
    use embassy_time::Ticker;
    use crate::triac::Channel;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TimerEvent {
        Arm(usize, u16),
        Cancel(usize),
    }

    #[derive(Default)]
    struct RecordingCountdown {
        events: std::vec::Vec<TimerEvent>,
    }

    impl Countdown for RecordingCountdown {
        fn arm(&mut self, channel: usize, delay_us: u16) {
            self.events.push(TimerEvent::Arm(channel, delay_us));
        }

        fn cancel(&mut self, channel: usize) {
            self.events.push(TimerEvent::Cancel(channel));
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PinEvent {
        High(usize),
        Low(usize),
        Wait(u32),
    }

    type Log = Rc<RefCell<std::vec::Vec<PinEvent>>>;

    struct MockGate {
        channel: usize,
        log: Log,
    }

    impl embedded_hal::digital::ErrorType for MockGate {
        type Error = Infallible;
    }

    impl OutputPin for MockGate {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push(PinEvent::Low(self.channel));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push(PinEvent::High(self.channel));
            Ok(())
        }
    }

    struct MockDelay {
        log: Log,
    }

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.log.borrow_mut().push(PinEvent::Wait(ns / 1000));
        }

        fn delay_us(&mut self, us: u32) {
            self.log.borrow_mut().push(PinEvent::Wait(us));
        }
    }

    /// Zero-cross input that sees an edge every mains half cycle.
    struct MainsEdges {
        ticker: Ticker,
    }

    impl MainsEdges {
        fn new(frequency: MainsFrequency) -> Self {
            Self {
                ticker: Ticker::every(Duration::from_micros(half_cycle_us(frequency).into())),
            }
        }

        async fn edge(&mut self) -> Result<(), Infallible> {
            self.ticker.next().await;
            Ok(())
        }
    }

    impl embedded_hal::digital::ErrorType for MainsEdges {
        type Error = Infallible;
    }

    impl Wait for MainsEdges {
        async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
            self.edge().await
        }

        async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
            self.edge().await
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
            self.edge().await
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
            self.edge().await
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
            self.edge().await
        }
    }

    fn bank(channels: u8) -> TriacBank {
        TriacBank::new(MainsConfig::new(50, channels, 2000).unwrap()).unwrap()
    }

    fn generator<'a>(
        bank: &'a TriacBank,
        log: &Log,
    ) -> FiringPulseGenerator<'a, MockGate, MockDelay> {
        let gates = (0..bank.channel_count()).map(|channel| MockGate {
            channel,
            log: log.clone(),
        });
        let generator = FiringPulseGenerator::new(bank, gates, MockDelay { log: log.clone() })
            .unwrap();
        log.borrow_mut().clear();
        generator
    }

    #[test]
    fn idle_when_nothing_is_enabled() {
        let bank = bank(3);
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        assert_eq!(sync.on_zero_cross(), SyncState::Idle);
        assert!(sync.countdown().events.is_empty());
        assert_eq!(sync.crossings(), 1);
    }

    #[test]
    fn arms_enabled_channels_with_committed_delay() {
        let bank = bank(3);
        bank.set_power(Channel::Index(0), 30).unwrap();
        bank.set_power(Channel::Index(2), 90).unwrap();

        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        assert_eq!(sync.on_zero_cross(), SyncState::Armed);
        assert_eq!(
            sync.countdown().events,
            [
                TimerEvent::Arm(0, power_to_delay(30, MainsFrequency::Hz50)),
                TimerEvent::Arm(2, power_to_delay(90, MainsFrequency::Hz50)),
            ]
        );
    }

    #[test]
    fn pending_countdown_is_rearmed_and_counted() {
        let bank = bank(1);
        bank.set_power(Channel::All, 50).unwrap();
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());

        sync.on_zero_cross();
        // Next crossing arrives before the countdown fired
        bank.set_power(Channel::All, 70).unwrap();
        assert_eq!(sync.on_zero_cross(), SyncState::Armed);

        assert_eq!(bank.overruns(), 1);
        assert_eq!(
            sync.countdown().events.last(),
            Some(&TimerEvent::Arm(0, power_to_delay(70, MainsFrequency::Hz50)))
        );
    }

    #[test]
    fn disabled_channel_cancels_pending_countdown() {
        let bank = bank(2);
        bank.set_power(Channel::All, 50).unwrap();
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        sync.on_zero_cross();

        bank.set_power(Channel::Index(1), 0).unwrap();
        sync.on_zero_cross();
        assert!(sync.countdown().events.contains(&TimerEvent::Cancel(1)));
        assert_eq!(bank.overruns(), 1);
    }

    #[test]
    fn expiry_pulses_armed_gate_once() {
        let bank = bank(2);
        let log: Log = Rc::default();
        let mut pulses = generator(&bank, &log);
        bank.set_power(Channel::Index(1), 40).unwrap();

        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        sync.on_zero_cross();

        assert_eq!(pulses.on_countdown_expired(1), Ok(true));
        assert_eq!(
            *log.borrow(),
            [
                PinEvent::High(1),
                PinEvent::Wait(PULSE_WIDTH_US),
                PinEvent::Low(1)
            ]
        );
        assert_eq!(sync.state(), SyncState::Idle);

        // Spurious second expiry does nothing
        assert_eq!(pulses.on_countdown_expired(1), Ok(false));
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn expiry_of_unarmed_channel_is_ignored() {
        let bank = bank(2);
        let log: Log = Rc::default();
        let mut pulses = generator(&bank, &log);
        assert_eq!(pulses.on_countdown_expired(0), Ok(false));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn pulse_uses_arm_time_decision_not_current_power() {
        let bank = bank(1);
        let log: Log = Rc::default();
        let mut pulses = generator(&bank, &log);
        bank.set_power(Channel::All, 40).unwrap();
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        sync.on_zero_cross();

        // Power withdrawn mid half-cycle; the armed pulse still completes
        bank.set_power(Channel::All, 0).unwrap();
        assert_eq!(pulses.on_countdown_expired(0), Ok(true));

        // The next crossing no longer arms it
        assert_eq!(sync.on_zero_cross(), SyncState::Idle);
        assert_eq!(pulses.on_countdown_expired(0), Ok(false));
    }

    #[test]
    fn gate_count_must_match_channels() {
        let bank = bank(2);
        let log: Log = Rc::default();
        let one_gate = [MockGate {
            channel: 0,
            log: log.clone(),
        }];
        assert!(matches!(
            FiringPulseGenerator::new(&bank, one_gate, MockDelay { log: log.clone() }),
            Err(ConfigError::InvalidChannelCount(2))
        ));
    }

    #[test]
    fn new_generator_releases_gates() {
        let bank = bank(3);
        let log: Log = Rc::default();
        let gates = (0..3).map(|channel| MockGate {
            channel,
            log: log.clone(),
        });
        let _pulses =
            FiringPulseGenerator::new(&bank, gates, MockDelay { log: log.clone() }).unwrap();
        assert_eq!(
            *log.borrow(),
            [PinEvent::Low(0), PinEvent::Low(1), PinEvent::Low(2)]
        );
    }

    #[test]
    fn deadline_countdown_orders_by_expiry() {
        let mut countdown = DeadlineCountdown::new();
        assert_eq!(countdown.next_expiry(), None);
        countdown.arm(0, 9_000);
        countdown.arm(2, 500);
        let (channel, _) = countdown.next_expiry().unwrap();
        assert_eq!(channel, 2);
        countdown.cancel(2);
        let (channel, _) = countdown.next_expiry().unwrap();
        assert_eq!(channel, 0);
        countdown.expire(0);
        assert_eq!(countdown.next_expiry(), None);
    }

    #[test]
    fn out_of_range_expiry_leaves_other_channels_armed() {
        let bank = bank(1);
        let log: Log = Rc::default();
        let mut pulses = generator(&bank, &log);
        bank.set_power(Channel::All, 50).unwrap();
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        sync.on_zero_cross();

        assert_eq!(pulses.on_countdown_expired(8), Ok(false));
        assert_eq!(pulses.on_countdown_expired(1), Ok(false));
        assert!(log.borrow().is_empty());
        assert_eq!(sync.state(), SyncState::Armed);

        assert_eq!(pulses.on_countdown_expired(0), Ok(true));
    }

    #[test]
    fn shutdown_suppresses_pending_pulse() {
        let bank = bank(2);
        let log: Log = Rc::default();
        let mut pulses = generator(&bank, &log);
        bank.set_power(Channel::All, 60).unwrap();
        let mut sync = ZeroCrossSynchronizer::new(&bank, RecordingCountdown::default());
        sync.on_zero_cross();

        bank.shutdown();
        assert_eq!(pulses.on_countdown_expired(0), Ok(false));
        assert_eq!(pulses.on_countdown_expired(1), Ok(false));
        assert!(log.borrow().is_empty());

        // Nothing left to cancel or arm at the next crossing
        let before = sync.countdown().events.len();
        assert_eq!(sync.on_zero_cross(), SyncState::Idle);
        assert_eq!(sync.countdown().events.len(), before);
    }

    #[test]
    fn engine_fires_each_enabled_channel_once_per_half_cycle() {
        let bank = bank(2);
        let log: Log = Rc::default();
        let pulses = generator(&bank, &log);
        bank.set_power(Channel::All, 50).unwrap();

        // 20 crossings at 50 Hz; the last countdown may still be pending
        embassy_futures::block_on(select(
            run_phase_engine(&bank, MainsEdges::new(MainsFrequency::Hz50), pulses),
            Timer::after_millis(205),
        ));

        let log = log.borrow();
        for channel in 0..2 {
            let fired = log
                .iter()
                .filter(|event| **event == PinEvent::High(channel))
                .count();
            assert!((15..=20).contains(&fired), "channel {} fired {}", channel, fired);
        }
        // Every pulse completes before the next one starts
        for pair in log.chunks(3) {
            assert!(matches!(
                pair,
                [PinEvent::High(a), PinEvent::Wait(PULSE_WIDTH_US), PinEvent::Low(b)] if a == b
            ));
        }
        assert_eq!(bank.overruns(), 0);
    }
}
