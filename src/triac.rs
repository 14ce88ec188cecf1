//! Per-channel triac state shared between the control task and the
//! phase-control interrupt handlers.
//!
//! Writers (task context) serialize on one blocking mutex that owns the
//! authoritative channel array. Every commit is also published as a single
//! packed atomic word per channel, which is all interrupt context ever reads:
//! a reader sees either the old triple or the new one, never a mix, and never
//! waits on the lock.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config::{ConfigError, MainsConfig, MAX_CHANNELS};
use crate::firing::{power_to_delay, MainsFrequency};
use crate::log::*;

/// Channel selector for the setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    All,
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "rp2040", derive(defmt::Format))]
pub enum ChannelError {
    InvalidChannel(usize),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidChannel(index) => write!(f, "Invalid triac channel {}", index),
        }
    }
}

/// One committed (power, delay, enabled) triple.
///
/// Constructors keep `enabled` false whenever `power` is 0 and always derive
/// `firing_delay_us` from `power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub power: u8,
    pub firing_delay_us: u16,
    pub enabled: bool,
}

impl ChannelState {
    pub const fn off(frequency: MainsFrequency) -> Self {
        Self {
            power: 0,
            firing_delay_us: frequency.half_cycle_us(),
            enabled: false,
        }
    }

    /// Power clamped to 100; enabled iff power is non-zero.
    pub fn with_power(power: u8, frequency: MainsFrequency) -> Self {
        let power = power.min(100);
        Self {
            power,
            firing_delay_us: power_to_delay(power, frequency),
            enabled: power > 0,
        }
    }

    fn enabled_if(self, enable: bool) -> Self {
        Self {
            enabled: enable && self.power > 0,
            ..self
        }
    }

    fn pack(self) -> u32 {
        u32::from(self.power)
            | u32::from(self.firing_delay_us) << 8
            | u32::from(self.enabled) << 24
    }

    fn unpack(word: u32) -> Self {
        Self {
            power: (word & 0xFF) as u8,
            firing_delay_us: ((word >> 8) & 0xFFFF) as u16,
            enabled: (word >> 24) & 1 == 1,
        }
    }
}

/// Bookkeeping between the zero-cross and countdown-expiry handlers: which
/// channels have a countdown in flight, and how often a crossing found one
/// still pending.
pub(crate) struct ArmedChannels {
    bits: AtomicU8,
    overruns: AtomicU32,
}

impl ArmedChannels {
    const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
            overruns: AtomicU32::new(0),
        }
    }

    fn mask(index: usize) -> Option<u8> {
        if index < MAX_CHANNELS {
            Some(1 << index)
        } else {
            None
        }
    }

    /// Mark `index` armed; returns true if it already was (an overrun).
    /// Indices past the channel table are ignored.
    pub(crate) fn arm(&self, index: usize) -> bool {
        let Some(mask) = Self::mask(index) else {
            return false;
        };
        let stale = self.bits.fetch_or(mask, Ordering::AcqRel) & mask != 0;
        if stale {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        stale
    }

    /// Clear `index`; returns true if it was armed.
    pub(crate) fn take(&self, index: usize) -> bool {
        let Some(mask) = Self::mask(index) else {
            return false;
        };
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    pub(crate) fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }

    fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

pub struct TriacBank {
    mains: MainsConfig,
    channels: Mutex<CriticalSectionRawMutex, RefCell<[ChannelState; MAX_CHANNELS]>>,
    published: [AtomicU32; MAX_CHANNELS],
    pub(crate) armed: ArmedChannels,
}

impl TriacBank {
    /// All channels start off. Fails if `mains` is not a valid configuration,
    /// in which case nothing may be energized.
    pub fn new(mains: MainsConfig) -> Result<Self, ConfigError> {
        mains.validate()?;
        let off = ChannelState::off(mains.frequency);
        info!(
            "Triac control initialized with {} triacs, {}Hz mains",
            mains.channel_count,
            mains.frequency.hz()
        );
        Ok(Self {
            mains,
            channels: Mutex::new(RefCell::new([off; MAX_CHANNELS])),
            published: core::array::from_fn(|_| AtomicU32::new(off.pack())),
            armed: ArmedChannels::new(),
        })
    }

    pub fn mains(&self) -> &MainsConfig {
        &self.mains
    }

    pub fn channel_count(&self) -> usize {
        usize::from(self.mains.channel_count)
    }

    /// Set power on one channel or all of them. Percentages above 100 are
    /// clamped. Non-zero power re-enables the channel.
    pub fn set_power(&self, channel: Channel, percent: u8) -> Result<(), ChannelError> {
        let range = self.select(channel)?;
        // Computed before taking the lock so the critical section only stores
        let state = ChannelState::with_power(percent, self.mains.frequency);
        self.channels.lock(|channels| {
            let mut channels = channels.borrow_mut();
            for index in range {
                channels[index] = state;
                self.publish(index, state);
            }
        });
        debug!(
            "Power set to {}% (delay: {}us)",
            state.power, state.firing_delay_us
        );
        Ok(())
    }

    /// Allow or forbid firing. Enabling a channel at 0% leaves it disabled.
    pub fn enable(&self, channel: Channel, enable: bool) -> Result<(), ChannelError> {
        let range = self.select(channel)?;
        self.channels.lock(|channels| {
            let mut channels = channels.borrow_mut();
            for index in range {
                let state = channels[index].enabled_if(enable);
                channels[index] = state;
                self.publish(index, state);
            }
        });
        Ok(())
    }

    pub fn get_power(&self, index: usize) -> Result<u8, ChannelError> {
        self.snapshot(index)
            .map(|state| state.power)
            .ok_or(ChannelError::InvalidChannel(index))
    }

    /// Last committed state of a channel, lock-free. This is the only read
    /// path used from interrupt context.
    pub fn snapshot(&self, index: usize) -> Option<ChannelState> {
        if index >= self.channel_count() {
            return None;
        }
        Some(ChannelState::unpack(
            self.published[index].load(Ordering::Acquire),
        ))
    }

    pub fn is_heating_active(&self) -> bool {
        self.states().any(|state| state.enabled)
    }

    /// Sum over enabled channels of `power% * rated_watts / 100`.
    pub fn estimated_power_watts(&self) -> u32 {
        let rated = u32::from(self.mains.rated_watts);
        self.states()
            .filter(|state| state.enabled)
            .map(|state| u32::from(state.power) * rated / 100)
            .sum()
    }

    /// Mean commanded power across channels.
    pub fn average_power(&self) -> u8 {
        let total: u32 = self.states().map(|state| u32::from(state.power)).sum();
        (total / self.channel_count() as u32) as u8
    }

    /// Diagnostic count of zero crossings that found a countdown still pending.
    pub fn overruns(&self) -> u32 {
        self.armed.overruns()
    }

    /// Force every channel off and forget any countdown in flight.
    ///
    /// This is the one place task context writes the armed set. Racing an
    /// interrupt can only drop a pulse, never add one: an expiry that loses
    /// the race finds its bit gone and leaves the gate low, and the next
    /// crossing sees every channel disabled.
    pub fn shutdown(&self) {
        let off = ChannelState::off(self.mains.frequency);
        self.channels.lock(|channels| {
            let mut channels = channels.borrow_mut();
            for index in 0..self.channel_count() {
                channels[index] = off;
                self.publish(index, off);
            }
        });
        self.armed.clear();
        info!("Triac outputs shut down");
    }

    fn states(&self) -> impl Iterator<Item = ChannelState> + '_ {
        (0..self.channel_count()).filter_map(|index| self.snapshot(index))
    }

    fn select(&self, channel: Channel) -> Result<core::ops::Range<usize>, ChannelError> {
        match channel {
            Channel::All => Ok(0..self.channel_count()),
            Channel::Index(index) if index < self.channel_count() => Ok(index..index + 1),
            Channel::Index(index) => {
                warn!("Rejected access to triac channel {}", index);
                Err(ChannelError::InvalidChannel(index))
            }
        }
    }

    fn publish(&self, index: usize, state: ChannelState) {
        self.published[index].store(state.pack(), Ordering::Release);
    }
}
