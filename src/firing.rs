//! Power percentage <-> triac firing delay.
//!
//! The firing delay is measured from the mains zero crossing. A delay of a
//! full half cycle means the triac never fires; the shortest delay we allow
//! is [`MIN_FIRING_DELAY_US`] so the gate is never pulsed before the mains
//! waveform has settled past the crossing.
//!
//! Power is mapped onto the conduction angle with a half-cosine curve, which
//! tracks the RMS power delivered to a resistive load more closely than a
//! linear angle mapping.

use core::f32::consts::PI;
use core::fmt;

use num_traits::float::Float;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Earliest gate pulse after a zero crossing, in microseconds.
pub const MIN_FIRING_DELAY_US: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[cfg_attr(feature = "rp2040", derive(defmt::Format))]
pub enum MainsFrequency {
    Hz50,
    Hz60,
}

impl MainsFrequency {
    pub const fn hz(self) -> u8 {
        match self {
            MainsFrequency::Hz50 => 50,
            MainsFrequency::Hz60 => 60,
        }
    }

    /// Duration of one mains half cycle, rounded to whole microseconds.
    pub const fn half_cycle_us(self) -> u16 {
        match self {
            MainsFrequency::Hz50 => 10_000,
            MainsFrequency::Hz60 => 8_333,
        }
    }
}

impl TryFrom<u8> for MainsFrequency {
    type Error = ConfigError;

    fn try_from(hz: u8) -> Result<Self, Self::Error> {
        match hz {
            50 => Ok(MainsFrequency::Hz50),
            60 => Ok(MainsFrequency::Hz60),
            other => Err(ConfigError::InvalidFrequency(other)),
        }
    }
}

impl From<MainsFrequency> for u8 {
    fn from(frequency: MainsFrequency) -> u8 {
        frequency.hz()
    }
}

impl fmt::Display for MainsFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

pub const fn half_cycle_us(frequency: MainsFrequency) -> u16 {
    frequency.half_cycle_us()
}

/// Firing delay in microseconds for `power_percent` (values above 100 are
/// treated as 100).
///
/// The result always lies within `[MIN_FIRING_DELAY_US, half_cycle_us]` and
/// never increases as power increases.
pub fn power_to_delay(power_percent: u8, frequency: MainsFrequency) -> u16 {
    let half_cycle = frequency.half_cycle_us();
    match power_percent {
        0 => half_cycle,
        p if p >= 100 => MIN_FIRING_DELAY_US,
        p => {
            let conduction = (1.0 - f32::from(p) / 100.0) * PI;
            let delay_ratio = (1.0 - Float::cos(conduction)) / 2.0;
            let span = f32::from(half_cycle - MIN_FIRING_DELAY_US);
            let delay = f32::from(MIN_FIRING_DELAY_US) + Float::round(delay_ratio * span);
            (delay as u16).clamp(MIN_FIRING_DELAY_US, half_cycle)
        }
    }
}

/// Inverse of [`power_to_delay`], used to read back the power a committed
/// delay actually delivers.
pub fn delay_to_power(delay_us: u16, frequency: MainsFrequency) -> u8 {
    let half_cycle = frequency.half_cycle_us();
    if delay_us >= half_cycle {
        return 0;
    }
    if delay_us <= MIN_FIRING_DELAY_US {
        return 100;
    }

    let span = f32::from(half_cycle - MIN_FIRING_DELAY_US);
    let delay_ratio = f32::from(delay_us - MIN_FIRING_DELAY_US) / span;
    let conduction = Float::acos((1.0 - 2.0 * delay_ratio).clamp(-1.0, 1.0));
    let power = Float::round(100.0 * (1.0 - conduction / PI));
    power.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQUENCIES: [MainsFrequency; 2] = [MainsFrequency::Hz50, MainsFrequency::Hz60];

    #[test]
    fn half_cycle_matches_mains_frequency() {
        assert_eq!(half_cycle_us(MainsFrequency::Hz50), 10_000);
        assert_eq!(half_cycle_us(MainsFrequency::Hz60), 8_333);
    }

    #[test]
    fn unsupported_frequency_is_a_config_error() {
        assert_eq!(MainsFrequency::try_from(50), Ok(MainsFrequency::Hz50));
        assert_eq!(MainsFrequency::try_from(60), Ok(MainsFrequency::Hz60));
        assert_eq!(
            MainsFrequency::try_from(55),
            Err(ConfigError::InvalidFrequency(55))
        );
        assert_eq!(
            MainsFrequency::try_from(0),
            Err(ConfigError::InvalidFrequency(0))
        );
    }

    #[test]
    fn endpoints_map_to_off_and_minimum_delay() {
        for f in FREQUENCIES {
            assert_eq!(power_to_delay(0, f), half_cycle_us(f));
            assert_eq!(power_to_delay(100, f), MIN_FIRING_DELAY_US);
            assert_eq!(power_to_delay(250, f), MIN_FIRING_DELAY_US);
        }
    }

    #[test]
    fn delay_stays_in_window_and_falls_with_power() {
        for f in FREQUENCIES {
            let mut previous = half_cycle_us(f);
            for p in 0..=100u8 {
                let delay = power_to_delay(p, f);
                assert!(delay >= MIN_FIRING_DELAY_US, "{}% -> {}us", p, delay);
                assert!(delay <= half_cycle_us(f), "{}% -> {}us", p, delay);
                assert!(delay <= previous, "{}% -> {}us after {}us", p, delay, previous);
                previous = delay;
            }
        }
    }

    #[test]
    fn half_power_fires_mid_cycle() {
        let delay = power_to_delay(50, MainsFrequency::Hz50);
        assert_eq!(delay, 5_050);
    }

    #[test]
    fn read_back_is_within_one_percent() {
        for f in FREQUENCIES {
            for p in 0..=100u8 {
                let back = delay_to_power(power_to_delay(p, f), f);
                let diff = (i16::from(back) - i16::from(p)).abs();
                assert!(diff <= 1, "{}: {}% read back as {}%", f, p, back);
            }
        }
    }

    #[test]
    fn degenerate_delays_are_clamped() {
        for f in FREQUENCIES {
            assert_eq!(delay_to_power(u16::MAX, f), 0);
            assert_eq!(delay_to_power(half_cycle_us(f), f), 0);
            assert_eq!(delay_to_power(0, f), 100);
            assert_eq!(delay_to_power(MIN_FIRING_DELAY_US, f), 100);
        }
    }
}
