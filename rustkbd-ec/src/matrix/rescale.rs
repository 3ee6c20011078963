//! Mapping of thresholds from the fixed `0..=MAX_RAW` range into a key's
//! `[noise_floor, bottoming_reading]` range.
//!
//! A key whose bottoming reading does not exceed its noise floor has an empty
//! or inverted range. The functions below stay total in that case, clamping
//! into `0..=MAX_RAW`, but the thresholds they produce are meaningless.

use crate::config::MAX_RAW;

/// Which family of thresholds to recompute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum RescaleMode {
    Apc,
    RapidTrigger,
    All,
}

impl From<u8> for RescaleMode {
    fn from(value: u8) -> Self {
        match value {
            0 => RescaleMode::Apc,
            1 => RescaleMode::RapidTrigger,
            _ => RescaleMode::All,
        }
    }
}

/// `x * (hi - lo) / MAX_RAW + lo`
pub fn rescale(x: u16, lo: u16, hi: u16) -> u16 {
    let span = i32::from(hi) - i32::from(lo);
    clamp_raw(i32::from(x) * span / i32::from(MAX_RAW) + i32::from(lo))
}

/// Smallest `x` whose rescaled value reaches `y`.
pub fn rescale_inverse(y: u16, lo: u16, hi: u16) -> u16 {
    let width = i32::from(hi) - i32::from(lo);
    if width <= 0 {
        return 0;
    }
    let distance = i32::from(y) - i32::from(lo);
    if distance <= 0 {
        return 0;
    }
    let max = i32::from(MAX_RAW);
    clamp_raw((distance * max + width - 1) / width)
}


fn clamp_raw(value: i32) -> u16 {
    value.clamp(0, i32::from(MAX_RAW)) as u16
}
