use defmt::Format;

use crate::{
    config::{EcConfig, DEFAULT_EXTREMUM, MAX_RAW},
    ConfigError,
};

use super::rescale::{rescale, RescaleMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(u8)]
pub enum ActuationMode {
    /// Press and release at two fixed levels.
    Apc = 0,
    /// Press and release relative to the last change of direction.
    RapidTrigger = 1,
}

impl TryFrom<u8> for ActuationMode {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ActuationMode::Apc),
            1 => Ok(ActuationMode::RapidTrigger),
            _ => Err(ConfigError::InvalidValue {
                value: value.into(),
            }),
        }
    }
}

/// User settings of a key, expressed in the fixed `0..=MAX_RAW` range.
///
/// The same record is kept twice: the working copy inside the running matrix
/// and the committed copy in the persisted configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct KeySettings {
    pub actuation_mode: ActuationMode,
    pub apc_actuation_threshold: u16,
    pub apc_release_threshold: u16,
    pub rt_initial_deadzone_offset: u16,
    pub rt_actuation_offset: u8,
    pub rt_release_offset: u8,
}

impl KeySettings {
    pub const DEFAULT: KeySettings = KeySettings {
        actuation_mode: ActuationMode::Apc,
        apc_actuation_threshold: 550,
        apc_release_threshold: 500,
        rt_initial_deadzone_offset: 100,
        rt_actuation_offset: 64,
        rt_release_offset: 64,
    };

    /// Copies the fields of one threshold family from `other`.
    pub fn copy_family(&mut self, other: &KeySettings, mode: RescaleMode) {
        match mode {
            RescaleMode::Apc => {
                self.apc_actuation_threshold = other.apc_actuation_threshold;
                self.apc_release_threshold = other.apc_release_threshold;
            }
            RescaleMode::RapidTrigger => {
                self.rt_initial_deadzone_offset = other.rt_initial_deadzone_offset;
                self.rt_actuation_offset = other.rt_actuation_offset;
                self.rt_release_offset = other.rt_release_offset;
            }
            RescaleMode::All => *self = *other,
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Settings a caller can change field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum KeyField {
    ActuationMode,
    ApcActuationThreshold,
    ApcReleaseThreshold,
    RtInitialDeadzoneOffset,
    RtActuationOffset,
    RtReleaseOffset,
}

impl KeyField {
    pub fn get(self, settings: &KeySettings) -> u16 {
        match self {
            KeyField::ActuationMode => settings.actuation_mode as u16,
            KeyField::ApcActuationThreshold => settings.apc_actuation_threshold,
            KeyField::ApcReleaseThreshold => settings.apc_release_threshold,
            KeyField::RtInitialDeadzoneOffset => settings.rt_initial_deadzone_offset,
            KeyField::RtActuationOffset => settings.rt_actuation_offset.into(),
            KeyField::RtReleaseOffset => settings.rt_release_offset.into(),
        }
    }

    /// Checks `value` against the field's type and range.
    pub fn parse(self, value: u16) -> Result<KeyUpdate, ConfigError> {
        let invalid = ConfigError::InvalidValue { value };
        let level = |value: u16| if value <= MAX_RAW { Ok(value) } else { Err(invalid) };
        let offset = |value: u16| u8::try_from(value).map_err(|_| invalid);
        Ok(match self {
            KeyField::ActuationMode => {
                let code = u8::try_from(value).map_err(|_| invalid)?;
                KeyUpdate::ActuationMode(ActuationMode::try_from(code)?)
            }
            KeyField::ApcActuationThreshold => KeyUpdate::ApcActuationThreshold(level(value)?),
            KeyField::ApcReleaseThreshold => KeyUpdate::ApcReleaseThreshold(level(value)?),
            KeyField::RtInitialDeadzoneOffset => KeyUpdate::RtInitialDeadzoneOffset(level(value)?),
            KeyField::RtActuationOffset => KeyUpdate::RtActuationOffset(offset(value)?),
            KeyField::RtReleaseOffset => KeyUpdate::RtReleaseOffset(offset(value)?),
        })
    }
}

/// A validated value for one [`KeyField`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum KeyUpdate {
    ActuationMode(ActuationMode),
    ApcActuationThreshold(u16),
    ApcReleaseThreshold(u16),
    RtInitialDeadzoneOffset(u16),
    RtActuationOffset(u8),
    RtReleaseOffset(u8),
}

impl KeyUpdate {
    pub fn apply(self, settings: &mut KeySettings) {
        match self {
            KeyUpdate::ActuationMode(mode) => settings.actuation_mode = mode,
            KeyUpdate::ApcActuationThreshold(v) => settings.apc_actuation_threshold = v,
            KeyUpdate::ApcReleaseThreshold(v) => settings.apc_release_threshold = v,
            KeyUpdate::RtInitialDeadzoneOffset(v) => settings.rt_initial_deadzone_offset = v,
            KeyUpdate::RtActuationOffset(v) => settings.rt_actuation_offset = v,
            KeyUpdate::RtReleaseOffset(v) => settings.rt_release_offset = v,
        }
    }

    /// Thresholds that depend on the updated field.
    pub fn rescale_mode(self) -> Option<RescaleMode> {
        match self {
            KeyUpdate::ActuationMode(_) => None,
            KeyUpdate::ApcActuationThreshold(_) | KeyUpdate::ApcReleaseThreshold(_) => {
                Some(RescaleMode::Apc)
            }
            KeyUpdate::RtInitialDeadzoneOffset(_)
            | KeyUpdate::RtActuationOffset(_)
            | KeyUpdate::RtReleaseOffset(_) => Some(RescaleMode::RapidTrigger),
        }
    }
}

/// Thresholds in the key's own coordinate system. Always derived from
/// [`KeySettings`], the noise floor and the bottoming reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Format)]
pub struct RescaledThresholds {
    pub apc_actuation_threshold: u16,
    pub apc_release_threshold: u16,
    pub rt_initial_deadzone_offset: u16,
    pub rt_actuation_offset: u16,
    pub rt_release_offset: u16,
}

/// Runtime state of a single key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct KeyState {
    pub settings: KeySettings,
    pub rescaled: RescaledThresholds,
    pub noise_floor: u16,
    /// Deepest (rapid trigger, pressed) or shallowest (released) sample since the last reversal.
    pub extremum: u16,
    /// Set until the key is seen pressed in a bottoming calibration session.
    pub bottoming_calibration_starter: bool,
    /// Top of the key's coordinate system.
    pub bottoming_calibration_reading: u16,
}

impl KeyState {
    pub fn new(settings: KeySettings, bottoming_reading: u16, noise_floor: u16) -> KeyState {
        let mut key = KeyState {
            settings,
            rescaled: RescaledThresholds::default(),
            noise_floor,
            extremum: DEFAULT_EXTREMUM,
            bottoming_calibration_starter: true,
            bottoming_calibration_reading: bottoming_reading,
        };
        key.rescale_thresholds(RescaleMode::All);
        key
    }

    pub fn rescale_thresholds(&mut self, mode: RescaleMode) {
        let lo = self.noise_floor;
        let hi = self.bottoming_calibration_reading;
        let settings = &self.settings;
        let rescaled = &mut self.rescaled;
        if mode != RescaleMode::RapidTrigger {
            rescaled.apc_actuation_threshold = rescale(settings.apc_actuation_threshold, lo, hi);
            rescaled.apc_release_threshold = rescale(settings.apc_release_threshold, lo, hi);
        }
        if mode != RescaleMode::Apc {
            rescaled.rt_initial_deadzone_offset =
                rescale(settings.rt_initial_deadzone_offset, lo, hi);
            rescaled.rt_actuation_offset = rescale(settings.rt_actuation_offset.into(), lo, hi);
            rescaled.rt_release_offset = rescale(settings.rt_release_offset.into(), lo, hi);
        }
    }

    /// Applies an edited setting and recomputes whatever depends on it.
    pub fn apply(&mut self, update: KeyUpdate) {
        let previous_mode = self.settings.actuation_mode;
        update.apply(&mut self.settings);
        if self.settings.actuation_mode != previous_mode {
            // 前のモードの極値は使えない
            self.extremum = DEFAULT_EXTREMUM;
        }
        if let Some(mode) = update.rescale_mode() {
            self.rescale_thresholds(mode);
        }
    }

    /// Adopts `sample` as the new noise floor when it sits more than `threshold` below it.
    pub fn track_noise_floor(&mut self, sample: u16, threshold: u16) -> bool {
        if u32::from(sample) + u32::from(threshold) < u32::from(self.noise_floor) {
            self.noise_floor = sample;
            self.rescale_thresholds(RescaleMode::All);
            true
        } else {
            false
        }
    }

    /// Feeds one sample through floor tracking and the key's actuation mode.
    /// Returns whether the key is pressed afterwards.
    pub fn update(&mut self, sample: u16, pressed: bool, config: &EcConfig) -> bool {
        self.track_noise_floor(sample, config.noise_floor_threshold);
        match self.settings.actuation_mode {
            ActuationMode::Apc => self.update_apc(sample, pressed),
            ActuationMode::RapidTrigger => self.update_rapid_trigger(sample, pressed),
        }
    }

    fn update_apc(&self, sample: u16, pressed: bool) -> bool {
        if pressed && sample < self.rescaled.apc_release_threshold {
            false
        } else if !pressed && sample > self.rescaled.apc_actuation_threshold {
            true
        } else {
            pressed
        }
    }

    fn update_rapid_trigger(&mut self, sample: u16, pressed: bool) -> bool {
        let rescaled = self.rescaled;
        if sample > rescaled.rt_initial_deadzone_offset {
            if pressed {
                if sample > self.extremum {
                    self.extremum = sample;
                } else if sample < self.extremum.saturating_sub(rescaled.rt_release_offset) {
                    self.extremum = sample;
                    return false;
                }
            } else if sample < self.extremum {
                self.extremum = sample;
            } else if sample > self.extremum.saturating_add(rescaled.rt_actuation_offset) {
                self.extremum = sample;
                return true;
            }
            pressed
        } else if sample < self.extremum {
            // デッドゾーンまで戻ったら離したことにする
            self.extremum = sample;
            false
        } else {
            pressed
        }
    }
}

impl Default for KeyState {
    fn default() -> Self {
        KeyState::new(KeySettings::DEFAULT, crate::config::DEFAULT_BOTTOMING_READING, 0)
    }
}
