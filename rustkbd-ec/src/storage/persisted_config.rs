use crc::{Crc, CRC_16_IBM_3740};
use defmt::Format;

use crate::{
    config::DEFAULT_BOTTOMING_READING,
    matrix::{ActuationMode, KeyField, KeySettings, KeySwitchIdentifier},
    ConfigError,
};

pub const MAGIC: u16 = 0xEC01;
pub const BLOCK_HEADER_SIZE: usize = 4;
pub const INDICATOR_COUNT: usize = 3;
pub const SOCD_PAIR_COUNT: usize = 4;

const INDICATOR_RECORD_SIZE: usize = 6;
const KEY_RECORD_SIZE: usize = 11;
const SOCD_RECORD_SIZE: usize = 7;
pub(crate) const MAX_RECORD_SIZE: usize = KEY_RECORD_SIZE;

/// The CRC over the payload that follows the header.
pub const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Part of the block that can be written on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum Region {
    Indicators,
    Keys,
    Socd,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Indicators, Region::Keys, Region::Socd];

    const fn record_size(self) -> usize {
        match self {
            Region::Indicators => INDICATOR_RECORD_SIZE,
            Region::Keys => KEY_RECORD_SIZE,
            Region::Socd => SOCD_RECORD_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct IndicatorConfig {
    pub h: u8,
    pub s: u8,
    pub v: u8,
    pub func: u8,
    pub index: u8,
    pub enabled: bool,
}

impl IndicatorConfig {
    pub const DEFAULTS: [IndicatorConfig; INDICATOR_COUNT] = [
        IndicatorConfig::new(0, 255, 0),
        IndicatorConfig::new(86, 255, 1),
        IndicatorConfig::new(166, 254, 2),
    ];

    const fn new(h: u8, s: u8, index: u8) -> IndicatorConfig {
        IndicatorConfig {
            h,
            s,
            v: 150,
            func: 0x04,
            index,
            enabled: true,
        }
    }
}

/// How a pair of opposing keys is resolved. Stored only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(u8)]
pub enum SocdResolution {
    Off = 0,
    Last = 1,
    Neutral = 2,
    FirstWins = 3,
    SecondWins = 4,
}

impl TryFrom<u8> for SocdResolution {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => SocdResolution::Off,
            1 => SocdResolution::Last,
            2 => SocdResolution::Neutral,
            3 => SocdResolution::FirstWins,
            4 => SocdResolution::SecondWins,
            _ => {
                return Err(ConfigError::InvalidValue {
                    value: value.into(),
                })
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct SocdPair {
    /// HID usage ids
    pub keys: [u16; 2],
    pub resolution: SocdResolution,
    pub held: [bool; 2],
}

impl SocdPair {
    pub const DEFAULTS: [SocdPair; SOCD_PAIR_COUNT] = [
        SocdPair::new(0x04, 0x07), // A, D
        SocdPair::new(0x1A, 0x16), // W, S
        SocdPair::new(0x1D, 0x1B), // Z, X
        SocdPair::new(0x50, 0x4F), // Left, Right
    ];

    const fn new(first: u16, second: u16) -> SocdPair {
        SocdPair {
            keys: [first, second],
            resolution: SocdResolution::Off,
            held: [false, false],
        }
    }
}

/// The committed settings of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct PersistedKeyState {
    pub settings: KeySettings,
    pub bottoming_calibration_reading: u16,
}

impl PersistedKeyState {
    pub const DEFAULT: PersistedKeyState = PersistedKeyState {
        settings: KeySettings::DEFAULT,
        bottoming_calibration_reading: DEFAULT_BOTTOMING_READING,
    };
}

/// Everything that survives a power cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistedConfig<const ROWS: usize, const COLS: usize> {
    pub indicators: [IndicatorConfig; INDICATOR_COUNT],
    pub keys: [[PersistedKeyState; COLS]; ROWS],
    pub socd_pairs: [SocdPair; SOCD_PAIR_COUNT],
}

impl<const ROWS: usize, const COLS: usize> PersistedConfig<ROWS, COLS> {
    pub const BLOCK_SIZE: usize = BLOCK_HEADER_SIZE
        + INDICATOR_COUNT * INDICATOR_RECORD_SIZE
        + ROWS * COLS * KEY_RECORD_SIZE
        + SOCD_PAIR_COUNT * SOCD_RECORD_SIZE;

    pub const fn new() -> Self {
        PersistedConfig {
            indicators: IndicatorConfig::DEFAULTS,
            keys: [[PersistedKeyState::DEFAULT; COLS]; ROWS],
            socd_pairs: SocdPair::DEFAULTS,
        }
    }

    pub fn key(&self, key: KeySwitchIdentifier) -> Option<&PersistedKeyState> {
        self.keys.get(key.row as usize)?.get(key.col as usize)
    }

    pub fn key_mut(&mut self, key: KeySwitchIdentifier) -> Option<&mut PersistedKeyState> {
        self.keys
            .get_mut(key.row as usize)?
            .get_mut(key.col as usize)
    }

    /// Committed value of `field` for `key`.
    pub fn threshold_field(
        &self,
        key: KeySwitchIdentifier,
        field: KeyField,
    ) -> Result<u16, ConfigError> {
        self.key(key)
            .map(|state| field.get(&state.settings))
            .ok_or(ConfigError::KeyOutOfRange {
                row: key.row,
                col: key.col,
            })
    }

    pub fn checksum(&self) -> u16 {
        let mut digest = CRC.digest();
        let mut buf = [0; MAX_RECORD_SIZE];
        for region in Region::ALL {
            for index in 0..Self::record_count(region) {
                let len = self.encode_record(region, index, &mut buf);
                digest.update(&buf[..len]);
            }
        }
        digest.finalize()
    }

    pub(crate) fn record_count(region: Region) -> usize {
        match region {
            Region::Indicators => INDICATOR_COUNT,
            Region::Keys => ROWS * COLS,
            Region::Socd => SOCD_PAIR_COUNT,
        }
    }

    /// Offset of a record from the start of the block.
    pub(crate) fn record_offset(region: Region, index: usize) -> usize {
        let start = match region {
            Region::Indicators => BLOCK_HEADER_SIZE,
            Region::Keys => BLOCK_HEADER_SIZE + INDICATOR_COUNT * INDICATOR_RECORD_SIZE,
            Region::Socd => {
                BLOCK_HEADER_SIZE
                    + INDICATOR_COUNT * INDICATOR_RECORD_SIZE
                    + ROWS * COLS * KEY_RECORD_SIZE
            }
        };
        start + index * region.record_size()
    }

    pub(crate) fn record_size(region: Region) -> usize {
        region.record_size()
    }

    /// Writes record `index` of `region` to the front of `buf` and returns its length.
    pub(crate) fn encode_record(
        &self,
        region: Region,
        index: usize,
        buf: &mut [u8; MAX_RECORD_SIZE],
    ) -> usize {
        match region {
            Region::Indicators => {
                let ind = &self.indicators[index];
                buf[..INDICATOR_RECORD_SIZE].copy_from_slice(&[
                    ind.h,
                    ind.s,
                    ind.v,
                    ind.func,
                    ind.index,
                    ind.enabled as u8,
                ]);
            }
            Region::Keys => {
                let key = &self.keys[index / COLS][index % COLS];
                let settings = &key.settings;
                buf[0] = settings.actuation_mode as u8;
                buf[1..3].copy_from_slice(&settings.apc_actuation_threshold.to_le_bytes());
                buf[3..5].copy_from_slice(&settings.apc_release_threshold.to_le_bytes());
                buf[5..7].copy_from_slice(&settings.rt_initial_deadzone_offset.to_le_bytes());
                buf[7] = settings.rt_actuation_offset;
                buf[8] = settings.rt_release_offset;
                buf[9..11].copy_from_slice(&key.bottoming_calibration_reading.to_le_bytes());
            }
            Region::Socd => {
                let pair = &self.socd_pairs[index];
                buf[0..2].copy_from_slice(&pair.keys[0].to_le_bytes());
                buf[2..4].copy_from_slice(&pair.keys[1].to_le_bytes());
                buf[4] = pair.resolution as u8;
                buf[5] = pair.held[0] as u8;
                buf[6] = pair.held[1] as u8;
            }
        }
        region.record_size()
    }

    /// Reads record `index` of `region` from `bytes`.
    pub(crate) fn decode_record(
        &mut self,
        region: Region,
        index: usize,
        bytes: &[u8],
    ) -> Result<(), ConfigError> {
        if bytes.len() < region.record_size() {
            return Err(ConfigError::ShortBuffer);
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        match region {
            Region::Indicators => {
                self.indicators[index] = IndicatorConfig {
                    h: bytes[0],
                    s: bytes[1],
                    v: bytes[2],
                    func: bytes[3],
                    index: bytes[4],
                    enabled: bytes[5] != 0,
                };
            }
            Region::Keys => {
                self.keys[index / COLS][index % COLS] = PersistedKeyState {
                    settings: KeySettings {
                        actuation_mode: ActuationMode::try_from(bytes[0])?,
                        apc_actuation_threshold: u16_at(1),
                        apc_release_threshold: u16_at(3),
                        rt_initial_deadzone_offset: u16_at(5),
                        rt_actuation_offset: bytes[7],
                        rt_release_offset: bytes[8],
                    },
                    bottoming_calibration_reading: u16_at(9),
                };
            }
            Region::Socd => {
                self.socd_pairs[index] = SocdPair {
                    keys: [u16_at(0), u16_at(2)],
                    resolution: SocdResolution::try_from(bytes[4])?,
                    held: [bytes[5] != 0, bytes[6] != 0],
                };
            }
        }
        Ok(())
    }
}

impl<const ROWS: usize, const COLS: usize> Default for PersistedConfig<ROWS, COLS> {
    fn default() -> Self {
        Self::new()
    }
}
