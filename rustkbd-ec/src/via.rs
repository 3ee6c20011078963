//! VIA custom value channel for the EC settings.
//!
//! A request is `[command_id, channel_id, value_id, value_data...]` and is
//! answered in place. Multi-byte values are big endian. Threshold edits only
//! reach the running matrix until "save threshold data" commits them, while
//! every other setting is saved as soon as it is set.

use core::fmt::Debug;

use crate::{
    log::{info, warn},
    matrix::{
        ActuationMode, EcMatrix, KeyField, KeySelector, KeySwitchIdentifier, LogWriter,
        RawSampler, RescaleMode, UpdateMode,
    },
    storage::{Region, SocdResolution, Storage, INDICATOR_COUNT, SOCD_PAIR_COUNT},
    ConfigError, Error,
};

pub const ID_CUSTOM_SET_VALUE: u8 = 0x07;
pub const ID_CUSTOM_GET_VALUE: u8 = 0x08;
pub const ID_CUSTOM_SAVE: u8 = 0x09;
pub const ID_UNHANDLED: u8 = 0xFF;
pub const ID_CUSTOM_CHANNEL: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum IndicatorField {
    Enabled,
    Brightness,
    /// hue and saturation
    Color,
    FuncLow,
    FuncHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum SocdField {
    /// Same byte as `Resolution`, 0 meaning off.
    Enabled,
    Key1,
    Key2,
    Resolution,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ValueId {
    Indicator { index: usize, field: IndicatorField },
    ActuationMode,
    Threshold(KeyField),
    SaveThresholdData,
    BottomingCalibration,
    NoiseFloorCalibration,
    ShowCalibrationData,
    ClearBottomingCalibrationData,
    Socd { index: usize, field: SocdField },
}

const FIRST_SOCD_ID: u8 = 27;

impl TryFrom<u8> for ValueId {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            1..=15 => {
                let index = usize::from(id - 1) / 5;
                let field = match (id - 1) % 5 {
                    0 => IndicatorField::Enabled,
                    1 => IndicatorField::Brightness,
                    2 => IndicatorField::Color,
                    3 => IndicatorField::FuncLow,
                    _ => IndicatorField::FuncHigh,
                };
                debug_assert!(index < INDICATOR_COUNT);
                ValueId::Indicator { index, field }
            }
            16 => ValueId::ActuationMode,
            17 => ValueId::Threshold(KeyField::ApcActuationThreshold),
            18 => ValueId::Threshold(KeyField::ApcReleaseThreshold),
            19 => ValueId::SaveThresholdData,
            20 => ValueId::Threshold(KeyField::RtInitialDeadzoneOffset),
            21 => ValueId::Threshold(KeyField::RtActuationOffset),
            22 => ValueId::Threshold(KeyField::RtReleaseOffset),
            23 => ValueId::BottomingCalibration,
            24 => ValueId::NoiseFloorCalibration,
            25 => ValueId::ShowCalibrationData,
            26 => ValueId::ClearBottomingCalibrationData,
            27..=42 => {
                let index = usize::from(id - FIRST_SOCD_ID) / 4;
                let field = match (id - FIRST_SOCD_ID) % 4 {
                    0 => SocdField::Enabled,
                    1 => SocdField::Key1,
                    2 => SocdField::Key2,
                    _ => SocdField::Resolution,
                };
                debug_assert!(index < SOCD_PAIR_COUNT);
                ValueId::Socd { index, field }
            }
            _ => return Err(ConfigError::UnknownValueId { id }),
        })
    }
}

/// Handles one request and rewrites `data` with the answer. Unknown commands,
/// unknown channels and failed requests are answered with `ID_UNHANDLED`.
pub fn custom_value_command<R, S, const ROWS: usize, const COLS: usize>(
    matrix: &mut EcMatrix<R, ROWS, COLS>,
    storage: &mut Storage<S, ROWS, COLS>,
    data: &mut [u8],
) -> Result<(), Error<S::Error>>
where
    R: RawSampler,
    S: embedded_storage::Storage,
    S::Error: Debug + 'static,
{
    if data.len() < 2 {
        if let Some(command_id) = data.first_mut() {
            *command_id = ID_UNHANDLED;
        }
        return Err(ConfigError::ShortBuffer.into());
    }
    if data[1] != ID_CUSTOM_CHANNEL {
        data[0] = ID_UNHANDLED;
        return Ok(());
    }

    let result = match data[0] {
        ID_CUSTOM_SET_VALUE => set_value(matrix, storage, &data[2..]),
        ID_CUSTOM_GET_VALUE => get_value(storage, &mut data[2..]),
        // 保存は項目ごとに済ませている
        ID_CUSTOM_SAVE => Ok(()),
        _ => {
            data[0] = ID_UNHANDLED;
            Ok(())
        }
    };
    if result.is_err() {
        warn!("custom value request {} rejected", data[0]);
        data[0] = ID_UNHANDLED;
    }
    result
}

fn value_id(data: &[u8]) -> Result<ValueId, ConfigError> {
    ValueId::try_from(*data.first().ok_or(ConfigError::ShortBuffer)?)
}

fn byte_at(data: &[u8], index: usize) -> Result<u8, ConfigError> {
    data.get(index).copied().ok_or(ConfigError::ShortBuffer)
}

fn u16_at(data: &[u8], index: usize) -> Result<u16, ConfigError> {
    Ok(u16::from_be_bytes([byte_at(data, index)?, byte_at(data, index + 1)?]))
}

fn write_bytes(data: &mut [u8], bytes: &[u8]) -> Result<(), ConfigError> {
    data.get_mut(1..1 + bytes.len())
        .ok_or(ConfigError::ShortBuffer)?
        .copy_from_slice(bytes);
    Ok(())
}

/// Thresholds that travel as one byte.
fn is_byte_field(field: KeyField) -> bool {
    matches!(
        field,
        KeyField::ActuationMode | KeyField::RtActuationOffset | KeyField::RtReleaseOffset
    )
}

fn show_calibration_data<R: RawSampler, const ROWS: usize, const COLS: usize>(
    matrix: &EcMatrix<R, ROWS, COLS>,
) {
    let mut log = LogWriter::new();
    matrix.show_calibration_data(&mut log).ok();
}

fn set_value<R, S, const ROWS: usize, const COLS: usize>(
    matrix: &mut EcMatrix<R, ROWS, COLS>,
    storage: &mut Storage<S, ROWS, COLS>,
    data: &[u8],
) -> Result<(), Error<S::Error>>
where
    R: RawSampler,
    S: embedded_storage::Storage,
    S::Error: Debug + 'static,
{
    match value_id(data)? {
        ValueId::Indicator { index, field } => {
            let value = byte_at(data, 1)?;
            let indicator = &mut storage.config_mut().indicators[index];
            match field {
                IndicatorField::Enabled => indicator.enabled = value != 0,
                IndicatorField::Brightness => indicator.v = value,
                IndicatorField::Color => {
                    let s = byte_at(data, 2)?;
                    indicator.h = value;
                    indicator.s = s;
                }
                IndicatorField::FuncLow => {
                    indicator.func = (indicator.func & 0xF0) | (value & 0x0F)
                }
                IndicatorField::FuncHigh => indicator.func = (indicator.func & 0x0F) | (value << 4),
            }
            storage.save_region(Region::Indicators)?;
        }
        ValueId::ActuationMode => {
            let mode = byte_at(data, 1)?;
            matrix.set_threshold_field(
                KeySelector::All,
                KeyField::ActuationMode,
                mode.into(),
                UpdateMode::Persisted,
                storage.config_mut(),
            )?;
            storage.save_region(Region::Keys)?;
            match ActuationMode::try_from(mode)? {
                ActuationMode::Apc => info!("actuation mode: APC"),
                ActuationMode::RapidTrigger => info!("actuation mode: rapid trigger"),
            }
        }
        ValueId::Threshold(field) => {
            let value = if is_byte_field(field) {
                byte_at(data, 1)?.into()
            } else {
                u16_at(data, 1)?
            };
            matrix.set_threshold_field(
                KeySelector::All,
                field,
                value,
                UpdateMode::RuntimeOnly,
                storage.config_mut(),
            )?;
            info!("threshold set to {}", value);
        }
        ValueId::SaveThresholdData => {
            let mode = RescaleMode::from(byte_at(data, 1)?);
            matrix.commit_settings(mode, storage.config_mut());
            storage.save_region(Region::Keys)?;
            info!("new thresholds applied and saved");
        }
        ValueId::BottomingCalibration => {
            if byte_at(data, 1)? == 1 {
                matrix.enter_bottoming_calibration();
            } else if matrix.is_bottoming_calibration_active() {
                matrix.exit_bottoming_calibration(storage.config_mut());
                storage.save_region(Region::Keys)?;
                show_calibration_data(matrix);
            }
        }
        ValueId::NoiseFloorCalibration => {
            if byte_at(data, 1)? == 0 {
                matrix.start_noise_floor_calibration();
                matrix.run_noise_floor_calibration();
            }
        }
        ValueId::ShowCalibrationData => {
            if byte_at(data, 1)? == 0 {
                show_calibration_data(matrix);
            }
        }
        ValueId::ClearBottomingCalibrationData => {
            if byte_at(data, 1)? == 0 {
                storage.reset()?;
                matrix.reload(storage.config());
                info!("calibration data cleared");
            }
        }
        ValueId::Socd { index, field } => {
            let pair = &mut storage.config_mut().socd_pairs[index];
            match field {
                SocdField::Enabled | SocdField::Resolution => {
                    pair.resolution = SocdResolution::try_from(byte_at(data, 1)?)?;
                }
                SocdField::Key1 => pair.keys[0] = u16_at(data, 1)?,
                SocdField::Key2 => pair.keys[1] = u16_at(data, 1)?,
            }
            storage.save_region(Region::Socd)?;
        }
    }
    Ok(())
}

/// Reads back the committed settings. Per-key values are reported for the first key,
/// since the channel sets every key at once.
fn get_value<S, const ROWS: usize, const COLS: usize>(
    storage: &Storage<S, ROWS, COLS>,
    data: &mut [u8],
) -> Result<(), Error<S::Error>>
where
    S: embedded_storage::Storage,
    S::Error: Debug + 'static,
{
    let config = storage.config();
    match value_id(data)? {
        ValueId::Indicator { index, field } => {
            let indicator = &config.indicators[index];
            match field {
                IndicatorField::Enabled => write_bytes(data, &[indicator.enabled as u8])?,
                IndicatorField::Brightness => write_bytes(data, &[indicator.v])?,
                IndicatorField::Color => write_bytes(data, &[indicator.h, indicator.s])?,
                IndicatorField::FuncLow => write_bytes(data, &[indicator.func & 0x0F])?,
                IndicatorField::FuncHigh => write_bytes(data, &[indicator.func >> 4])?,
            }
        }
        ValueId::ActuationMode => {
            let mode =
                config.threshold_field(KeySwitchIdentifier::new(0, 0), KeyField::ActuationMode)?;
            write_bytes(data, &[mode as u8])?;
        }
        ValueId::Threshold(field) => {
            let value = config.threshold_field(KeySwitchIdentifier::new(0, 0), field)?;
            if is_byte_field(field) {
                write_bytes(data, &[value as u8])?;
            } else {
                write_bytes(data, &value.to_be_bytes())?;
            }
        }
        ValueId::Socd { index, field } => {
            let pair = &config.socd_pairs[index];
            match field {
                SocdField::Enabled | SocdField::Resolution => {
                    write_bytes(data, &[pair.resolution as u8])?
                }
                SocdField::Key1 => write_bytes(data, &pair.keys[0].to_be_bytes())?,
                SocdField::Key2 => write_bytes(data, &pair.keys[1].to_be_bytes())?,
            }
        }
        // 操作だけの項目には値がない
        ValueId::SaveThresholdData
        | ValueId::BottomingCalibration
        | ValueId::NoiseFloorCalibration
        | ValueId::ShowCalibrationData
        | ValueId::ClearBottomingCalibrationData => {}
    }
    Ok(())
}
