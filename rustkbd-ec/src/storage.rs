//! Load and save of [`PersistedConfig`] over `embedded-storage`.
//!
//! The block starts with a header (magic, then a CRC of the payload, both
//! little endian) followed by the indicator, key and SOCD records. Writes go
//! record by record, so a single region can be saved without touching the
//! others. The header is rewritten on every save.

mod persisted_config;
mod ram_store;

use core::fmt::Debug;

pub use persisted_config::{
    IndicatorConfig, PersistedConfig, PersistedKeyState, Region, SocdPair, SocdResolution,
    BLOCK_HEADER_SIZE, INDICATOR_COUNT, MAGIC, SOCD_PAIR_COUNT,
};
pub use ram_store::{RamStore, RamStoreError};

use persisted_config::MAX_RECORD_SIZE;

use crate::{
    log::{info, warn},
    Error,
};

pub struct Storage<S, const ROWS: usize, const COLS: usize> {
    store: S,
    offset: u32,
    config: PersistedConfig<ROWS, COLS>,
}

impl<S, const ROWS: usize, const COLS: usize> Storage<S, ROWS, COLS>
where
    S: embedded_storage::Storage,
    S::Error: Debug + 'static,
{
    /// Reads the block at `offset`. A blank or corrupt block is replaced by the defaults.
    pub fn load(store: S, offset: u32) -> Result<Self, Error<S::Error>> {
        let required = offset as usize + PersistedConfig::<ROWS, COLS>::BLOCK_SIZE;
        let capacity = store.capacity();
        if capacity < required {
            return Err(Error::StorageTooSmall { required, capacity });
        }

        let mut storage = Storage {
            store,
            offset,
            config: PersistedConfig::new(),
        };
        match storage.read_block()? {
            Some(config) => {
                info!("EC config loaded");
                storage.config = config;
            }
            None => {
                warn!("EC config missing or corrupt, writing defaults");
                storage.save()?;
            }
        }
        Ok(storage)
    }

    pub fn config(&self) -> &PersistedConfig<ROWS, COLS> {
        &self.config
    }

    /// Changes made through this reference stay in memory until saved.
    pub fn config_mut(&mut self) -> &mut PersistedConfig<ROWS, COLS> {
        &mut self.config
    }

    pub fn save(&mut self) -> Result<(), Error<S::Error>> {
        for region in Region::ALL {
            self.write_region(region)?;
        }
        self.write_header()
    }

    pub fn save_region(&mut self, region: Region) -> Result<(), Error<S::Error>> {
        self.write_region(region)?;
        self.write_header()
    }

    /// Replaces the whole block with the defaults.
    pub fn reset(&mut self) -> Result<(), Error<S::Error>> {
        self.config = PersistedConfig::new();
        self.save()
    }

    pub fn release(self) -> S {
        self.store
    }

    fn write_region(&mut self, region: Region) -> Result<(), Error<S::Error>> {
        let mut buf = [0; MAX_RECORD_SIZE];
        for index in 0..PersistedConfig::<ROWS, COLS>::record_count(region) {
            let len = self.config.encode_record(region, index, &mut buf);
            let offset = PersistedConfig::<ROWS, COLS>::record_offset(region, index);
            self.write(offset, &buf[..len])?;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), Error<S::Error>> {
        let mut header = [0; BLOCK_HEADER_SIZE];
        header[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        header[2..4].copy_from_slice(&self.config.checksum().to_le_bytes());
        self.write(0, &header)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error<S::Error>> {
        self.store
            .write(self.offset + offset as u32, bytes)
            .map_err(|source| Error::Storage { source })
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<(), Error<S::Error>> {
        self.store
            .read(self.offset + offset as u32, bytes)
            .map_err(|source| Error::Storage { source })
    }

    /// `None` when the block does not hold a valid configuration.
    fn read_block(&mut self) -> Result<Option<PersistedConfig<ROWS, COLS>>, Error<S::Error>> {
        let mut header = [0; BLOCK_HEADER_SIZE];
        self.read(0, &mut header)?;
        if u16::from_le_bytes([header[0], header[1]]) != MAGIC {
            return Ok(None);
        }

        let mut config = PersistedConfig::new();
        let mut buf = [0; MAX_RECORD_SIZE];
        for region in Region::ALL {
            let len = PersistedConfig::<ROWS, COLS>::record_size(region);
            for index in 0..PersistedConfig::<ROWS, COLS>::record_count(region) {
                let offset = PersistedConfig::<ROWS, COLS>::record_offset(region, index);
                self.read(offset, &mut buf[..len])?;
                if config.decode_record(region, index, &buf[..len]).is_err() {
                    return Ok(None);
                }
            }
        }

        let checksum = u16::from_le_bytes([header[2], header[3]]);
        if config.checksum() != checksum {
            return Ok(None);
        }
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{ActuationMode, KeySettings};

    const ROWS: usize = 2;
    const COLS: usize = 2;
    const STORE_SIZE: usize = 256;
    const OFFSET: u32 = 16;

    type TestStorage = Storage<RamStore<STORE_SIZE>, ROWS, COLS>;

    #[test]
    fn blank_store_gets_defaults() {
        let storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        assert_eq!(storage.config(), &PersistedConfig::new());

        let store = storage.release();
        let header = &store.as_bytes()[OFFSET as usize..OFFSET as usize + 2];
        assert_eq!(header, &MAGIC.to_le_bytes());
        assert!(store.as_bytes()[..OFFSET as usize].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn saved_config_loads_back() {
        let mut storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        let config = storage.config_mut();
        config.keys[1][1].settings = KeySettings {
            actuation_mode: ActuationMode::RapidTrigger,
            rt_actuation_offset: 20,
            ..KeySettings::DEFAULT
        };
        config.keys[0][1].bottoming_calibration_reading = 812;
        config.indicators[1].v = 42;
        config.socd_pairs[0].resolution = SocdResolution::Last;
        let expected = *config;
        storage.save().unwrap();

        let storage = TestStorage::load(storage.release(), OFFSET).unwrap();
        assert_eq!(storage.config(), &expected);
    }

    #[test]
    fn region_save_keeps_block_valid() {
        let mut storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        storage.config_mut().keys[0][0].bottoming_calibration_reading = 640;
        storage.save_region(Region::Keys).unwrap();

        let storage = TestStorage::load(storage.release(), OFFSET).unwrap();
        assert_eq!(storage.config().keys[0][0].bottoming_calibration_reading, 640);
    }

    #[test]
    fn unsaved_edits_are_not_persisted() {
        let mut storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        storage.config_mut().indicators[0].h = 99;
        storage.save_region(Region::Socd).unwrap();
        let storage = TestStorage::load(storage.release(), OFFSET).unwrap();
        // ヘッダの CRC が合わなくなるので初期値に戻る
        assert_eq!(storage.config().indicators[0].h, 0);
    }

    #[test]
    fn corrupt_block_is_replaced() {
        let mut storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        storage.config_mut().keys[1][0].bottoming_calibration_reading = 500;
        storage.save().unwrap();
        let mut store = storage.release();
        let offset =
            OFFSET as usize + PersistedConfig::<ROWS, COLS>::record_offset(Region::Keys, 2);
        store.as_bytes_mut()[offset + 9] ^= 0x01;

        let storage = TestStorage::load(store, OFFSET).unwrap();
        assert_eq!(storage.config(), &PersistedConfig::new());
        let storage = TestStorage::load(storage.release(), OFFSET).unwrap();
        assert_eq!(storage.config(), &PersistedConfig::new());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut storage = TestStorage::load(RamStore::new(), OFFSET).unwrap();
        storage.config_mut().keys[0][0].settings.apc_actuation_threshold = 900;
        storage.save().unwrap();
        storage.reset().unwrap();
        let storage = TestStorage::load(storage.release(), OFFSET).unwrap();
        assert_eq!(storage.config(), &PersistedConfig::new());
    }

    #[test]
    fn store_too_small() {
        let result = Storage::<RamStore<64>, ROWS, COLS>::load(RamStore::new(), 0);
        assert!(matches!(
            result,
            Err(Error::StorageTooSmall {
                required: 94,
                capacity: 64
            })
        ));
    }
}
