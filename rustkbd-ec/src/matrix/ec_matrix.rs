use defmt::Format;

use crate::{
    config::{EcConfig, Topology, DEFAULT_EXTREMUM},
    log::{debug, info},
    storage::PersistedConfig,
    ConfigError,
};

use super::{
    KeyField, KeyState, KeySwitchIdentifier, MatrixRow, MatrixSnapshot, RawSampler, RescaleMode,
};

/// State the scan owns. Reseeded from [`PersistedConfig`] at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeConfig<const ROWS: usize, const COLS: usize> {
    /// A bottoming calibration session is running.
    pub bottoming_calibration: bool,
    pub keys: [[KeyState; COLS]; ROWS],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum KeySelector {
    All,
    Key(KeySwitchIdentifier),
}

/// Which copies of the settings an edit reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum UpdateMode {
    /// The running matrix only, until committed.
    RuntimeOnly,
    /// The running matrix and the persisted configuration.
    Persisted,
}

pub struct EcMatrix<R: RawSampler, const ROWS: usize, const COLS: usize> {
    pub(crate) sampler: R,
    topology: Topology<COLS>,
    /// `(row, col)` positions that are never sampled.
    unused_positions: &'static [(u8, u8)],
    pub(super) config: EcConfig,
    pub(super) runtime: RuntimeConfig<ROWS, COLS>,
    matrix: MatrixSnapshot<ROWS>,
    /// Last raw sample of each key.
    pub(super) sw_value: [[u16; COLS]; ROWS],
}

impl<R: RawSampler, const ROWS: usize, const COLS: usize> EcMatrix<R, ROWS, COLS> {
    const COLUMNS_FIT_IN_ROW: () = assert!(
        COLS <= MatrixRow::BITS as usize,
        "too many columns for a matrix row"
    );

    pub fn new(
        sampler: R,
        topology: Topology<COLS>,
        unused_positions: &'static [(u8, u8)],
        config: EcConfig,
        persisted: &PersistedConfig<ROWS, COLS>,
    ) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::COLUMNS_FIT_IN_ROW;

        let keys = core::array::from_fn(|row| {
            core::array::from_fn(|col| {
                let key = &persisted.keys[row][col];
                KeyState::new(
                    key.settings,
                    key.bottoming_calibration_reading,
                    config.expected_noise_floor,
                )
            })
        });
        EcMatrix {
            sampler,
            topology,
            unused_positions,
            config,
            runtime: RuntimeConfig {
                bottoming_calibration: false,
                keys,
            },
            matrix: MatrixSnapshot::new(),
            sw_value: [[0; COLS]; ROWS],
        }
    }

    /// Replaces the working settings and bottoming readings with the persisted ones.
    /// Noise floors are kept.
    pub fn reload(&mut self, persisted: &PersistedConfig<ROWS, COLS>) {
        self.runtime.bottoming_calibration = false;
        for (keys, persisted) in self.runtime.keys.iter_mut().zip(persisted.keys.iter()) {
            for (key, persisted) in keys.iter_mut().zip(persisted.iter()) {
                key.settings = persisted.settings;
                key.bottoming_calibration_reading = persisted.bottoming_calibration_reading;
                key.bottoming_calibration_starter = true;
                key.extremum = DEFAULT_EXTREMUM;
                key.rescale_thresholds(RescaleMode::All);
            }
        }
        info!("EC runtime config reloaded");
    }

    /// Samples every key once. The flag tells whether any key changed state,
    /// and is always false during a bottoming calibration session.
    pub fn scan(&mut self) -> (MatrixSnapshot<ROWS>, bool) {
        let calibrating = self.runtime.bottoming_calibration;
        let mut changed = false;
        self.sweep(|matrix, row, col, sample| {
            let threshold = matrix.config.bottoming_calibration_threshold;
            let key = &mut matrix.runtime.keys[row][col];
            if calibrating {
                key.capture_bottoming(sample, threshold);
                return;
            }
            let pressed = matrix.matrix.is_pressed(row, col);
            let now = key.update(sample, pressed, &matrix.config);
            if now != pressed {
                matrix.matrix.set(row, col, now);
                changed = true;
            }
        });
        (self.matrix, changed && !calibrating)
    }

    /// Visits every wired, used position in scan order after sampling it.
    pub(super) fn sweep<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Self, usize, usize, u16),
    {
        let mut offset = 0;
        for (index, amux) in self.topology.amuxes().iter().enumerate() {
            self.sampler.disable_unused_amux(index);
            for (local, &channel) in amux.channels.iter().enumerate() {
                let col = offset + local;
                for row in 0..ROWS {
                    if self.is_unused_position(row, col) {
                        continue;
                    }
                    self.sampler.disable_unused_row(row);
                    let sample = self.sampler.read_raw(index, channel, row);
                    self.sw_value[row][col] = sample;
                    visit(self, row, col, sample);
                }
            }
            offset += amux.channels.len();
        }
    }

    pub fn is_unused_position(&self, row: usize, col: usize) -> bool {
        self.unused_positions
            .iter()
            .any(|&(r, c)| r as usize == row && c as usize == col)
    }

    /// Sets `field` of the selected keys and rescales what depends on it.
    pub fn set_threshold_field(
        &mut self,
        selector: KeySelector,
        field: KeyField,
        value: u16,
        mode: UpdateMode,
        persisted: &mut PersistedConfig<ROWS, COLS>,
    ) -> Result<(), ConfigError> {
        let update = field.parse(value)?;
        let mirror = mode == UpdateMode::Persisted;
        match selector {
            KeySelector::All => {
                for (keys, persisted) in
                    self.runtime.keys.iter_mut().zip(persisted.keys.iter_mut())
                {
                    for (key, persisted) in keys.iter_mut().zip(persisted.iter_mut()) {
                        key.apply(update);
                        if mirror {
                            update.apply(&mut persisted.settings);
                        }
                    }
                }
            }
            KeySelector::Key(id) => {
                let out_of_range = ConfigError::KeyOutOfRange {
                    row: id.row,
                    col: id.col,
                };
                let key = self.key_mut(id).ok_or(out_of_range)?;
                key.apply(update);
                if mirror {
                    let persisted = persisted.key_mut(id).ok_or(out_of_range)?;
                    update.apply(&mut persisted.settings);
                }
            }
        }
        debug!("threshold field set: {}", value);
        Ok(())
    }

    /// Working value of `field` for `key`.
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

    /// Copies the working settings of one threshold family into `persisted`.
    pub fn commit_settings(&self, mode: RescaleMode, persisted: &mut PersistedConfig<ROWS, COLS>) {
        for (keys, persisted) in self.runtime.keys.iter().zip(persisted.keys.iter_mut()) {
            for (key, persisted) in keys.iter().zip(persisted.iter_mut()) {
                persisted.settings.copy_family(&key.settings, mode);
            }
        }
        info!("thresholds committed");
    }

    pub fn key(&self, key: KeySwitchIdentifier) -> Option<&KeyState> {
        self.runtime.keys.get(key.row as usize)?.get(key.col as usize)
    }

    fn key_mut(&mut self, key: KeySwitchIdentifier) -> Option<&mut KeyState> {
        self.runtime
            .keys
            .get_mut(key.row as usize)?
            .get_mut(key.col as usize)
    }

    pub fn runtime(&self) -> &RuntimeConfig<ROWS, COLS> {
        &self.runtime
    }

    pub fn config(&self) -> &EcConfig {
        &self.config
    }

    pub fn snapshot(&self) -> MatrixSnapshot<ROWS> {
        self.matrix
    }

    pub fn sampler(&self) -> &R {
        &self.sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Amux, EcConfig, MAX_RAW},
        matrix::{test_sampler::ScriptedSampler, ActuationMode, KeySettings},
    };

    const SPLIT: [Amux; 2] = [
        Amux {
            channels: &[3, 0, 1],
        },
        Amux { channels: &[2] },
    ];
    const TOPOLOGY: Topology<4> = Topology::new(&SPLIT, 2);
    const UNUSED: [(u8, u8); 1] = [(1, 3)];

    type Matrix = EcMatrix<ScriptedSampler, 2, 4>;

    fn calibrated() -> PersistedConfig<2, 4> {
        let mut persisted = PersistedConfig::new();
        for key in persisted.keys.iter_mut().flatten() {
            key.settings.apc_actuation_threshold = 400;
            key.settings.apc_release_threshold = 200;
            key.bottoming_calibration_reading = 1000;
        }
        persisted
    }

    fn matrix(persisted: &PersistedConfig<2, 4>) -> Matrix {
        let sampler = ScriptedSampler::new(TOPOLOGY, 2, 100);
        let config = EcConfig {
            expected_noise_floor: 100,
            ..EcConfig::DEFAULT
        };
        EcMatrix::new(sampler, TOPOLOGY, &UNUSED, config, persisted)
    }

    #[test]
    fn scan_walks_multiplexers_in_column_order() {
        let mut matrix = matrix(&calibrated());
        matrix.scan();
        let reads = &matrix.sampler().reads;
        assert_eq!(
            reads.as_slice(),
            &[(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (1, 2), (0, 3)]
        );
        assert_eq!(matrix.sampler().disabled_amuxes, [0, 1]);
    }

    #[test]
    fn unused_positions_are_never_sampled() {
        let persisted = calibrated();
        let mut matrix = matrix(&persisted);
        let before = *matrix.key(KeySwitchIdentifier::new(1, 3)).unwrap();
        matrix.sampler.set_resting(1, 3, 900);
        for _ in 0..3 {
            let (snapshot, _) = matrix.scan();
            assert!(!snapshot.is_pressed(1, 3));
        }
        matrix.start_noise_floor_calibration();
        matrix.run_noise_floor_calibration();
        assert_eq!(matrix.sampler().read_count(1, 3), 0);
        let after = matrix.key(KeySwitchIdentifier::new(1, 3)).unwrap();
        assert_eq!(after.bottoming_calibration_reading, before.bottoming_calibration_reading);
        assert_eq!(after.extremum, before.extremum);
    }

    #[test]
    fn apc_scenario_reports_changes() {
        let mut matrix = matrix(&calibrated());
        matrix.sampler.queue(1, 2, &[100, 100, 500, 500, 200]);
        let changes: Vec<(bool, bool)> = (0..5)
            .map(|_| {
                let (snapshot, changed) = matrix.scan();
                (snapshot.is_pressed(1, 2), changed)
            })
            .collect();
        assert_eq!(
            changes,
            [
                (false, false),
                (false, false),
                (true, true),
                (true, false),
                (false, true)
            ]
        );
    }

    #[test]
    fn heterogeneous_multiplexers_map_columns() {
        let mut matrix = matrix(&calibrated());
        // 2番目のマルチプレクサの最初のチャンネルは列 3
        matrix.sampler.set_resting(0, 3, 900);
        let (snapshot, changed) = matrix.scan();
        assert!(changed);
        assert_eq!(snapshot.rows(), &[0b1000, 0]);
    }

    #[test]
    fn bottoming_session_suppresses_changes() {
        let mut matrix = matrix(&calibrated());
        matrix.enter_bottoming_calibration();
        matrix.sampler.set_resting(0, 0, 900);
        let (snapshot, changed) = matrix.scan();
        assert!(!changed);
        assert_eq!(snapshot.rows(), &[0, 0]);
    }

    #[test]
    fn runtime_edit_is_not_committed_until_asked() {
        let mut persisted = calibrated();
        let mut matrix = matrix(&persisted);
        let key = KeySwitchIdentifier::new(0, 1);
        matrix
            .set_threshold_field(
                KeySelector::Key(key),
                KeyField::ApcActuationThreshold,
                700,
                UpdateMode::RuntimeOnly,
                &mut persisted,
            )
            .unwrap();
        assert_eq!(matrix.threshold_field(key, KeyField::ApcActuationThreshold), Ok(700));
        assert_eq!(persisted.threshold_field(key, KeyField::ApcActuationThreshold), Ok(400));
        assert_eq!(
            matrix.key(key).unwrap().rescaled.apc_actuation_threshold,
            crate::matrix::rescale(700, 100, 1000)
        );

        matrix.commit_settings(RescaleMode::RapidTrigger, &mut persisted);
        assert_eq!(persisted.threshold_field(key, KeyField::ApcActuationThreshold), Ok(400));
        matrix.commit_settings(RescaleMode::Apc, &mut persisted);
        assert_eq!(persisted.threshold_field(key, KeyField::ApcActuationThreshold), Ok(700));
    }

    #[test]
    fn persisted_edit_reaches_every_key() {
        let mut persisted = calibrated();
        let mut matrix = matrix(&persisted);
        matrix
            .set_threshold_field(
                KeySelector::All,
                KeyField::ActuationMode,
                1,
                UpdateMode::Persisted,
                &mut persisted,
            )
            .unwrap();
        for key in persisted.keys.iter().flatten() {
            assert_eq!(key.settings.actuation_mode, ActuationMode::RapidTrigger);
        }
        for key in matrix.runtime().keys.iter().flatten() {
            assert_eq!(key.settings.actuation_mode, ActuationMode::RapidTrigger);
            assert_eq!(key.extremum, MAX_RAW);
        }
    }

    #[test]
    fn invalid_edits_change_nothing() {
        let mut persisted = calibrated();
        let mut matrix = matrix(&persisted);
        let before = *matrix.runtime();
        assert_eq!(
            matrix.set_threshold_field(
                KeySelector::Key(KeySwitchIdentifier::new(2, 0)),
                KeyField::RtReleaseOffset,
                10,
                UpdateMode::Persisted,
                &mut persisted,
            ),
            Err(ConfigError::KeyOutOfRange { row: 2, col: 0 })
        );
        assert_eq!(
            matrix.set_threshold_field(
                KeySelector::All,
                KeyField::RtReleaseOffset,
                300,
                UpdateMode::Persisted,
                &mut persisted,
            ),
            Err(ConfigError::InvalidValue { value: 300 })
        );
        assert_eq!(matrix.runtime(), &before);
        assert_eq!(persisted, calibrated());
    }

    #[test]
    fn reload_keeps_noise_floor() {
        let mut persisted = calibrated();
        let mut matrix = matrix(&persisted);
        matrix.sampler.set_resting(0, 0, 40);
        matrix.scan();
        assert_eq!(matrix.runtime().keys[0][0].noise_floor, 40);

        persisted.keys[0][0].settings = KeySettings {
            apc_actuation_threshold: 800,
            ..KeySettings::DEFAULT
        };
        matrix.reload(&persisted);
        let key = &matrix.runtime().keys[0][0];
        assert_eq!(key.noise_floor, 40);
        assert_eq!(key.settings.apc_actuation_threshold, 800);
        assert_eq!(key.rescaled.apc_actuation_threshold, crate::matrix::rescale(800, 40, 1000));
    }
}
