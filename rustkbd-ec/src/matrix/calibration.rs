//! Noise floor and bottoming calibration.

use crate::{
    config::{MAX_RAW, UNSET_BOTTOMING_READING},
    log::info,
    storage::PersistedConfig,
};

use super::{EcMatrix, KeyState, RawSampler, RescaleMode};

impl KeyState {
    /// Records `sample` if it is a real press, i.e. more than `threshold` above the noise floor.
    pub fn capture_bottoming(&mut self, sample: u16, threshold: u16) {
        if u32::from(sample) <= u32::from(self.noise_floor) + u32::from(threshold) {
            return;
        }
        if self.bottoming_calibration_starter {
            self.bottoming_calibration_reading = sample;
            self.bottoming_calibration_starter = false;
        } else if sample > self.bottoming_calibration_reading {
            self.bottoming_calibration_reading = sample;
        }
    }

    /// Keeps the captured reading only if it is a real press. Otherwise the key
    /// gets `MAX_RAW` so that an absent switch does not actuate on noise.
    pub fn finish_bottoming(&mut self, threshold: u16) {
        let weak = u32::from(self.bottoming_calibration_reading)
            <= u32::from(self.noise_floor) + u32::from(threshold);
        if self.bottoming_calibration_starter || weak {
            self.bottoming_calibration_reading = MAX_RAW;
        }
        self.rescale_thresholds(RescaleMode::All);
    }
}

impl<R: RawSampler, const ROWS: usize, const COLS: usize> EcMatrix<R, ROWS, COLS> {
    pub fn start_noise_floor_calibration(&mut self) {
        let floor = self.config.expected_noise_floor;
        for key in self.runtime.keys.iter_mut().flatten() {
            key.noise_floor = floor;
            key.rescale_thresholds(RescaleMode::All);
        }
    }

    /// Averages `noise_floor_sampling_count` sweeps into each key's noise floor.
    /// No key may be pressed meanwhile.
    pub fn run_noise_floor_calibration(&mut self) {
        let rounds = self.config.noise_floor_sampling_count.max(1);
        let delay = self.config.noise_floor_sampling_delay_ms;
        let mut sums = [[0u32; COLS]; ROWS];
        let mut sampled = [[false; COLS]; ROWS];
        for _ in 0..rounds {
            self.sweep(|_, row, col, sample| {
                sums[row][col] += u32::from(sample);
                sampled[row][col] = true;
            });
            self.sampler.delay_ms(delay);
        }

        for (row, keys) in self.runtime.keys.iter_mut().enumerate() {
            for (col, key) in keys.iter_mut().enumerate() {
                if sampled[row][col] {
                    key.noise_floor = (sums[row][col] / u32::from(rounds)) as u16;
                    key.rescale_thresholds(RescaleMode::All);
                }
            }
        }
        info!("noise floor calibrated over {} rounds", rounds);
    }

    pub fn enter_bottoming_calibration(&mut self) {
        self.runtime.bottoming_calibration = true;
        for key in self.runtime.keys.iter_mut().flatten() {
            key.bottoming_calibration_starter = true;
            key.bottoming_calibration_reading = UNSET_BOTTOMING_READING;
        }
        info!("bottoming calibration started");
    }

    /// Ends the session and mirrors the readings into `persisted`. Does nothing
    /// when no session is running.
    pub fn exit_bottoming_calibration(&mut self, persisted: &mut PersistedConfig<ROWS, COLS>) {
        if !self.runtime.bottoming_calibration {
            return;
        }
        self.runtime.bottoming_calibration = false;
        let threshold = self.config.bottoming_calibration_threshold;
        for (keys, persisted) in self.runtime.keys.iter_mut().zip(persisted.keys.iter_mut()) {
            for (key, persisted) in keys.iter_mut().zip(persisted.iter_mut()) {
                key.finish_bottoming(threshold);
                persisted.bottoming_calibration_reading = key.bottoming_calibration_reading;
            }
        }
        info!("bottoming calibration done");
    }

    pub fn is_bottoming_calibration_active(&self) -> bool {
        self.runtime.bottoming_calibration
    }
}
