mod calibration;
mod diagnostics;
mod ec_matrix;
mod key_state;
mod rescale;
mod sampler;
mod snapshot;
mod switch_identifier;
#[cfg(test)]
pub(crate) mod test_sampler;

pub use diagnostics::{write_table, LogWriter};
pub use ec_matrix::{EcMatrix, KeySelector, RuntimeConfig, UpdateMode};
pub use key_state::{ActuationMode, KeyField, KeySettings, KeyState, KeyUpdate, RescaledThresholds};
pub use rescale::{rescale, rescale_inverse, RescaleMode};
pub use sampler::{AnalogRead, EcSampler, OneShotAdc, RawSampler};
pub use snapshot::{MatrixRow, MatrixSnapshot};
pub use switch_identifier::KeySwitchIdentifier;
