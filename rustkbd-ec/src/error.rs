use core::fmt::Debug;

use defmt::Format;

/// Errors from reading, writing or editing the EC configuration.
#[derive(Debug, Format)]
pub enum Error<E: 'static + Debug> {
    Storage {
        #[defmt(Debug2Format)]
        source: E,
    },
    StorageTooSmall {
        required: usize,
        capacity: usize,
    },
    Config {
        source: ConfigError,
    },
}

impl<E: 'static + Debug> From<ConfigError> for Error<E> {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}

/// Rejected configuration edits. None of these touch the running matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub enum ConfigError {
    UnknownValueId { id: u8 },
    InvalidValue { value: u16 },
    KeyOutOfRange { row: u8, col: u8 },
    ShortBuffer,
}
