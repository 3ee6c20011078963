#![cfg_attr(not(test), no_std)]

pub mod config;
mod error;
pub mod matrix;
pub mod storage;
#[cfg(feature = "usb")]
pub mod usb;
pub mod via;

pub use error::{ConfigError, Error};
pub use heapless::Vec;

// ホストでのテストでは defmt のロガーがないので log に差し替える
#[cfg(test)]
#[allow(unused_imports)]
mod log {
    pub use ::log::{debug, info, warn};
}

#[cfg(not(test))]
#[allow(unused_imports)]
mod log {
    pub use defmt::{debug, info, warn};
}
