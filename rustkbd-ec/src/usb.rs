mod device_info;
mod raw_hid_channel;
mod raw_hid_report;

pub use device_info::DeviceInfo;
pub use raw_hid_channel::RawHidChannel;
pub use raw_hid_report::{RawHidReport, RAW_REPORT_SIZE};
