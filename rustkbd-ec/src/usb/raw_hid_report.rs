use usbd_hid::descriptor::generator_prelude::*;
use usbd_hid_macros::gen_hid_descriptor;

/// Size of both reports; the descriptor below spells it out as a literal.
pub const RAW_REPORT_SIZE: usize = 32;

/// Vendor defined reports that VIA looks for (usage page 0xFF60, usage 0x61).
#[gen_hid_descriptor(
    (collection = APPLICATION, usage_page = 0xFF60, usage = 0x61) = {
        (usage = 0x62, logical_min = 0x0) = {
            #[item_settings data,variable,absolute] input_data=input;
        };
        (usage = 0x63, logical_min = 0x0) = {
            #[item_settings data,variable,absolute] output_data=output;
        };
    }
)]
#[repr(C)]
pub struct RawHidReport {
    pub input_data: [u8; 32],
    pub output_data: [u8; 32],
}
