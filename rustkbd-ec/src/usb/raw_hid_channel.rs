use usb_device::{
    class_prelude::{UsbBus, UsbBusAllocator},
    device::{StringDescriptors, UsbDevice, UsbDeviceBuilder, UsbDeviceState, UsbVidPid},
    prelude::BuilderError,
    LangID, UsbError,
};
use usbd_hid::{descriptor::SerializedDescriptor, hid_class::HIDClass};

use super::{DeviceInfo, RawHidReport, RAW_REPORT_SIZE};

/// USB device exposing a single raw HID interface for the configuration channel.
pub struct RawHidChannel<'a, B: UsbBus> {
    usb_device: UsbDevice<'a, B>,
    raw_hid: HIDClass<'a, B>,
}

impl<'a, B: UsbBus> RawHidChannel<'a, B> {
    pub fn new(
        device_info: DeviceInfo,
        usb_bus_alloc: &'a UsbBusAllocator<B>,
    ) -> Result<RawHidChannel<'a, B>, BuilderError> {
        let raw_hid = HIDClass::new(usb_bus_alloc, RawHidReport::desc(), 1);
        let descriptors = StringDescriptors::new(LangID::EN_US)
            .manufacturer(device_info.manufacturer)
            .serial_number(device_info.serial_number)
            .product(device_info.product_name);
        let usb_device = UsbDeviceBuilder::new(
            usb_bus_alloc,
            UsbVidPid(device_info.vendor_id, device_info.product_id),
        )
        .strings(&[descriptors])?
        .device_class(0)
        .build();

        Ok(RawHidChannel {
            usb_device,
            raw_hid,
        })
    }

    pub fn poll(&mut self) -> bool {
        self.usb_device.poll(&mut [&mut self.raw_hid])
    }

    pub fn state(&self) -> UsbDeviceState {
        self.usb_device.state()
    }

    /// Takes the next report sent by the host, if any.
    pub fn receive(&self, report: &mut [u8; RAW_REPORT_SIZE]) -> Option<usize> {
        match self.raw_hid.pull_raw_output(report) {
            Ok(len) if len > 0 => Some(len),
            _ => None,
        }
    }

    pub fn send(&self, report: &[u8; RAW_REPORT_SIZE]) -> Result<usize, UsbError> {
        self.raw_hid.push_raw_input(report)
    }
}
