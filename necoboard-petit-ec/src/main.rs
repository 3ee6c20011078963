#![no_std]
#![no_main]

use core::{
    cell::RefCell,
    fmt::Write,
    sync::atomic::{AtomicUsize, Ordering},
};

use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use defmt_rtt as _;
use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal_0_2::timer::CountDown;
use fugit::ExtU64;
use panic_probe as _;
use rp_pico::{
    hal::{
        self,
        adc::AdcPin,
        gpio::{
            bank0::Gpio26, DynPinId, FunctionSioInput, FunctionSioOutput, Pin, PullDown, PullNone,
        },
        usb::UsbBus,
        Adc, Timer,
    },
    pac::{self, interrupt},
};
use rustkbd_ec::{
    config::{Amux, EcConfig, Topology},
    matrix::{EcMatrix, EcSampler, LogWriter, OneShotAdc},
    storage::{PersistedConfig, RamStore, Storage},
    usb::{DeviceInfo, RawHidChannel, RAW_REPORT_SIZE},
    via,
};
use usb_device::class_prelude::UsbBusAllocator;

const ROWS: usize = 4;
const COLS: usize = 4;
const SELS: usize = 3;

const AMUXES: [Amux; 1] = [Amux {
    channels: &[0, 1, 2, 3],
}];
const TOPOLOGY: Topology<COLS> = Topology::new(&AMUXES, SELS);

/// スキャン周期
const SCAN_PERIOD_MICROS: u64 = 1_000;

const STORE_SIZE: usize = PersistedConfig::<ROWS, COLS>::BLOCK_SIZE;

type OutputPinType = Pin<DynPinId, FunctionSioOutput, PullDown>;
type SenseAdc = OneShotAdc<Adc, Adc, AdcPin<Pin<Gpio26, FunctionSioInput, PullNone>>>;
type MatrixType = EcMatrix<EcSampler<OutputPinType, SenseAdc, Timer, ROWS, SELS, 1>, ROWS, COLS>;

static mut CHANNEL: Mutex<RefCell<Option<RawHidChannel<'static, UsbBus>>>> =
    Mutex::new(RefCell::new(None));

#[entry]
fn main() -> ! {
    // These variables must be static due to lifetime constraints
    static mut USB_BUS: Option<UsbBusAllocator<hal::usb::UsbBus>> = None;

    defmt::info!("Launching necoboard-petit EC!");

    let mut pac = pac::Peripherals::take().unwrap();
    // The single-cycle I/O block controls our GPIO pins
    let sio = hal::Sio::new(pac.SIO);
    let pins = rp_pico::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    // Set up the watchdog driver - needed by the clock setup code
    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    // The default is to generate a 125 MHz system clock
    let clocks = hal::clocks::init_clocks_and_plls(
        rp_pico::XOSC_CRYSTAL_FREQ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let adc = Adc::new(pac.ADC, &mut pac.RESETS);
    let adc_pin = AdcPin::new(pins.gpio26.into_floating_input()).unwrap();

    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        pac.USBCTRL_REGS,
        pac.USBCTRL_DPRAM,
        clocks.usb_clock,
        true,
        &mut pac.RESETS,
    ));
    *USB_BUS = Some(usb_bus);

    // opa_shutdown は High で動作
    let mut opa_shutdown = pins.gpio27.into_push_pull_output();
    opa_shutdown.set_high().ok();

    let config = EcConfig::DEFAULT;
    let sampler = EcSampler::new(
        [
            pins.gpio12.into_push_pull_output().into_dyn_pin(),
            pins.gpio13.into_push_pull_output().into_dyn_pin(),
            pins.gpio14.into_push_pull_output().into_dyn_pin(),
            pins.gpio15.into_push_pull_output().into_dyn_pin(),
        ],
        [
            pins.gpio20.into_push_pull_output().into_dyn_pin(),
            pins.gpio19.into_push_pull_output().into_dyn_pin(),
            pins.gpio18.into_push_pull_output().into_dyn_pin(),
        ],
        [pins.gpio21.into_push_pull_output().into_dyn_pin()],
        pins.gpio28.into_push_pull_output().into_dyn_pin(),
        PinState::High,
        // 12bit の ADC を 10bit に落とす
        OneShotAdc::new(adc, adc_pin, 2),
        timer,
        &config,
    );

    // TODO: back this with the last flash sector once a flash driver is wired up
    let mut storage = Storage::<_, ROWS, COLS>::load(RamStore::<STORE_SIZE>::new(), 0).unwrap();
    let mut matrix: MatrixType = EcMatrix::new(sampler, TOPOLOGY, &[], config, storage.config());

    // 起動時はキーに触れていないものとする
    matrix.start_noise_floor_calibration();
    matrix.run_noise_floor_calibration();
    matrix.show_calibration_data(&mut LogWriter::new()).ok();

    let device_info = DeviceInfo {
        manufacturer: "necocen",
        vendor_id: 0x0c0d,
        product_id: 0x8030,
        product_name: "necoboard petit EC",
        serial_number: "17",
    };
    let channel = RawHidChannel::new(device_info, USB_BUS.as_ref().unwrap()).unwrap();
    cortex_m::interrupt::free(|cs| unsafe {
        CHANNEL.borrow(cs).replace(Some(channel));
    });

    unsafe {
        // Enable the USB interrupt
        pac::NVIC::unmask(hal::pac::Interrupt::USBCTRL_IRQ);
    }
    // defmt のタイムスタンプを実装します
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    defmt::timestamp!("{=usize}", {
        // NOTE(no-CAS) `timestamps` runs with interrupts disabled
        let n = COUNT.load(Ordering::Relaxed);
        COUNT.store(n + 1, Ordering::Relaxed);
        n
    });

    let mut tick = timer.count_down();
    tick.start(SCAN_PERIOD_MICROS.micros());
    let mut report = [0u8; RAW_REPORT_SIZE];
    loop {
        let (snapshot, changed) = matrix.scan();
        if changed {
            let mut line = LogWriter::new();
            for key in snapshot.pressed_keys::<{ ROWS * COLS }>() {
                write!(line, "({},{}) ", key.row, key.col).ok();
            }
            line.flush();
        }

        let received = cortex_m::interrupt::free(|cs| unsafe {
            CHANNEL
                .borrow(cs)
                .borrow()
                .as_ref()
                .and_then(|channel| channel.receive(&mut report))
        });
        if received.is_some() {
            if let Err(e) = via::custom_value_command(&mut matrix, &mut storage, &mut report) {
                defmt::warn!("custom value command failed: {}", e);
            }
            cortex_m::interrupt::free(|cs| unsafe {
                if let Some(channel) = CHANNEL.borrow(cs).borrow().as_ref() {
                    if let Err(e) = channel.send(&report) {
                        defmt::warn!("UsbError: {}", defmt::Debug2Format(&e));
                    }
                }
            });
        }

        nb::block!(tick.wait()).ok();
    }
}

#[allow(non_snake_case)]
#[interrupt]
fn USBCTRL_IRQ() {
    cortex_m::interrupt::free(|cs| unsafe {
        if let Some(channel) = CHANNEL.borrow(cs).borrow_mut().as_mut() {
            channel.poll();
        }
    });
}
