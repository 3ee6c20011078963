use core::marker::PhantomData;

use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use embedded_hal_0_2::adc::{Channel, OneShot};

use crate::config::{EcConfig, MAX_RAW};

/// Hardware access the scan needs. Implementations never fail: a broken
/// sensor shows up as saturated or zero samples.
pub trait RawSampler {
    /// Disables every multiplexer except `amux`.
    fn disable_unused_amux(&mut self, amux: usize);
    /// Drives every row except `row` low.
    fn disable_unused_row(&mut self, row: usize);
    /// Takes one sample of the key behind `channel` of `amux` on `row`.
    fn read_raw(&mut self, amux: usize, channel: u8, row: usize) -> u16;
    fn delay_ms(&mut self, ms: u32);
}

/// One conversion of the sense line.
pub trait AnalogRead {
    fn read(&mut self) -> u16;
}

/// [`AnalogRead`] over an embedded-hal 0.2 one-shot ADC channel.
///
/// Readings are shifted right by `shift` bits and clamped to `MAX_RAW`, so a
/// 12-bit converter uses a shift of 2. A failed conversion reads as 0.
pub struct OneShotAdc<ADC, A, P> {
    adc: A,
    pin: P,
    shift: u8,
    _adc: PhantomData<ADC>,
}

impl<ADC, A, P> OneShotAdc<ADC, A, P>
where
    A: OneShot<ADC, u16, P>,
    P: Channel<ADC>,
{
    pub fn new(adc: A, pin: P, shift: u8) -> Self {
        OneShotAdc {
            adc,
            pin,
            shift,
            _adc: PhantomData,
        }
    }
}

impl<ADC, A, P> AnalogRead for OneShotAdc<ADC, A, P>
where
    A: OneShot<ADC, u16, P>,
    P: Channel<ADC>,
{
    fn read(&mut self) -> u16 {
        let shift = self.shift;
        nb::block!(self.adc.read(&mut self.pin))
            .map(|value: u16| (value >> shift).min(MAX_RAW))
            .unwrap_or(0)
    }
}

/// Pin level sampler for an EC matrix read through a bank of analog multiplexers
/// sharing their select lines and one sense line.
pub struct EcSampler<
    P: OutputPin,
    A: AnalogRead,
    D: DelayNs,
    const ROWS: usize,
    const SELS: usize,
    const AMUXES: usize,
> {
    rows: [P; ROWS],
    sels: [P; SELS],
    /// active low
    enables: [P; AMUXES],
    discharge: P,
    discharge_level: PinState,
    adc: A,
    delay: D,
    charge_time_us: u32,
    discharge_time_us: u32,
}

impl<
        P: OutputPin,
        A: AnalogRead,
        D: DelayNs,
        const ROWS: usize,
        const SELS: usize,
        const AMUXES: usize,
    > EcSampler<P, A, D, ROWS, SELS, AMUXES>
{
    /// `discharge_level` is the level that shorts the sense capacitor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut rows: [P; ROWS],
        sels: [P; SELS],
        mut enables: [P; AMUXES],
        mut discharge: P,
        discharge_level: PinState,
        adc: A,
        delay: D,
        config: &EcConfig,
    ) -> EcSampler<P, A, D, ROWS, SELS, AMUXES> {
        for pin in rows.iter_mut() {
            pin.set_low().ok();
        }
        for pin in enables.iter_mut() {
            pin.set_high().ok();
        }
        discharge.set_state(discharge_level).ok();

        EcSampler {
            rows,
            sels,
            enables,
            discharge,
            discharge_level,
            adc,
            delay,
            charge_time_us: config.charge_time_us,
            discharge_time_us: config.discharge_time_us,
        }
    }

    fn select_amux(&mut self, amux: usize, channel: u8) {
        // 選択線を切り替える間は無効にしておく
        self.enables[amux].set_high().ok();
        for (bit, pin) in self.sels.iter_mut().enumerate() {
            pin.set_state((channel & (1 << bit) != 0).into()).ok();
        }
        self.enables[amux].set_low().ok();
    }
}

impl<
        P: OutputPin,
        A: AnalogRead,
        D: DelayNs,
        const ROWS: usize,
        const SELS: usize,
        const AMUXES: usize,
    > RawSampler for EcSampler<P, A, D, ROWS, SELS, AMUXES>
{
    fn disable_unused_amux(&mut self, amux: usize) {
        for (i, pin) in self.enables.iter_mut().enumerate() {
            if i != amux {
                pin.set_high().ok();
            }
        }
    }

    fn disable_unused_row(&mut self, row: usize) {
        for (i, pin) in self.rows.iter_mut().enumerate() {
            if i != row {
                pin.set_low().ok();
            }
        }
    }

    fn read_raw(&mut self, amux: usize, channel: u8, row: usize) -> u16 {
        self.select_amux(amux, channel);

        // 充電中に割り込まれると値が壊れる
        let value = critical_section::with(|_| {
            self.discharge.set_state(!self.discharge_level).ok();
            self.rows[row].set_high().ok();
            self.delay.delay_us(self.charge_time_us);
            self.adc.read()
        });

        self.rows[row].set_low().ok();
        self.discharge.set_state(self.discharge_level).ok();
        self.delay.delay_us(self.discharge_time_us);
        value
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        convert::Infallible,
        rc::Rc,
        vec::Vec,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct MockPin(Rc<Cell<bool>>);

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.set(true);
            Ok(())
        }
    }

    impl MockPin {
        fn is_high(&self) -> bool {
            self.0.get()
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Reports the channel selected while the row and discharge lines are in
    /// the charging state, and 0 otherwise.
    struct ProbeAdc {
        row: MockPin,
        discharge: MockPin,
        sels: [MockPin; 3],
    }

    impl AnalogRead for ProbeAdc {
        fn read(&mut self) -> u16 {
            if !self.row.is_high() || self.discharge.is_high() {
                return 0;
            }
            self.sels
                .iter()
                .enumerate()
                .map(|(bit, pin)| u16::from(pin.is_high()) << bit)
                .sum::<u16>()
                + 100
        }
    }

    #[test]
    fn read_raw_selects_channel_and_restores_lines() {
        let rows: [MockPin; 2] = Default::default();
        let sels: [MockPin; 3] = Default::default();
        let enables: [MockPin; 2] = Default::default();
        let discharge = MockPin::default();
        let adc = ProbeAdc {
            row: rows[1].clone(),
            discharge: discharge.clone(),
            sels: sels.clone(),
        };
        let mut sampler = EcSampler::new(
            rows.clone(),
            sels.clone(),
            enables.clone(),
            discharge.clone(),
            PinState::High,
            adc,
            NoDelay,
            &EcConfig::DEFAULT,
        );
        assert!(enables.iter().all(|pin| pin.is_high()));
        assert!(discharge.is_high());

        sampler.disable_unused_amux(1);
        sampler.disable_unused_row(1);
        assert_eq!(sampler.read_raw(1, 5, 1), 105);

        assert!(enables[0].is_high());
        assert!(!enables[1].is_high());
        assert!(!rows[1].is_high());
        assert!(discharge.is_high());
    }

    #[test]
    fn other_rows_are_driven_low() {
        let rows: [MockPin; 3] = Default::default();
        let mut sampler: EcSampler<_, _, _, 3, 0, 1> = EcSampler::new(
            rows.clone(),
            [],
            [MockPin::default()],
            MockPin::default(),
            PinState::High,
            ProbeAdc {
                row: MockPin::default(),
                discharge: MockPin::default(),
                sels: Default::default(),
            },
            NoDelay,
            &EcConfig::DEFAULT,
        );
        for pin in rows.iter() {
            pin.0.set(true);
        }
        sampler.disable_unused_row(2);
        assert!(!rows[0].is_high());
        assert!(!rows[1].is_high());
        assert!(rows[2].is_high());
    }

    type PinLog = Rc<RefCell<Vec<(&'static str, bool)>>>;

    /// Appends every level it is driven to into a log shared by all pins.
    struct LoggedPin {
        name: &'static str,
        log: PinLog,
    }

    impl LoggedPin {
        fn new(name: &'static str, log: &PinLog) -> LoggedPin {
            LoggedPin {
                name,
                log: log.clone(),
            }
        }
    }

    impl embedded_hal::digital::ErrorType for LoggedPin {
        type Error = Infallible;
    }

    impl OutputPin for LoggedPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.name, false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.name, true));
            Ok(())
        }
    }

    struct ConstantAdc;

    impl AnalogRead for ConstantAdc {
        fn read(&mut self) -> u16 {
            300
        }
    }

    #[test]
    fn multiplexer_is_disabled_while_select_lines_change() {
        let log = PinLog::default();
        let mut sampler = EcSampler::new(
            [LoggedPin::new("row", &log)],
            [LoggedPin::new("sel0", &log), LoggedPin::new("sel1", &log)],
            [LoggedPin::new("en", &log)],
            LoggedPin::new("discharge", &log),
            PinState::High,
            ConstantAdc,
            NoDelay,
            &EcConfig::DEFAULT,
        );
        sampler.read_raw(0, 1, 0);
        log.borrow_mut().clear();

        assert_eq!(sampler.read_raw(0, 2, 0), 300);
        let events = log.borrow();
        let position = |event: (&'static str, bool)| {
            events.iter().position(|&e| e == event).unwrap()
        };
        let disabled = position(("en", true));
        let enabled = position(("en", false));
        let selected = [position(("sel0", false)), position(("sel1", true))];
        assert!(selected.iter().all(|&i| disabled < i && i < enabled));
        assert!(enabled < position(("row", true)));
    }
}
