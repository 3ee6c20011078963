//! Constants and board level settings for the EC matrix.

use defmt::Format;

/// Full scale of a raw sample. Boards with a wider ADC shift their readings down to this range.
pub const MAX_RAW: u16 = 1023;

/// Extremum a key starts from, and returns to when its actuation mode changes.
pub const DEFAULT_EXTREMUM: u16 = MAX_RAW;

/// Bottoming reading of a key that was never calibrated.
pub const DEFAULT_BOTTOMING_READING: u16 = MAX_RAW;

/// Bottoming reading of a key not yet seen pressed in the running calibration session.
pub const UNSET_BOTTOMING_READING: u16 = 0;

/// Tunables of the sampling and calibration procedures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
pub struct EcConfig {
    /// Noise floor assumed before the first calibration.
    pub expected_noise_floor: u16,
    /// A sample this far below the noise floor becomes the new noise floor.
    pub noise_floor_threshold: u16,
    /// A key counts as pressed during bottoming calibration only this far above its noise floor.
    pub bottoming_calibration_threshold: u16,
    pub noise_floor_sampling_count: u16,
    pub noise_floor_sampling_delay_ms: u32,
    pub charge_time_us: u32,
    pub discharge_time_us: u32,
}

impl EcConfig {
    pub const DEFAULT: EcConfig = EcConfig {
        expected_noise_floor: 0,
        noise_floor_threshold: 50,
        bottoming_calibration_threshold: 100,
        noise_floor_sampling_count: 30,
        noise_floor_sampling_delay_ms: 5,
        charge_time_us: 5,
        discharge_time_us: 10,
    };
}

impl Default for EcConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One analog multiplexer: `channels[i]` is the mux input wired to the i-th column it serves.
#[derive(Clone, Copy, Debug)]
pub struct Amux {
    pub channels: &'static [u8],
}

/// Multiplexer bank layout. Columns are numbered across multiplexers in order,
/// so a multiplexer's first column is the sum of the channel counts before it.
///
/// `COLS` is the matrix width, so a layout can only be handed to a matrix of the same width.
#[derive(Clone, Copy, Debug)]
pub struct Topology<const COLS: usize> {
    amuxes: &'static [Amux],
}

impl<const COLS: usize> Topology<COLS> {
    /// Validates the layout against the number of select lines and matrix columns.
    ///
    /// Meant to be evaluated in a `const` item so that a bad layout fails the build.
    pub const fn new(amuxes: &'static [Amux], sel_pins: usize) -> Topology<COLS> {
        assert!(!amuxes.is_empty(), "at least one multiplexer is required");
        let mut total = 0;
        let mut widest = 0;
        let mut i = 0;
        while i < amuxes.len() {
            let channels = amuxes[i].channels;
            let mut j = 0;
            while j < channels.len() {
                assert!(
                    (channels[j] as usize) < (1 << sel_pins),
                    "multiplexer channel is not addressable with the select pins"
                );
                j += 1;
            }
            if channels.len() > widest {
                widest = channels.len();
            }
            total += channels.len();
            i += 1;
        }
        assert!(
            sel_pins >= ceil_log2(widest),
            "not enough select pins to address every multiplexer channel"
        );
        assert!(
            total == COLS,
            "multiplexer channel counts do not add up to the matrix columns"
        );
        Topology { amuxes }
    }

    pub fn amuxes(&self) -> &'static [Amux] {
        self.amuxes
    }

    pub const fn columns(&self) -> usize {
        COLS
    }

    /// Matrix column of the first channel of `amux`.
    pub fn column_offset(&self, amux: usize) -> usize {
        self.amuxes[..amux].iter().map(|a| a.channels.len()).sum()
    }
}

const fn ceil_log2(n: usize) -> usize {
    let mut bits = 0;
    while (1usize << bits) < n {
        bits += 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPLIT: [Amux; 2] = [
        Amux {
            channels: &[4, 6, 7, 5, 2],
        },
        Amux {
            channels: &[0, 1, 2],
        },
    ];

    #[test]
    fn column_offsets_follow_channel_counts() {
        const TOPOLOGY: Topology<8> = Topology::new(&SPLIT, 3);
        assert_eq!(TOPOLOGY.column_offset(0), 0);
        assert_eq!(TOPOLOGY.column_offset(1), 5);
        assert_eq!(TOPOLOGY.columns(), 8);
    }

    #[test]
    fn select_pins_cover_widest_multiplexer() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(16), 4);
    }

    #[test]
    #[should_panic(expected = "do not add up")]
    fn mismatched_column_count_is_rejected() {
        Topology::<9>::new(&SPLIT, 3);
    }

    #[test]
    #[should_panic(expected = "not addressable")]
    fn missing_select_pin_is_rejected() {
        Topology::<8>::new(&SPLIT, 2);
    }
}
