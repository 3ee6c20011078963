use defmt::Format;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Format)]
pub struct KeySwitchIdentifier {
    pub row: u8,
    pub col: u8,
}

impl KeySwitchIdentifier {
    pub fn new(row: u8, col: u8) -> Self {
        KeySwitchIdentifier { row, col }
    }
}
