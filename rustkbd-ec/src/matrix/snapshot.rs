use heapless::Vec;

use super::KeySwitchIdentifier;

/// Pressed state of one row, bit `c` for column `c`.
pub type MatrixRow = u32;

/// Pressed state of every key after a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct MatrixSnapshot<const ROWS: usize> {
    rows: [MatrixRow; ROWS],
}

impl<const ROWS: usize> MatrixSnapshot<ROWS> {
    pub const fn new() -> Self {
        MatrixSnapshot { rows: [0; ROWS] }
    }

    pub fn rows(&self) -> &[MatrixRow; ROWS] {
        &self.rows
    }

    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.rows[row] & (1 << col) != 0
    }

    pub fn set(&mut self, row: usize, col: usize, pressed: bool) {
        if pressed {
            self.rows[row] |= 1 << col;
        } else {
            self.rows[row] &= !(1 << col);
        }
    }

    /// Pressed keys in row-major order. Keys beyond `N` are dropped.
    pub fn pressed_keys<const N: usize>(&self) -> Vec<KeySwitchIdentifier, N> {
        let mut keys = Vec::new();
        for (row, bits) in self.rows.iter().enumerate() {
            for col in 0..MatrixRow::BITS as usize {
                if bits & (1 << col) != 0 {
                    keys.push(KeySwitchIdentifier::new(row as u8, col as u8)).ok();
                }
            }
        }
        keys
    }
}

impl<const ROWS: usize> Default for MatrixSnapshot<ROWS> {
    fn default() -> Self {
        Self::new()
    }
}
