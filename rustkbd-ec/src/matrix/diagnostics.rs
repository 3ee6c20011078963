use core::fmt::{self, Write};

use heapless::String;

use crate::log::info;

use super::{EcMatrix, KeyState, RawSampler};

/// Writes a `# title #` banner and then one comma separated line per row.
pub fn write_table<W: Write>(
    w: &mut W,
    title: &str,
    rows: usize,
    cols: usize,
    value: impl Fn(usize, usize) -> u16,
) -> fmt::Result {
    let rule = title.len() + 4;
    w.write_char('\n')?;
    for _ in 0..rule {
        w.write_char('#')?;
    }
    write!(w, "\n# {} #\n", title)?;
    for _ in 0..rule {
        w.write_char('#')?;
    }
    w.write_char('\n')?;
    for row in 0..rows {
        for col in 0..cols {
            let separator = if col + 1 == cols { '\n' } else { ',' };
            write!(w, "{:4}{}", value(row, col), separator)?;
        }
    }
    Ok(())
}

/// Sends whatever is written to it to the log, one line at a time.
pub struct LogWriter {
    line: String<160>,
}

impl LogWriter {
    pub const fn new() -> Self {
        LogWriter {
            line: String::new(),
        }
    }

    pub fn flush(&mut self) {
        if !self.line.is_empty() {
            info!("{}", self.line.as_str());
            self.line.clear();
        }
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for LogWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if c == '\n' {
                self.flush();
            } else if self.line.push(c).is_err() {
                // 長すぎる行は折り返す
                self.flush();
                self.line.push(c).ok();
            }
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

impl<R: RawSampler, const ROWS: usize, const COLS: usize> EcMatrix<R, ROWS, COLS> {
    /// Raw samples of the last scan.
    pub fn print_matrix<W: Write>(&self, w: &mut W) -> fmt::Result {
        write_table(w, "Raw Values", ROWS, COLS, |row, col| self.sw_value[row][col])
    }

    pub fn show_calibration_data<W: Write>(&self, w: &mut W) -> fmt::Result {
        let tables: [(&str, fn(&KeyState) -> u16); 8] = [
            ("Noise Floor", |key| key.noise_floor),
            ("Bottoming Readings", |key| key.bottoming_calibration_reading),
            ("Extrema", |key| key.extremum),
            ("Rescaled APC Actuation Points", |key| {
                key.rescaled.apc_actuation_threshold
            }),
            ("Rescaled APC Release Points", |key| {
                key.rescaled.apc_release_threshold
            }),
            ("Rescaled RT Initial Deadzone Offsets", |key| {
                key.rescaled.rt_initial_deadzone_offset
            }),
            ("Rescaled RT Actuation Offsets", |key| {
                key.rescaled.rt_actuation_offset
            }),
            ("Rescaled RT Release Offsets", |key| {
                key.rescaled.rt_release_offset
            }),
        ];
        for (title, field) in tables {
            write_table(w, title, ROWS, COLS, |row, col| {
                field(&self.runtime.keys[row][col])
            })?;
        }
        Ok(())
    }
}
