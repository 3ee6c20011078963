//! Scripted stand-in for the hardware in unit tests.

use std::collections::VecDeque;

use crate::config::{Amux, Topology};

use super::RawSampler;

pub(crate) struct ScriptedSampler {
    amuxes: &'static [Amux],
    column_offsets: Vec<usize>,
    /// Returned whenever a position has nothing queued.
    resting: Vec<Vec<u16>>,
    queued: Vec<Vec<VecDeque<u16>>>,
    pub reads: Vec<(usize, usize)>,
    pub disabled_amuxes: Vec<usize>,
    pub delays: Vec<u32>,
}

impl ScriptedSampler {
    pub fn new<const COLS: usize>(topology: Topology<COLS>, rows: usize, resting: u16) -> Self {
        let cols = topology.columns();
        ScriptedSampler {
            amuxes: topology.amuxes(),
            column_offsets: (0..topology.amuxes().len())
                .map(|amux| topology.column_offset(amux))
                .collect(),
            resting: vec![vec![resting; cols]; rows],
            queued: vec![vec![VecDeque::new(); cols]; rows],
            reads: Vec::new(),
            disabled_amuxes: Vec::new(),
            delays: Vec::new(),
        }
    }

    pub fn set_resting(&mut self, row: usize, col: usize, value: u16) {
        self.resting[row][col] = value;
    }

    /// Queues samples returned one per read before falling back to the resting value.
    pub fn queue(&mut self, row: usize, col: usize, samples: &[u16]) {
        self.queued[row][col].extend(samples.iter().copied());
    }

    pub fn read_count(&self, row: usize, col: usize) -> usize {
        self.reads.iter().filter(|&&read| read == (row, col)).count()
    }
}

impl RawSampler for ScriptedSampler {
    fn disable_unused_amux(&mut self, amux: usize) {
        self.disabled_amuxes.push(amux);
    }

    fn disable_unused_row(&mut self, _row: usize) {}

    fn read_raw(&mut self, amux: usize, channel: u8, row: usize) -> u16 {
        let local = self.amuxes[amux]
            .channels
            .iter()
            .position(|&c| c == channel)
            .expect("channel not wired");
        let col = self.column_offsets[amux] + local;
        self.reads.push((row, col));
        self.queued[row][col]
            .pop_front()
            .unwrap_or(self.resting[row][col])
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }
}
