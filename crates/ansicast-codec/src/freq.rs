/// Byte occurrence counts, the input to Huffman construction.
#[derive(Clone, Debug)]
pub struct FrequencyTable {
    counts: [u32; 256],
    total: u64,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self {
            counts: [0; 256],
            total: 0,
        }
    }

    /// Forget all counts.
    pub fn reset(&mut self) {
        self.counts = [0; 256];
        self.total = 0;
    }

    /// Count one occurrence of `byte`.
    pub fn observe(&mut self, byte: u8) {
        self.counts[byte as usize] = self.counts[byte as usize].saturating_add(1);
        self.total += 1;
    }

    /// Count every byte in `data`.
    pub fn observe_all(&mut self, data: &[u8]) {
        for &byte in data {
            self.observe(byte);
        }
    }

    pub fn count(&self, byte: u8) -> u32 {
        self.counts[byte as usize]
    }

    /// Counts indexed by byte value.
    pub fn counts(&self) -> &[u32; 256] {
        &self.counts
    }

    /// Total number of observations.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct bytes seen.
    pub fn distinct(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// Observed `(symbol, count)` pairs in ascending symbol order.
    pub fn symbols(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(symbol, &count)| (symbol as u8, count))
    }
}

impl Default for FrequencyTable {
    fn default() -> Self {
        Self::new()
    }
}
