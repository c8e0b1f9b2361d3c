use crate::mass::alternatives;

/// How the multi-radix counter over ambiguous positions advances.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CarryMode {
    /// True mixed-radix carry: every combination is produced exactly once
    /// (full Cartesian product over the ambiguous positions).
    #[default]
    Full,
    /// Historical behavior: once a digit overflows it is permanently
    /// retired, so positions are only varied one group at a time and the
    /// full product is not enumerated. Kept for compatibility with results
    /// produced by older pipelines.
    LegacyPartial,
}

/// Lazily enumerates every concrete sequence consistent with a sequence
/// containing ambiguity codes (X, B, J, Z), without materializing the
/// Cartesian product upfront.
///
/// The first yielded sequence resolves every ambiguous position to its
/// first alternative. A sequence with more X residues than `max_x` yields
/// nothing. The iterator is not restartable.
pub struct AmbiguousSequenceIterator {
    sequence: Vec<u8>,
    positions: Vec<(usize, &'static [u8])>,
    iteration_indices: Vec<isize>,
    secondary_index: usize,
    mode: CarryMode,
    exhausted: bool,
    yielded_plain: bool,
}

impl AmbiguousSequenceIterator {
    pub fn new(sequence: &str, max_x: usize) -> Self {
        Self::with_mode(sequence, max_x, CarryMode::default())
    }

    pub fn with_mode(sequence: &str, max_x: usize, mode: CarryMode) -> Self {
        let sequence = sequence.as_bytes().to_vec();
        let n_x = sequence.iter().filter(|&&aa| aa == b'X').count();
        let mut positions = Vec::new();
        if n_x <= max_x {
            for (i, &aa) in sequence.iter().enumerate() {
                if let Some(alts) = alternatives(aa) {
                    positions.push((i, alts));
                }
            }
        }
        let mut iteration_indices = vec![0isize; positions.len()];
        if let Some(first) = iteration_indices.first_mut() {
            // one step before the all-first-alternative state
            *first = -1;
        }
        AmbiguousSequenceIterator {
            sequence,
            positions,
            iteration_indices,
            secondary_index: 0,
            mode,
            exhausted: n_x > max_x,
            yielded_plain: false,
        }
    }

    fn advance_full(&mut self) -> bool {
        for (digit, (_, alts)) in self.iteration_indices.iter_mut().zip(&self.positions) {
            *digit += 1;
            if (*digit as usize) < alts.len() {
                return true;
            }
            *digit = 0;
        }
        false
    }

    fn advance_legacy(&mut self) -> bool {
        loop {
            if self.secondary_index == self.iteration_indices.len() {
                return false;
            }
            let n_alts = self.positions[self.secondary_index].1.len();
            let next = self.iteration_indices[self.secondary_index] + 1;
            if next as usize == n_alts {
                self.iteration_indices[self.secondary_index] = 0;
                self.secondary_index += 1;
                continue;
            }
            self.iteration_indices[self.secondary_index] = next;
            return true;
        }
    }
}

impl Iterator for AmbiguousSequenceIterator {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if self.positions.is_empty() {
            if self.yielded_plain {
                return None;
            }
            self.yielded_plain = true;
            return Some(self.sequence.clone());
        }
        let advanced = match self.mode {
            CarryMode::Full => self.advance_full(),
            CarryMode::LegacyPartial => self.advance_legacy(),
        };
        if !advanced {
            self.exhausted = true;
            return None;
        }
        let mut resolved = self.sequence.clone();
        for ((pos, alts), &digit) in self.positions.iter().zip(&self.iteration_indices) {
            resolved[*pos] = alts[digit as usize];
        }
        Some(resolved)
    }
}
