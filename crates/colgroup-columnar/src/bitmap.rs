use std::sync::Arc;

/// A compact bit vector used for boolean columns and row masks.
///
/// Bits are stored little-endian within each `u64` word: bit 0 is the LSB of word 0. Bits past
/// `len` in the last word are always zero, which keeps `count_ones` and word-wise operations
/// exact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

fn word_count(bits: usize) -> usize {
    (bits + 63) / 64
}

fn tail_mask(len: usize) -> u64 {
    match len % 64 {
        0 => u64::MAX,
        rem => (1u64 << rem) - 1,
    }
}

impl BitVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(word_count(bits)),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_len_all_true(bits: usize) -> Self {
        let mut words = vec![u64::MAX; word_count(bits)];
        if let Some(last) = words.last_mut() {
            *last &= tail_mask(bits);
        }
        Self {
            words,
            len: bits,
            ones: bits,
        }
    }

    pub fn with_len_all_false(bits: usize) -> Self {
        Self {
            words: vec![0; word_count(bits)],
            len: bits,
            ones: 0,
        }
    }

    pub fn from_bools<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let iter = bits.into_iter();
        let mut out = Self::with_capacity_bits(iter.size_hint().0);
        for bit in iter {
            out.push(bit);
        }
        out
    }

    /// Rebuild a bit vector from persisted words. Bits beyond `len` are cleared.
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Self {
        words.resize(word_count(len), 0);
        if let Some(last) = words.last_mut() {
            *last &= tail_mask(len);
        }
        let ones = words.iter().map(|w| w.count_ones() as usize).sum();
        Self { words, len, ones }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let bit = self.len % 64;
        if bit == 0 {
            self.words.push(0);
        }
        if value {
            self.words[self.len / 64] |= 1u64 << bit;
            self.ones += 1;
        }
        self.len += 1;
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = *word & mask != 0;
        if was_set && !value {
            *word &= !mask;
            self.ones -= 1;
        } else if !was_set && value {
            *word |= mask;
            self.ones += 1;
        }
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    /// Intersect with `other` in place. Both vectors must have the same length.
    pub fn and_inplace(&mut self, other: &BitVec) {
        debug_assert_eq!(self.len, other.len, "BitVec length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    pub fn or_inplace(&mut self, other: &BitVec) {
        debug_assert_eq!(self.len, other.len, "BitVec length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    pub fn not_inplace(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
        if let Some(last) = self.words.last_mut() {
            *last &= tail_mask(self.len);
        }
        self.ones = self.len - self.ones;
    }

    /// Append all bits of `other`.
    pub fn extend_from(&mut self, other: &BitVec) {
        if self.len % 64 == 0 {
            // Word aligned: copy words wholesale.
            self.words.truncate(word_count(self.len));
            self.words.extend_from_slice(&other.words);
            self.len += other.len;
            self.ones += other.ones;
            return;
        }
        for idx in 0..other.len {
            self.push(other.get(idx));
        }
    }

    /// Copy out bits `start..end` (clamped to `len`).
    pub fn slice(&self, start: usize, end: usize) -> BitVec {
        let end = end.min(self.len);
        let start = start.min(end);
        let mut out = BitVec::with_capacity_bits(end - start);
        for idx in start..end {
            out.push(self.get(idx));
        }
        out
    }

    /// Index of the first set bit at or after `from`.
    pub fn next_one(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word_idx = from / 64;
        let mut word = self.words[word_idx] & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                return Some(word_idx * 64 + word.trailing_zeros() as usize);
            }
            word_idx += 1;
            word = *self.words.get(word_idx)?;
        }
    }

    /// Iterate over the indices of set bits in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let row = self.next_one(next)?;
            next = row + 1;
            Some(row)
        })
    }
}

/// Owning cursor over the set bits of a shared mask, with `skip`/`limit` applied.
#[derive(Clone, Debug)]
pub struct MaskRows {
    mask: Arc<BitVec>,
    next: usize,
    skip: usize,
    remaining: usize,
}

impl MaskRows {
    pub fn new(mask: Arc<BitVec>, limit: Option<usize>, skip: usize) -> Self {
        Self {
            mask,
            next: 0,
            skip,
            remaining: limit.unwrap_or(usize::MAX),
        }
    }
}

impl Iterator for MaskRows {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.remaining > 0 {
            let row = self.mask.next_one(self.next)?;
            self.next = row + 1;
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            self.remaining -= 1;
            return Some(row);
        }
        None
    }
}

impl FromIterator<bool> for BitVec {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self::from_bools(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_keeps_tail_bits_clear() {
        let mut bits = BitVec::with_len_all_false(70);
        bits.not_inplace();
        assert_eq!(bits.count_ones(), 70);
        assert!(bits.all_true());
        assert_eq!(bits.as_words()[1], (1u64 << 6) - 1);
    }

    #[test]
    fn extend_unaligned_and_iter_ones() {
        let mut a = BitVec::from_bools([true, false, true]);
        let b = BitVec::from_bools([false, true]);
        a.extend_from(&b);
        assert_eq!(a.len(), 5);
        assert_eq!(a.iter_ones().collect::<Vec<_>>(), vec![0, 2, 4]);

        let mut aligned = BitVec::with_len_all_true(64);
        aligned.extend_from(&b);
        assert_eq!(aligned.count_ones(), 65);
        assert_eq!(aligned.iter_ones().last(), Some(65));
    }

    #[test]
    fn from_words_masks_garbage() {
        let bits = BitVec::from_words(vec![u64::MAX], 3);
        assert_eq!(bits.count_ones(), 3);
        assert_eq!(bits.slice(1, 10), BitVec::from_bools([true, true]));
    }

    #[test]
    fn mask_rows_skip_and_limit() {
        let mask = Arc::new(BitVec::from_bools((0..200).map(|i| i % 50 == 0)));
        assert_eq!(mask.next_one(1), Some(50));
        assert_eq!(mask.next_one(151), None);
        let rows: Vec<usize> = MaskRows::new(mask.clone(), Some(2), 1).collect();
        assert_eq!(rows, vec![50, 100]);
        assert_eq!(MaskRows::new(mask, None, 0).count(), 4);
    }
}
