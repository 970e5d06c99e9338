//! Fixed-size bit set
use core::fmt;

const WORD_LEN: usize = usize::BITS as usize;

/// A set of integers in `0..WORDS * usize::BITS`, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedBitSet<const WORDS: usize> {
    words: [usize; WORDS],
}

impl<const WORDS: usize> FixedBitSet<WORDS> {
    pub const EMPTY: Self = Self { words: [0; WORDS] };

    /// The number of representable elements.
    pub const LEN: usize = WORDS * WORD_LEN;

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        debug_assert!(i < Self::LEN);
        self.words[i / WORD_LEN] & (1 << (i % WORD_LEN)) != 0
    }

    /// Add `i` to the set. Returns `true` if it wasn't present before.
    #[inline]
    pub fn insert(&mut self, i: usize) -> bool {
        debug_assert!(i < Self::LEN);
        let word = &mut self.words[i / WORD_LEN];
        let mask = 1 << (i % WORD_LEN);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    #[inline]
    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < Self::LEN);
        self.words[i / WORD_LEN] &= !(1 << (i % WORD_LEN));
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate over the elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_i, &word)| {
                let mut rest = word;
                core::iter::from_fn(move || {
                    if rest == 0 {
                        None
                    } else {
                        let bit = rest.trailing_zeros() as usize;
                        rest &= rest - 1;
                        Some(bit)
                    }
                })
                .map(move |bit| word_i * WORD_LEN + bit)
            })
    }
}

impl<const WORDS: usize> Default for FixedBitSet<WORDS> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const WORDS: usize> fmt::Debug for FixedBitSet<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
