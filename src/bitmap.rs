//! Plain uncompressed bitmap, the common ingestion path into the
//! compressed form.
//!
//! [`Bitmap`] is a growable word array with random-access `set`, `clear`
//! and `get`. Unlike [`EwahBitmap`](crate::EwahBitmap) it has no
//! monotonicity restriction, so callers typically fill a `Bitmap` in
//! arbitrary order and compress it once with
//! [`to_ewah`](Bitmap::to_ewah).
//!
//! ## Examples
//!
//! ```rust
//! use ewah::Bitmap;
//!
//! let mut bitmap = Bitmap::new();
//! bitmap.set(500);
//! bitmap.set(3);
//! bitmap.clear(500);
//!
//! assert!(bitmap.get(3));
//! assert!(!bitmap.get(500));
//!
//! let compressed = bitmap.to_ewah();
//! assert_eq!(compressed.ones().collect::<Vec<_>>(), vec![3]);
//! ```

use mem_dbg::*;
use serde::{Deserialize, Serialize};

use crate::utils::BITS_IN_WORD;
use crate::EwahBitmap;

/// An uncompressed bitmap backed by a growable word array.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, MemSize, MemDbg)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    /// Creates a new empty bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::Bitmap;
    ///
    /// let bitmap = Bitmap::new();
    /// assert_eq!(bitmap.count_ones(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bitmap with room for at least `n_bits` bits
    /// before growing.
    #[must_use]
    pub fn with_capacity(n_bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(n_bits.div_ceil(BITS_IN_WORD)),
        }
    }

    // Doubles the word array (with a floor of 32 words) until `block` is
    // addressable. New words are zero.
    fn grow(&mut self, block: usize) {
        if block >= self.words.len() {
            let size = (block + 1).next_power_of_two().max(32);
            self.words.resize(size, 0);
        }
    }

    /// Sets the bit at position `pos`, growing the bitmap on demand.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::Bitmap;
    ///
    /// let mut bitmap = Bitmap::new();
    /// bitmap.set(1000);
    /// bitmap.set(4);
    /// assert!(bitmap.get(4));
    /// assert_eq!(bitmap.count_ones(), 2);
    /// ```
    pub fn set(&mut self, pos: usize) {
        let block = pos / BITS_IN_WORD;
        self.grow(block);
        self.words[block] |= 1u64 << (pos % BITS_IN_WORD);
    }

    /// Clears the bit at position `pos`, growing the bitmap on demand.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::Bitmap;
    ///
    /// let mut bitmap = Bitmap::new();
    /// bitmap.set(4);
    /// bitmap.clear(4);
    /// assert!(!bitmap.get(4));
    /// ```
    pub fn clear(&mut self, pos: usize) {
        let block = pos / BITS_IN_WORD;
        self.grow(block);
        self.words[block] &= !(1u64 << (pos % BITS_IN_WORD));
    }

    /// Returns the bit at position `pos`; positions beyond the allocated
    /// words read as `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::Bitmap;
    ///
    /// let mut bitmap = Bitmap::new();
    /// bitmap.set(4);
    /// assert!(bitmap.get(4));
    /// assert!(!bitmap.get(5));
    /// assert!(!bitmap.get(1 << 40));
    /// ```
    #[must_use]
    pub fn get(&self, pos: usize) -> bool {
        let block = pos / BITS_IN_WORD;
        match self.words.get(block) {
            Some(word) => (word >> (pos % BITS_IN_WORD)) & 1 != 0,
            None => false,
        }
    }

    /// Counts the set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the number of allocated 64-bit words.
    #[must_use]
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Compresses the bitmap, collapsing maximal runs of all-zero and
    /// all-one words and storing everything else as literals.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::Bitmap;
    ///
    /// let mut bitmap = Bitmap::new();
    /// for i in 0..128 {
    ///     bitmap.set(i);
    /// }
    /// bitmap.set(100_000);
    ///
    /// let compressed = bitmap.to_ewah();
    /// assert_eq!(compressed.count_ones(), 129);
    /// assert!(compressed.compressed_len() < bitmap.num_words());
    /// ```
    #[must_use]
    pub fn to_ewah(&self) -> EwahBitmap {
        let mut ewah = EwahBitmap::new();
        let mut i = 0;

        while i < self.words.len() {
            let word = self.words[i];
            if word == 0 || word == u64::MAX {
                let mut j = i + 1;
                while j < self.words.len() && self.words[j] == word {
                    j += 1;
                }
                ewah.add_empty_words(word == u64::MAX, j - i);
                i = j;
            } else {
                let mut j = i + 1;
                while j < self.words.len() && self.words[j] != 0 && self.words[j] != u64::MAX {
                    j += 1;
                }
                ewah.add_dirty_words(&self.words[i..j], false);
                i = j;
            }
        }
        ewah
    }

    /// Decompresses an [`EwahBitmap`] into a plain word array using its
    /// word iterator.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::{Bitmap, EwahBitmap};
    ///
    /// let compressed: EwahBitmap = [5usize, 1000].into_iter().collect();
    /// let bitmap = Bitmap::from_ewah(&compressed);
    /// assert!(bitmap.get(5));
    /// assert!(bitmap.get(1000));
    /// assert!(!bitmap.get(999));
    /// ```
    #[must_use]
    pub fn from_ewah(ewah: &EwahBitmap) -> Self {
        Self {
            words: ewah.words().collect(),
        }
    }
}

impl From<&Bitmap> for EwahBitmap {
    fn from(bitmap: &Bitmap) -> Self {
        bitmap.to_ewah()
    }
}

impl From<&EwahBitmap> for Bitmap {
    fn from(ewah: &EwahBitmap) -> Self {
        Bitmap::from_ewah(ewah)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen_sequences::{gen_clustered_positions, gen_strictly_increasing_sequence};

    // ============ BASIC FUNCTIONALITY TESTS ============

    #[test]
    fn test_set_get_clear() {
        let mut bitmap = Bitmap::new();
        assert!(!bitmap.get(0));

        bitmap.set(0);
        bitmap.set(127);
        assert!(bitmap.get(0));
        assert!(bitmap.get(127));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.count_ones(), 2);

        bitmap.clear(127);
        assert!(!bitmap.get(127));
        assert_eq!(bitmap.count_ones(), 1);

        // clearing an unset bit is a no-op
        bitmap.clear(10_000);
        assert_eq!(bitmap.count_ones(), 1);
    }

    #[test]
    fn test_get_beyond_allocation_is_false() {
        let bitmap = Bitmap::new();
        assert!(!bitmap.get(1 << 30));
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut bitmap = Bitmap::new();
        bitmap.set(0);
        assert_eq!(bitmap.num_words(), 32);

        bitmap.set(64 * 100);
        assert_eq!(bitmap.num_words(), 128);
        assert!(bitmap.get(64 * 100));
        assert!(bitmap.get(0));
    }

    // ============ CONVERSION TESTS ============

    #[test]
    fn test_roundtrip_scattered() {
        let positions = [0, 1, 63, 64, 4095, 4096];
        let mut bitmap = Bitmap::new();
        for &p in &positions {
            bitmap.set(p);
        }

        let ewah = bitmap.to_ewah();
        assert_eq!(ewah.count_ones(), positions.len());
        assert_eq!(ewah.ones().collect::<Vec<_>>(), positions);

        let back = Bitmap::from_ewah(&ewah);
        assert_eq!(back, bitmap);
    }

    #[test]
    fn test_roundtrip_random() {
        for positions in [
            gen_strictly_increasing_sequence(1500, 1 << 17),
            gen_clustered_positions(30, 400, 6000),
        ] {
            let mut bitmap = Bitmap::new();
            for &p in &positions {
                bitmap.set(p);
            }

            let back = Bitmap::from_ewah(&bitmap.to_ewah());
            assert_eq!(back, bitmap);
        }
    }

    #[test]
    fn test_to_ewah_compresses_runs() {
        let mut bitmap = Bitmap::new();
        for i in 0..(64 * 900) {
            bitmap.set(i);
        }

        let ewah = bitmap.to_ewah();
        // 900 words of ones, 124 of zeros: two markers suffice
        assert_eq!(ewah.compressed_len(), 2);
        assert_eq!(ewah.count_ones(), 64 * 900);
        assert_eq!(ewah.len(), bitmap.num_words() * 64);
    }

    #[test]
    fn test_to_ewah_mixed_blocks() {
        let mut bitmap = Bitmap::new();
        bitmap.set(1); // dirty word 0
        for i in 64..192 {
            bitmap.set(i); // clean ones, words 1..=2
        }
        bitmap.set(200); // dirty word 3

        let ewah = bitmap.to_ewah();
        assert_eq!(ewah.ones().collect::<Vec<_>>(), bitmap_positions(&bitmap));
        assert_eq!(Bitmap::from_ewah(&ewah), bitmap);
    }

    #[test]
    fn test_empty_bitmap_roundtrip() {
        let bitmap = Bitmap::new();
        let ewah = bitmap.to_ewah();
        assert!(ewah.is_empty());
        assert_eq!(Bitmap::from_ewah(&ewah).num_words(), 0);
    }

    #[test]
    fn test_from_impls() {
        let mut bitmap = Bitmap::new();
        bitmap.set(77);

        let ewah: EwahBitmap = (&bitmap).into();
        let back: Bitmap = (&ewah).into();
        assert_eq!(back, bitmap);
    }

    fn bitmap_positions(bitmap: &Bitmap) -> Vec<usize> {
        (0..bitmap.num_words() * 64)
            .filter(|&p| bitmap.get(p))
            .collect()
    }
}
