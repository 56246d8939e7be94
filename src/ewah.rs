//! # EWAH compressed bitmap
//!
//! This module provides [`EwahBitmap`], a bit string of arbitrary length
//! stored in the Enhanced Word-Aligned Hybrid encoding. The buffer is a
//! sequence of blocks, each headed by a marker word describing a run of
//! clean words (all zeros or all ones, stored only as a count) followed
//! by literal words stored verbatim.
//!
//! ## Features
//!
//! - Streaming, append-only construction: [`EwahBitmap::set`] with
//!   non-decreasing positions, plus bulk appends of clean runs and
//!   literal words.
//! - Iteration without decompression: [`EwahBitmap::ones`] yields set-bit
//!   positions, [`EwahBitmap::words`] yields the uncompressed 64-bit
//!   words.
//! - Logical combination directly on the compressed form: [`or`],
//!   [`and`], [`xor`] and [`and_not`] merge two run-length encoded
//!   streams into a third without expanding either input.
//! - A fixed big-endian wire format via [`serialize_into`] and
//!   [`deserialize_from`].
//!
//! [`or`]: EwahBitmap::or
//! [`and`]: EwahBitmap::and
//! [`xor`]: EwahBitmap::xor
//! [`and_not`]: EwahBitmap::and_not
//! [`serialize_into`]: EwahBitmap::serialize_into
//! [`deserialize_from`]: EwahBitmap::deserialize_from
//!
//! ## Examples
//!
//! ```rust
//! use ewah::EwahBitmap;
//!
//! let mut bitmap = EwahBitmap::new();
//! bitmap.set(3);
//! bitmap.set(1000);
//!
//! assert_eq!(bitmap.count_ones(), 2);
//! assert_eq!(bitmap.ones().collect::<Vec<_>>(), vec![3, 1000]);
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::ops::{BitAnd, BitOr, BitXor, Sub};

use anyhow::{anyhow, Result};
use mem_dbg::*;
use serde::{Deserialize, Serialize};

use crate::utils::{tail_mask, BITS_IN_WORD};

mod rlw;

/// A compressed bitmap in the Enhanced Word-Aligned Hybrid encoding.
///
/// The bitmap is built incrementally and can only grow: bits are set in
/// monotonically non-decreasing positions and a set bit cannot be cleared
/// afterwards (except by [`clear`](EwahBitmap::clear), which resets the
/// whole bitmap). Iterators borrow the bitmap, so it cannot be mutated or
/// dropped while an iteration is in progress.
#[derive(Clone, Serialize, Deserialize, Eq, PartialEq, MemSize, MemDbg)]
pub struct EwahBitmap {
    /// Compressed words: markers interleaved with their literal words.
    buffer: Vec<u64>,
    /// Logical length of the bit string.
    bit_size: usize,
    /// Index of the active marker in `buffer`. An index, not a pointer:
    /// the buffer may reallocate on growth.
    rlw: usize,
}

impl Default for EwahBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl EwahBitmap {
    /// Creates a new empty compressed bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let bitmap = EwahBitmap::new();
    /// assert!(bitmap.is_empty());
    /// assert_eq!(bitmap.len(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(32)
    }

    /// Creates a new empty compressed bitmap with room for at least
    /// `words` buffer words before reallocating.
    #[must_use]
    pub fn with_capacity(words: usize) -> Self {
        let mut buffer = Vec::with_capacity(words.max(32));
        buffer.push(0);
        Self {
            buffer,
            bit_size: 0,
            rlw: 0,
        }
    }

    /// Resets the bitmap to empty. Does not release the buffer memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.set(100);
    /// bitmap.clear();
    /// assert!(bitmap.is_empty());
    /// assert_eq!(bitmap.count_ones(), 0);
    /// ```
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.buffer.push(0);
        self.bit_size = 0;
        self.rlw = 0;
    }

    /// Returns the number of bits in the bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.set(76);
    /// assert_eq!(bitmap.len(), 77);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.bit_size
    }

    /// Checks if the bitmap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bit_size == 0
    }

    /// Returns the number of 64-bit words in the compressed buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.add_empty_words(false, 1_000_000);
    /// bitmap.set(64_000_001);
    ///
    /// // a million clean words collapse into a single marker
    /// assert_eq!(bitmap.count_ones(), 1);
    /// assert!(bitmap.compressed_len() <= 4);
    /// ```
    #[must_use]
    pub fn compressed_len(&self) -> usize {
        self.buffer.len()
    }

    // ---- word buffer layer ----

    #[inline]
    fn buffer_push(&mut self, word: u64) {
        self.buffer.push(word);
    }

    // Pushes a fresh marker and makes it the active one.
    #[inline]
    fn buffer_push_rlw(&mut self, word: u64) {
        self.buffer.push(word);
        self.rlw = self.buffer.len() - 1;
    }

    // ---- builder ----

    /// Sets the bit at position `i`.
    ///
    /// Because of the streaming compression, bits can only be set at
    /// monotonically non-decreasing positions, and a set bit cannot be
    /// cleared later. Setting the most recently set position again is
    /// allowed and has no effect.
    ///
    /// # Panics
    ///
    /// Panics if `i + 1` is smaller than the current bit length.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.set(1);
    /// bitmap.set(76);
    /// bitmap.set(77);
    /// bitmap.set(8_712_800_127);
    ///
    /// assert_eq!(bitmap.count_ones(), 4);
    /// assert_eq!(bitmap.len(), 8_712_800_128);
    /// ```
    pub fn set(&mut self, i: usize) {
        assert!(
            i + 1 >= self.bit_size,
            "bit {} was already finalized (bitmap holds {} bits); \
             positions must be set in non-decreasing order",
            i,
            self.bit_size
        );

        let dist = (i + 1).div_ceil(BITS_IN_WORD) - self.bit_size.div_ceil(BITS_IN_WORD);
        self.bit_size = i + 1;

        if dist > 0 {
            // the new bit lands past the current tail word
            if dist > 1 {
                self.extend_empty_words(false, (dist - 1) as u64);
            }
            self.push_literal(1u64 << (i % BITS_IN_WORD));
            return;
        }

        if rlw::literal_words(self.buffer[self.rlw]) == 0 {
            if rlw::run_bit(self.buffer[self.rlw]) {
                // already set inside a run of ones
                return;
            }
            let len = rlw::running_len(self.buffer[self.rlw]);
            rlw::set_running_len(&mut self.buffer[self.rlw], len - 1);
            self.push_literal(1u64 << (i % BITS_IN_WORD));
            return;
        }

        *self.buffer.last_mut().unwrap() |= 1u64 << (i % BITS_IN_WORD);

        // a literal that just became all ones folds back into the run
        if *self.buffer.last().unwrap() == u64::MAX {
            self.buffer.pop();
            let lw = rlw::literal_words(self.buffer[self.rlw]);
            rlw::set_literal_words(&mut self.buffer[self.rlw], lw - 1);
            self.push_empty_word(true);
        }
    }

    /// Extends the bitmap with `number` clean words whose bits all equal
    /// `v`. Returns the number of words appended to the compressed
    /// buffer, which is usually far smaller than `number`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.add_empty_words(true, 2);
    ///
    /// assert_eq!(bitmap.len(), 128);
    /// assert_eq!(bitmap.count_ones(), 128);
    /// assert_eq!(bitmap.compressed_len(), 1);
    /// ```
    pub fn add_empty_words(&mut self, v: bool, number: usize) -> usize {
        let added = self.extend_empty_words(v, number as u64);
        self.bit_size += number * BITS_IN_WORD;
        added
    }

    // Clean-run append without touching bit_size, shared by the public
    // builder entry points.
    fn extend_empty_words(&mut self, v: bool, number: u64) -> usize {
        let mut number = number;
        let mut added = 0;

        if number == 0 {
            return 0;
        }

        let active = self.buffer[self.rlw];
        if rlw::run_bit(active) != v && rlw::size(active) == 0 {
            rlw::set_run_bit(&mut self.buffer[self.rlw], v);
        } else if rlw::literal_words(active) != 0 || rlw::run_bit(active) != v {
            self.buffer_push_rlw(0);
            if v {
                rlw::set_run_bit(&mut self.buffer[self.rlw], true);
            }
            added += 1;
        }

        let run_len = rlw::running_len(self.buffer[self.rlw]);
        let can_add = number.min(rlw::LARGEST_RUNNING_COUNT - run_len);
        rlw::set_running_len(&mut self.buffer[self.rlw], run_len + can_add);
        number -= can_add;

        while number >= rlw::LARGEST_RUNNING_COUNT {
            self.buffer_push_rlw(0);
            added += 1;
            if v {
                rlw::set_run_bit(&mut self.buffer[self.rlw], true);
            }
            rlw::set_running_len(&mut self.buffer[self.rlw], rlw::LARGEST_RUNNING_COUNT);
            number -= rlw::LARGEST_RUNNING_COUNT;
        }

        if number > 0 {
            self.buffer_push_rlw(0);
            added += 1;
            if v {
                rlw::set_run_bit(&mut self.buffer[self.rlw], true);
            }
            rlw::set_running_len(&mut self.buffer[self.rlw], number);
        }

        added
    }

    /// Appends literal words verbatim, optionally negating each word
    /// during the copy. The literal count of the active marker saturates
    /// at 2^31 - 1 words; longer appends continue under fresh markers.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.add_dirty_words(&[0b1011, 0], false);
    ///
    /// assert_eq!(bitmap.len(), 128);
    /// assert_eq!(bitmap.count_ones(), 3);
    /// ```
    pub fn add_dirty_words(&mut self, words: &[u64], negate: bool) {
        let mut words = words;
        loop {
            let literals = rlw::literal_words(self.buffer[self.rlw]);
            let can_add = (words.len() as u64).min(rlw::LARGEST_LITERAL_COUNT - literals) as usize;

            rlw::set_literal_words(&mut self.buffer[self.rlw], literals + can_add as u64);

            if negate {
                self.buffer.extend(words[..can_add].iter().map(|w| !w));
            } else {
                self.buffer.extend_from_slice(&words[..can_add]);
            }

            self.bit_size += can_add * BITS_IN_WORD;

            if can_add == words.len() {
                return;
            }
            self.buffer_push_rlw(0);
            words = &words[can_add..];
        }
    }

    /// Appends a single 64-bit word, choosing the clean or literal
    /// representation. Returns the number of buffer words the append
    /// cost.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.add_word(0);
    /// bitmap.add_word(u64::MAX);
    /// bitmap.add_word(0b101);
    ///
    /// assert_eq!(bitmap.len(), 192);
    /// assert_eq!(bitmap.count_ones(), 66);
    /// ```
    pub fn add_word(&mut self, word: u64) -> usize {
        self.bit_size += BITS_IN_WORD;
        match word {
            0 => self.push_empty_word(false),
            u64::MAX => self.push_empty_word(true),
            w => self.push_literal(w),
        }
    }

    fn push_empty_word(&mut self, v: bool) -> usize {
        self.extend_empty_words(v, 1)
    }

    fn push_literal(&mut self, new_data: u64) -> usize {
        let current = rlw::literal_words(self.buffer[self.rlw]);
        if current >= rlw::LARGEST_LITERAL_COUNT {
            self.buffer_push_rlw(0);
            rlw::set_literal_words(&mut self.buffer[self.rlw], 1);
            self.buffer_push(new_data);
            return 2;
        }
        rlw::set_literal_words(&mut self.buffer[self.rlw], current + 1);
        self.buffer_push(new_data);
        1
    }

    // ---- whole-bitmap operations ----

    /// Negates the bitmap in place, in time linear in the compressed
    /// size. The bit length is unchanged; padding bits of the final
    /// literal beyond [`len`](EwahBitmap::len) are kept at zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.set(0);
    /// bitmap.set(2);
    ///
    /// bitmap.negate();
    /// assert_eq!(bitmap.len(), 3);
    /// assert_eq!(bitmap.ones().collect::<Vec<_>>(), vec![1]);
    /// ```
    pub fn negate(&mut self) {
        let mut pointer = 0;
        while pointer < self.buffer.len() {
            let marker = self.buffer[pointer];
            rlw::set_run_bit(&mut self.buffer[pointer], !rlw::run_bit(marker));
            pointer += 1;

            for _ in 0..rlw::literal_words(marker) {
                self.buffer[pointer] = !self.buffer[pointer];
                pointer += 1;
            }
        }

        // the negation set the padding bits of a partial tail literal
        let tail_bits = self.bit_size % BITS_IN_WORD;
        if tail_bits > 0 && rlw::literal_words(self.buffer[self.rlw]) > 0 {
            *self.buffer.last_mut().unwrap() &= tail_mask(tail_bits);
        }
    }

    /// Counts the set bits without decompressing the bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.add_empty_words(true, 3);
    /// bitmap.set(200);
    ///
    /// assert_eq!(bitmap.count_ones(), 193);
    /// ```
    #[must_use]
    pub fn count_ones(&self) -> usize {
        let mut pointer = 0;
        let mut count = 0;

        while pointer < self.buffer.len() {
            let marker = self.buffer[pointer];
            if rlw::run_bit(marker) {
                count += rlw::running_len(marker) as usize * BITS_IN_WORD;
            }

            let literals = rlw::literal_words(marker) as usize;
            for k in 0..literals {
                count += self.buffer[pointer + 1 + k].count_ones() as usize;
            }
            pointer += literals + 1;
        }
        count
    }

    /// Calls `f` with the position of every set bit, in ascending order,
    /// without decompressing the bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let bitmap: EwahBitmap = [1usize, 5].into_iter().collect();
    ///
    /// let mut seen = Vec::new();
    /// bitmap.each_bit(|pos| seen.push(pos));
    /// assert_eq!(seen, vec![1, 5]);
    /// ```
    pub fn each_bit<F: FnMut(usize)>(&self, mut f: F) {
        for pos in self.ones() {
            f(pos);
        }
    }

    /// Returns an iterator over the positions of set bits, strictly
    /// ascending, without decompressing the bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let positions = vec![0, 63, 128, 129, 1026];
    /// let bitmap: EwahBitmap = positions.iter().copied().collect();
    ///
    /// assert_eq!(bitmap.ones().collect::<Vec<_>>(), positions);
    /// ```
    #[must_use]
    pub fn ones(&self) -> OnesIter<'_> {
        OnesIter {
            buffer: &self.buffer,
            marker: 0,
            run_bits_done: 0,
            literals_done: 0,
            literal_bits_done: 0,
            pos: 0,
        }
    }

    /// Returns an iterator yielding the bitmap as uncompressed 64-bit
    /// words, exactly `len().div_ceil(64)` of them.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let mut bitmap = EwahBitmap::new();
    /// bitmap.set(3);
    /// bitmap.set(64);
    ///
    /// let words: Vec<u64> = bitmap.words().collect();
    /// assert_eq!(words, vec![0b1000, 1]);
    /// ```
    #[must_use]
    pub fn words(&self) -> WordIter<'_> {
        let mut it = WordIter {
            buffer: &self.buffer,
            pointer: 0,
            compressed: 0,
            literals: 0,
            rl: 0,
            lw: 0,
            b: false,
            remaining: self.bit_size.div_ceil(BITS_IN_WORD),
        };
        if it.pointer < it.buffer.len() {
            it.read_new_rlw();
        }
        it
    }

    // ---- combiners ----

    /// Computes the bitwise OR of two bitmaps into a new one. The shorter
    /// bitmap is treated as zero-extended; the result has the longer bit
    /// length.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let a: EwahBitmap = [0usize, 1, 2].into_iter().collect();
    /// let b: EwahBitmap = [2usize, 3, 4].into_iter().collect();
    ///
    /// assert_eq!(a.or(&b).ones().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    /// ```
    #[must_use]
    pub fn or(&self, other: &EwahBitmap) -> EwahBitmap {
        let mut out = EwahBitmap::with_capacity(self.buffer.len().max(other.buffer.len()));
        let mut rlw_i = RunIterator::new(self);
        let mut rlw_j = RunIterator::new(other);

        while rlw_i.word_size() > 0 && rlw_j.word_size() > 0 {
            while rlw_i.running_len > 0 || rlw_j.running_len > 0 {
                let (prey, predator) = if rlw_i.running_len < rlw_j.running_len {
                    (&mut rlw_i, &mut rlw_j)
                } else {
                    (&mut rlw_j, &mut rlw_i)
                };
                let len = predator.running_len;

                if predator.running_bit {
                    // a run of ones swallows whatever the other side holds
                    out.add_empty_words(true, len);
                    prey.discard_first_words(len);
                } else {
                    let index = prey.discharge(&mut out, len, false);
                    out.add_empty_words(false, len - index);
                }
                predator.discard_first_words(len);
            }

            let literals = rlw_i.literal_words.min(rlw_j.literal_words);
            if literals > 0 {
                let lit_i = rlw_i.literals(literals);
                let lit_j = rlw_j.literals(literals);
                for k in 0..literals {
                    out.add_word(lit_i[k] | lit_j[k]);
                }
                rlw_i.discard_first_words(literals);
                rlw_j.discard_first_words(literals);
            }
        }

        if rlw_i.word_size() > 0 {
            rlw_i.discharge(&mut out, usize::MAX, false);
        } else {
            rlw_j.discharge(&mut out, usize::MAX, false);
        }

        out.bit_size = self.bit_size.max(other.bit_size);
        out
    }

    /// Computes the bitwise AND of two bitmaps into a new one. The
    /// shorter bitmap is treated as zero-extended; the result has the
    /// longer bit length.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let a: EwahBitmap = [0usize, 1, 2].into_iter().collect();
    /// let b: EwahBitmap = [2usize, 3, 4].into_iter().collect();
    ///
    /// assert_eq!(a.and(&b).ones().collect::<Vec<_>>(), vec![2]);
    /// ```
    #[must_use]
    pub fn and(&self, other: &EwahBitmap) -> EwahBitmap {
        let mut out = EwahBitmap::with_capacity(self.buffer.len().max(other.buffer.len()));
        let mut rlw_i = RunIterator::new(self);
        let mut rlw_j = RunIterator::new(other);

        while rlw_i.word_size() > 0 && rlw_j.word_size() > 0 {
            while rlw_i.running_len > 0 || rlw_j.running_len > 0 {
                let (prey, predator) = if rlw_i.running_len < rlw_j.running_len {
                    (&mut rlw_i, &mut rlw_j)
                } else {
                    (&mut rlw_j, &mut rlw_i)
                };
                let len = predator.running_len;

                if !predator.running_bit {
                    // a run of zeros forces the output to zeros
                    out.add_empty_words(false, len);
                    prey.discard_first_words(len);
                } else {
                    let index = prey.discharge(&mut out, len, false);
                    out.add_empty_words(false, len - index);
                }
                predator.discard_first_words(len);
            }

            let literals = rlw_i.literal_words.min(rlw_j.literal_words);
            if literals > 0 {
                let lit_i = rlw_i.literals(literals);
                let lit_j = rlw_j.literals(literals);
                for k in 0..literals {
                    out.add_word(lit_i[k] & lit_j[k]);
                }
                rlw_i.discard_first_words(literals);
                rlw_j.discard_first_words(literals);
            }
        }

        if rlw_i.word_size() > 0 {
            rlw_i.discharge_empty(&mut out);
        } else {
            rlw_j.discharge_empty(&mut out);
        }

        out.bit_size = self.bit_size.max(other.bit_size);
        out
    }

    /// Computes the bitwise XOR of two bitmaps into a new one. The
    /// shorter bitmap is treated as zero-extended; the result has the
    /// longer bit length.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let a: EwahBitmap = [0usize, 1, 2].into_iter().collect();
    /// let b: EwahBitmap = [2usize, 3, 4].into_iter().collect();
    ///
    /// assert_eq!(a.xor(&b).ones().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    /// ```
    #[must_use]
    pub fn xor(&self, other: &EwahBitmap) -> EwahBitmap {
        let mut out = EwahBitmap::with_capacity(self.buffer.len().max(other.buffer.len()));
        let mut rlw_i = RunIterator::new(self);
        let mut rlw_j = RunIterator::new(other);

        while rlw_i.word_size() > 0 && rlw_j.word_size() > 0 {
            while rlw_i.running_len > 0 || rlw_j.running_len > 0 {
                let (prey, predator) = if rlw_i.running_len < rlw_j.running_len {
                    (&mut rlw_i, &mut rlw_j)
                } else {
                    (&mut rlw_j, &mut rlw_i)
                };
                let len = predator.running_len;

                // XOR against a run of ones is a negated copy
                let negate = predator.running_bit;
                let index = prey.discharge(&mut out, len, negate);
                out.add_empty_words(negate, len - index);
                predator.discard_first_words(len);
            }

            let literals = rlw_i.literal_words.min(rlw_j.literal_words);
            if literals > 0 {
                let lit_i = rlw_i.literals(literals);
                let lit_j = rlw_j.literals(literals);
                for k in 0..literals {
                    out.add_word(lit_i[k] ^ lit_j[k]);
                }
                rlw_i.discard_first_words(literals);
                rlw_j.discard_first_words(literals);
            }
        }

        if rlw_i.word_size() > 0 {
            rlw_i.discharge(&mut out, usize::MAX, false);
        } else {
            rlw_j.discharge(&mut out, usize::MAX, false);
        }

        out.bit_size = self.bit_size.max(other.bit_size);
        out
    }

    /// Computes `self AND NOT other` into a new bitmap. The operation is
    /// asymmetric: `self` is the minuend. The shorter bitmap is treated
    /// as zero-extended; the result has the longer bit length.
    ///
    /// # Examples
    ///
    /// ```
    /// use ewah::EwahBitmap;
    ///
    /// let a: EwahBitmap = [0usize, 1, 2].into_iter().collect();
    /// let b: EwahBitmap = [2usize, 3, 4].into_iter().collect();
    ///
    /// assert_eq!(a.and_not(&b).ones().collect::<Vec<_>>(), vec![0, 1]);
    /// ```
    #[must_use]
    pub fn and_not(&self, other: &EwahBitmap) -> EwahBitmap {
        let mut out = EwahBitmap::with_capacity(self.buffer.len().max(other.buffer.len()));
        let mut rlw_i = RunIterator::new(self);
        let mut rlw_j = RunIterator::new(other);

        while rlw_i.word_size() > 0 && rlw_j.word_size() > 0 {
            while rlw_i.running_len > 0 || rlw_j.running_len > 0 {
                let i_is_predator = rlw_i.running_len >= rlw_j.running_len;
                let (prey, predator) = if i_is_predator {
                    (&mut rlw_j, &mut rlw_i)
                } else {
                    (&mut rlw_i, &mut rlw_j)
                };
                let len = predator.running_len;

                if predator.running_bit != i_is_predator {
                    // a zero run in the minuend or a ones run in the
                    // subtrahend zeroes the output
                    out.add_empty_words(false, len);
                    prey.discard_first_words(len);
                } else {
                    // the subtrahend's words pass through negated
                    let negate = i_is_predator;
                    let index = prey.discharge(&mut out, len, negate);
                    out.add_empty_words(negate, len - index);
                }
                predator.discard_first_words(len);
            }

            let literals = rlw_i.literal_words.min(rlw_j.literal_words);
            if literals > 0 {
                let lit_i = rlw_i.literals(literals);
                let lit_j = rlw_j.literals(literals);
                for k in 0..literals {
                    out.add_word(lit_i[k] & !lit_j[k]);
                }
                rlw_i.discard_first_words(literals);
                rlw_j.discard_first_words(literals);
            }
        }

        if rlw_i.word_size() > 0 {
            rlw_i.discharge(&mut out, usize::MAX, false);
        } else {
            rlw_j.discharge_empty(&mut out);
        }

        out.bit_size = self.bit_size.max(other.bit_size);
        out
    }

    // ---- serialization ----

    /// Writes the bitmap to `writer` in the fixed wire format and
    /// returns the number of bytes written.
    ///
    /// The layout is, all integers big-endian:
    ///
    /// ```text
    /// u32 bit length | u32 word count | u64 x word count | u32 marker offset
    /// ```
    ///
    /// # Errors
    ///
    /// Fails if the bit length or the word count does not fit in the
    /// 32-bit header fields, or on any write error.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> anyhow::Result<()> {
    /// use ewah::EwahBitmap;
    ///
    /// let bitmap: EwahBitmap = [3usize, 1000].into_iter().collect();
    ///
    /// let mut bytes = Vec::new();
    /// bitmap.serialize_into(&mut bytes)?;
    ///
    /// let restored = EwahBitmap::deserialize_from(bytes.as_slice())?;
    /// assert_eq!(restored, bitmap);
    /// # Ok(())
    /// # }
    /// ```
    pub fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let bit_size = u32::try_from(self.bit_size)
            .map_err(|_| anyhow!("bitmap of {} bits exceeds the 32-bit header", self.bit_size))?;
        let num_words = u32::try_from(self.buffer.len()).map_err(|_| {
            anyhow!(
                "buffer of {} words exceeds the 32-bit header",
                self.buffer.len()
            )
        })?;

        writer.write_all(&bit_size.to_be_bytes())?;
        writer.write_all(&num_words.to_be_bytes())?;
        for &word in &self.buffer {
            writer.write_all(&word.to_be_bytes())?;
        }
        writer.write_all(&(self.rlw as u32).to_be_bytes())?;

        Ok(4 + 4 + self.buffer.len() * 8 + 4)
    }

    /// Reads a bitmap from `reader` in the wire format produced by
    /// [`serialize_into`](EwahBitmap::serialize_into).
    ///
    /// # Errors
    ///
    /// Fails on a short or failed read, or if the stored marker offset
    /// does not point inside the buffer.
    pub fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut word32 = [0u8; 4];
        let mut word64 = [0u8; 8];

        reader.read_exact(&mut word32)?;
        let bit_size = u32::from_be_bytes(word32) as usize;

        reader.read_exact(&mut word32)?;
        let num_words = u32::from_be_bytes(word32) as usize;

        let mut buffer = Vec::with_capacity(num_words.max(1));
        for _ in 0..num_words {
            reader.read_exact(&mut word64)?;
            buffer.push(u64::from_be_bytes(word64));
        }

        reader.read_exact(&mut word32)?;
        let rlw = u32::from_be_bytes(word32) as usize;

        if rlw >= num_words {
            return Err(anyhow!(
                "marker offset {} out of bounds for a buffer of {} words",
                rlw,
                num_words
            ));
        }

        Ok(EwahBitmap {
            buffer,
            bit_size,
            rlw,
        })
    }
}

/// Diagnostic dump of the block structure.
impl fmt::Debug for EwahBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EwahBitmap {{ {} bits, {} words:",
            self.bit_size,
            self.buffer.len()
        )?;

        let mut pointer = 0;
        while pointer < self.buffer.len() {
            let marker = self.buffer[pointer];
            write!(
                f,
                " run({}x{})",
                u8::from(rlw::run_bit(marker)),
                rlw::running_len(marker)
            )?;

            let literals = rlw::literal_words(marker) as usize;
            for k in 0..literals {
                write!(f, " {:#018x}", self.buffer[pointer + 1 + k])?;
            }
            pointer += literals + 1;
        }
        write!(f, " }}")
    }
}

/// Extends the bitmap with an iterator over bit positions, which must be
/// non-decreasing.
impl Extend<usize> for EwahBitmap {
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = usize>,
    {
        for pos in iter {
            self.set(pos);
        }
    }
}

/// Creates a bitmap from an iterator over non-decreasing bit positions.
///
/// # Examples
///
/// ```
/// use ewah::EwahBitmap;
///
/// let bitmap: EwahBitmap = vec![3usize, 32, 48].into_iter().collect();
/// assert_eq!(bitmap.count_ones(), 3);
/// ```
impl FromIterator<usize> for EwahBitmap {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = usize>,
    {
        let mut bitmap = EwahBitmap::new();
        bitmap.extend(iter);
        bitmap
    }
}

impl<'a, 'b> BitOr<&'b EwahBitmap> for &'a EwahBitmap {
    type Output = EwahBitmap;

    fn bitor(self, rhs: &'b EwahBitmap) -> EwahBitmap {
        self.or(rhs)
    }
}

impl<'a, 'b> BitAnd<&'b EwahBitmap> for &'a EwahBitmap {
    type Output = EwahBitmap;

    fn bitand(self, rhs: &'b EwahBitmap) -> EwahBitmap {
        self.and(rhs)
    }
}

impl<'a, 'b> BitXor<&'b EwahBitmap> for &'a EwahBitmap {
    type Output = EwahBitmap;

    fn bitxor(self, rhs: &'b EwahBitmap) -> EwahBitmap {
        self.xor(rhs)
    }
}

/// `a - b` is `a AND NOT b`.
impl<'a, 'b> Sub<&'b EwahBitmap> for &'a EwahBitmap {
    type Output = EwahBitmap;

    fn sub(self, rhs: &'b EwahBitmap) -> EwahBitmap {
        self.and_not(rhs)
    }
}

/// Iterator over the bitmap in uncompressed form, one 64-bit word at a
/// time. Bits of the final word beyond the bitmap's length are zero.
///
/// Returned by [`EwahBitmap::words`].
pub struct WordIter<'a> {
    buffer: &'a [u64],
    pointer: usize,
    compressed: u64,
    literals: u64,
    rl: u64,
    lw: u64,
    b: bool,
    remaining: usize,
}

impl WordIter<'_> {
    // Loads the counters of the marker under the cursor, skipping over
    // markers that describe no words.
    fn read_new_rlw(&mut self) {
        self.compressed = 0;
        self.literals = 0;
        loop {
            let marker = self.buffer[self.pointer];
            self.rl = rlw::running_len(marker);
            self.lw = rlw::literal_words(marker);
            self.b = rlw::run_bit(marker);
            if self.rl > 0 || self.lw > 0 {
                return;
            }
            if self.pointer < self.buffer.len() - 1 {
                self.pointer += 1;
            } else {
                self.pointer = self.buffer.len();
                return;
            }
        }
    }
}

impl Iterator for WordIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.pointer >= self.buffer.len() {
            return None;
        }

        let next = if self.compressed < self.rl {
            self.compressed += 1;
            if self.b {
                u64::MAX
            } else {
                0
            }
        } else {
            debug_assert!(self.literals < self.lw);
            self.literals += 1;
            self.pointer += 1;
            self.buffer[self.pointer]
        };

        if self.compressed == self.rl && self.literals == self.lw {
            self.pointer += 1;
            if self.pointer < self.buffer.len() {
                self.read_new_rlw();
            }
        }

        self.remaining = self.remaining.saturating_sub(1);
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for WordIter<'_> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// Iterator over the positions of set bits, strictly ascending. Clean
/// runs of ones are expanded positionally; literals are scanned with a
/// find-next-set-bit step, so the total work is proportional to the
/// number of set bits plus the compressed size.
///
/// Returned by [`EwahBitmap::ones`].
pub struct OnesIter<'a> {
    buffer: &'a [u64],
    marker: usize,
    run_bits_done: usize,
    literals_done: usize,
    literal_bits_done: usize,
    pos: usize,
}

impl Iterator for OnesIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.marker < self.buffer.len() {
            let marker = self.buffer[self.marker];

            let run_bits = rlw::running_len(marker) as usize * BITS_IN_WORD;
            if self.run_bits_done < run_bits {
                if rlw::run_bit(marker) {
                    let pos = self.pos;
                    self.pos += 1;
                    self.run_bits_done += 1;
                    return Some(pos);
                }
                self.pos += run_bits - self.run_bits_done;
                self.run_bits_done = run_bits;
            }

            let literals = rlw::literal_words(marker) as usize;
            while self.literals_done < literals {
                let literal = self.buffer[self.marker + 1 + self.literals_done];

                // literal_bits_done stays below 64 between calls
                let pending = literal >> self.literal_bits_done;
                if pending != 0 {
                    let skip = pending.trailing_zeros() as usize;
                    let pos = self.pos + skip;
                    self.pos = pos + 1;
                    self.literal_bits_done += skip + 1;
                    if self.literal_bits_done == BITS_IN_WORD {
                        self.literal_bits_done = 0;
                        self.literals_done += 1;
                    }
                    return Some(pos);
                }

                self.pos += BITS_IN_WORD - self.literal_bits_done;
                self.literal_bits_done = 0;
                self.literals_done += 1;
            }

            self.marker += literals + 1;
            self.run_bits_done = 0;
            self.literals_done = 0;
        }
        None
    }
}

// Cursor over the remaining blocks of a compressed buffer. The combiners
// drive a pair of these: each exposes the residual clean run and literal
// count at the head and can consume or copy a given number of words.
struct RunIterator<'a> {
    buffer: &'a [u64],
    pointer: usize,
    running_bit: bool,
    running_len: usize,
    literal_words: usize,
    literal_start: usize,
}

impl<'a> RunIterator<'a> {
    fn new(parent: &'a EwahBitmap) -> Self {
        let mut it = RunIterator {
            buffer: &parent.buffer,
            pointer: 0,
            running_bit: false,
            running_len: 0,
            literal_words: 0,
            literal_start: 0,
        };
        it.read_next_word();
        it
    }

    fn read_next_word(&mut self) {
        if self.pointer >= self.buffer.len() {
            self.running_len = 0;
            self.literal_words = 0;
            return;
        }
        let marker = self.buffer[self.pointer];
        self.running_bit = rlw::run_bit(marker);
        self.running_len = rlw::running_len(marker) as usize;
        self.literal_words = rlw::literal_words(marker) as usize;
        self.literal_start = self.pointer + 1;
        self.pointer += self.literal_words + 1;
    }

    // Words (clean plus literal) left in the current block.
    #[inline]
    fn word_size(&self) -> usize {
        self.running_len + self.literal_words
    }

    // The first `count` remaining literal words.
    #[inline]
    fn literals(&self, count: usize) -> &'a [u64] {
        &self.buffer[self.literal_start..self.literal_start + count]
    }

    // Consumes `x` words from the head, loading subsequent markers as
    // blocks run dry.
    fn discard_first_words(&mut self, mut x: usize) {
        while x > 0 {
            if self.running_len > x {
                self.running_len -= x;
                return;
            }
            x -= self.running_len;
            self.running_len = 0;

            let discard = x.min(self.literal_words);
            self.literal_start += discard;
            self.literal_words -= discard;
            x -= discard;

            if x > 0 || self.word_size() == 0 {
                if self.pointer >= self.buffer.len() {
                    return;
                }
                self.read_next_word();
            }
        }
    }

    // Copies up to `max` words into `out` through the builder, negating
    // the run bit and the literals when `negate` is set. Returns the
    // number of words copied, which is smaller than `max` only if the
    // cursor ran out.
    fn discharge(&mut self, out: &mut EwahBitmap, max: usize, negate: bool) -> usize {
        let mut index = 0;
        while index < max && self.word_size() > 0 {
            let mut pl = self.running_len;
            if pl > max - index {
                pl = max - index;
            }
            out.add_empty_words(self.running_bit ^ negate, pl);
            index += pl;

            let mut pd = self.literal_words;
            if pd > max - index {
                pd = max - index;
            }
            out.add_dirty_words(self.literals(pd), negate);
            self.discard_first_words(pd + pl);
            index += pd;
        }
        index
    }

    // Pads `out` with a zero word for every word left in the cursor.
    fn discharge_empty(&mut self, out: &mut EwahBitmap) {
        while self.word_size() > 0 {
            let size = self.word_size();
            out.add_empty_words(false, size);
            self.discard_first_words(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::gen_sequences::{
        complement, gen_clustered_positions, gen_strictly_increasing_sequence,
    };
    use std::collections::BTreeSet;

    fn from_positions(positions: &[usize]) -> EwahBitmap {
        positions.iter().copied().collect()
    }

    // ============ BUILDER TESTS ============

    #[test]
    fn test_new_is_empty() {
        let bitmap = EwahBitmap::new();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.len(), 0);
        assert_eq!(bitmap.count_ones(), 0);
        assert_eq!(bitmap.compressed_len(), 1);
        assert_eq!(bitmap.ones().next(), None);
        assert_eq!(bitmap.words().next(), None);
    }

    #[test]
    fn test_set_scattered_positions() {
        let positions = [3, 32, 48, 63, 1024, 7600];
        let bitmap = from_positions(&positions);

        assert_eq!(bitmap.len(), 7601);
        assert_eq!(bitmap.count_ones(), 6);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), positions);

        let words: Vec<u64> = bitmap.words().collect();
        assert_eq!(words.len(), 7601usize.div_ceil(64));
        assert_eq!(words.len(), 119);

        assert_eq!(words[0], (1 << 3) | (1 << 32) | (1 << 48) | (1 << 63));
        assert_eq!(words[16], 1); // bit 1024
        assert_eq!(words[118], 1 << 48); // bit 7600
        for (i, &w) in words.iter().enumerate() {
            if i != 0 && i != 16 && i != 118 {
                assert_eq!(w, 0, "word {} should be empty", i);
            }
        }
    }

    #[test]
    fn test_set_is_idempotent_on_last_position() {
        let mut bitmap = EwahBitmap::new();
        bitmap.set(10);
        bitmap.set(10);
        bitmap.set(10);
        assert_eq!(bitmap.count_ones(), 1);
        assert_eq!(bitmap.len(), 11);

        // also across a word boundary fold
        let mut bitmap = EwahBitmap::new();
        for i in 0..64 {
            bitmap.set(i);
        }
        bitmap.set(63);
        assert_eq!(bitmap.count_ones(), 64);
    }

    #[test]
    #[should_panic]
    fn test_set_backwards_panics() {
        let mut bitmap = EwahBitmap::new();
        bitmap.set(100);
        bitmap.set(50);
    }

    #[test]
    fn test_set_consecutive_bits_fold_into_runs() {
        let mut bitmap = EwahBitmap::new();
        for i in 0..192 {
            bitmap.set(i);
        }
        // three complete words of ones collapse into one marker
        assert_eq!(bitmap.compressed_len(), 1);
        assert_eq!(bitmap.count_ones(), 192);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), (0..192).collect::<Vec<_>>());
    }

    #[test]
    fn test_set_after_long_gap_stays_compressed() {
        let mut bitmap = EwahBitmap::new();
        bitmap.add_empty_words(false, 1_000_000);
        bitmap.set(64_000_001);

        assert_eq!(bitmap.count_ones(), 1);
        assert!(bitmap.compressed_len() <= 4);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), vec![64_000_001]);
    }

    #[test]
    fn test_add_empty_words_coalesces_runs() {
        let mut bitmap = EwahBitmap::new();
        bitmap.add_empty_words(false, 10);
        bitmap.add_empty_words(false, 20);
        assert_eq!(bitmap.compressed_len(), 1);
        assert_eq!(bitmap.len(), 30 * 64);

        // switching the run value needs a fresh marker
        bitmap.add_empty_words(true, 5);
        assert_eq!(bitmap.compressed_len(), 2);
        assert_eq!(bitmap.count_ones(), 5 * 64);
        assert_eq!(bitmap.len(), 35 * 64);
    }

    #[test]
    fn test_add_empty_words_saturates_marker() {
        let n = rlw::LARGEST_RUNNING_COUNT as usize + 10;
        let mut bitmap = EwahBitmap::new();
        let added = bitmap.add_empty_words(false, n);

        // the run spills into a second marker
        assert_eq!(added, 1);
        assert_eq!(bitmap.compressed_len(), 2);
        assert_eq!(bitmap.len(), n * 64);
        assert_eq!(bitmap.count_ones(), 0);
    }

    #[test]
    fn test_add_dirty_words() {
        let words = [0xdead_beef_u64, 0, u64::MAX, 0b1010];
        let mut bitmap = EwahBitmap::new();
        bitmap.add_dirty_words(&words, false);

        assert_eq!(bitmap.len(), 4 * 64);
        let expected: usize = words.iter().map(|w| w.count_ones() as usize).sum();
        assert_eq!(bitmap.count_ones(), expected);
        assert_eq!(bitmap.words().collect::<Vec<_>>(), words);
    }

    #[test]
    fn test_add_dirty_words_negated() {
        let words = [0xdead_beef_u64, 0, u64::MAX, 0b1010];
        let mut bitmap = EwahBitmap::new();
        bitmap.add_dirty_words(&words, true);

        let expected: Vec<u64> = words.iter().map(|w| !w).collect();
        assert_eq!(bitmap.words().collect::<Vec<_>>(), expected);
        let expected_ones: usize = expected.iter().map(|w| w.count_ones() as usize).sum();
        assert_eq!(bitmap.count_ones(), expected_ones);
    }

    #[test]
    fn test_add_word_chooses_representation() {
        let mut bitmap = EwahBitmap::new();
        bitmap.add_word(0);
        bitmap.add_word(0);
        assert_eq!(bitmap.compressed_len(), 1);

        bitmap.add_word(u64::MAX);
        assert_eq!(bitmap.compressed_len(), 2);

        bitmap.add_word(0b11);
        assert_eq!(bitmap.compressed_len(), 3);

        assert_eq!(bitmap.len(), 4 * 64);
        assert_eq!(bitmap.count_ones(), 66);
        assert_eq!(bitmap.words().collect::<Vec<_>>(), vec![0, 0, u64::MAX, 0b11]);
    }

    #[test]
    fn test_clear_resets() {
        let mut bitmap = EwahBitmap::new();
        bitmap.set(12345);
        bitmap.clear();

        assert!(bitmap.is_empty());
        assert_eq!(bitmap.compressed_len(), 1);
        assert_eq!(bitmap, EwahBitmap::new());

        // usable again after the reset
        bitmap.set(3);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), vec![3]);
    }

    // ============ NEGATION TESTS ============

    #[test]
    fn test_negate_dense_prefix() {
        let mut bitmap = EwahBitmap::new();
        for i in 0..128 {
            bitmap.set(i);
        }

        bitmap.negate();
        assert_eq!(bitmap.len(), 128);
        assert_eq!(bitmap.count_ones(), 0);
        assert_eq!(bitmap.words().collect::<Vec<_>>(), vec![0, 0]);
    }

    #[test]
    fn test_negate_masks_partial_tail() {
        let bitmap = {
            let mut b = from_positions(&[0, 2]);
            b.negate();
            b
        };

        assert_eq!(bitmap.len(), 3);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), vec![1]);
        assert_eq!(bitmap.count_ones(), 1);
    }

    #[test]
    fn test_negate_matches_complement() {
        let universe = 3000;
        let mut positions = gen_strictly_increasing_sequence(200, universe);
        positions.push(universe - 1); // pin the length
        positions.dedup();

        let mut bitmap = from_positions(&positions);
        bitmap.negate();

        assert_eq!(
            bitmap.ones().collect::<Vec<_>>(),
            complement(&positions, universe)
        );
    }

    #[test]
    fn test_double_negation_is_identity() {
        for positions in [
            vec![0, 1, 2],
            vec![5, 64, 130, 1000],
            gen_clustered_positions(20, 100, 3000),
        ] {
            let bitmap = from_positions(&positions);
            let mut twice = bitmap.clone();
            twice.negate();
            twice.negate();
            assert_eq!(twice, bitmap);
        }
    }

    // ============ ITERATOR TESTS ============

    #[test]
    fn test_words_match_uncompressed_form() {
        let positions = gen_clustered_positions(30, 150, 4000);
        let bitmap = from_positions(&positions);

        let mut plain = Bitmap::new();
        for &p in &positions {
            plain.set(p);
        }

        let words: Vec<u64> = bitmap.words().collect();
        assert_eq!(words.len(), bitmap.len().div_ceil(64));
        for &p in &positions {
            assert_eq!(words[p / 64] >> (p % 64) & 1, 1);
        }
        let total: usize = words.iter().map(|w| w.count_ones() as usize).sum();
        assert_eq!(total, plain.count_ones());
    }

    #[test]
    fn test_words_iterator_is_exact_size() {
        let bitmap = from_positions(&[3, 500, 130_000]);
        let mut it = bitmap.words();
        let expected = bitmap.len().div_ceil(64);
        assert_eq!(it.len(), expected);
        it.next();
        assert_eq!(it.len(), expected - 1);
        assert_eq!(it.count(), expected - 1);
    }

    #[test]
    fn test_ones_sparse_positions() {
        let positions = gen_strictly_increasing_sequence(1000, 1 << 20);
        let bitmap = from_positions(&positions);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), positions);
    }

    #[test]
    fn test_ones_walks_runs_of_ones() {
        let mut bitmap = EwahBitmap::new();
        bitmap.add_empty_words(true, 2);
        bitmap.set(200);

        let expected: Vec<usize> = (0..128).chain([200]).collect();
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_ones_clustered_positions() {
        let positions = gen_clustered_positions(25, 300, 10_000);
        let bitmap = from_positions(&positions);
        assert_eq!(bitmap.ones().collect::<Vec<_>>(), positions);
    }

    #[test]
    fn test_count_ones_matches_iterator() {
        let positions = gen_clustered_positions(15, 200, 5000);
        let bitmap = from_positions(&positions);
        assert_eq!(bitmap.count_ones(), bitmap.ones().count());
        assert_eq!(bitmap.count_ones(), positions.len());
    }

    #[test]
    fn test_each_bit_matches_ones() {
        let positions = gen_strictly_increasing_sequence(500, 1 << 16);
        let bitmap = from_positions(&positions);

        let mut seen = Vec::new();
        bitmap.each_bit(|pos| seen.push(pos));
        assert_eq!(seen, bitmap.ones().collect::<Vec<_>>());
    }

    // ============ COMBINER TESTS ============

    #[test]
    fn test_combine_small_sets() {
        let a = from_positions(&[0, 1, 2]);
        let b = from_positions(&[2, 3, 4]);

        assert_eq!(a.or(&b).ones().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(a.and(&b).ones().collect::<Vec<_>>(), vec![2]);
        assert_eq!(a.xor(&b).ones().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
        assert_eq!(a.and_not(&b).ones().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(b.and_not(&a).ones().collect::<Vec<_>>(), vec![3, 4]);

        assert_eq!((&a | &b).ones().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!((&a & &b).ones().collect::<Vec<_>>(), vec![2]);
        assert_eq!((&a ^ &b).ones().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
        assert_eq!((&a - &b).ones().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_combine_random_pairs() {
        // mismatched universes exercise the zero-extended tails
        let pa = gen_strictly_increasing_sequence(800, 1 << 16);
        let pb = gen_clustered_positions(20, 400, 2000);

        let a = from_positions(&pa);
        let b = from_positions(&pb);

        let sa: BTreeSet<usize> = pa.iter().copied().collect();
        let sb: BTreeSet<usize> = pb.iter().copied().collect();

        let or: Vec<usize> = sa.union(&sb).copied().collect();
        let and: Vec<usize> = sa.intersection(&sb).copied().collect();
        let xor: Vec<usize> = sa.symmetric_difference(&sb).copied().collect();
        let diff: Vec<usize> = sa.difference(&sb).copied().collect();

        assert_eq!(a.or(&b).ones().collect::<Vec<_>>(), or);
        assert_eq!(a.and(&b).ones().collect::<Vec<_>>(), and);
        assert_eq!(a.xor(&b).ones().collect::<Vec<_>>(), xor);
        assert_eq!(a.and_not(&b).ones().collect::<Vec<_>>(), diff);

        let max_len = a.len().max(b.len());
        assert_eq!(a.or(&b).len(), max_len);
        assert_eq!(a.and(&b).len(), max_len);
        assert_eq!(a.xor(&b).len(), max_len);
        assert_eq!(a.and_not(&b).len(), max_len);
    }

    #[test]
    fn test_combiners_are_commutative() {
        let a = from_positions(&gen_strictly_increasing_sequence(500, 1 << 15));
        let b = from_positions(&gen_clustered_positions(10, 256, 4096));

        assert_eq!(a.or(&b), b.or(&a));
        assert_eq!(a.and(&b), b.and(&a));
        assert_eq!(a.xor(&b), b.xor(&a));
    }

    #[test]
    fn test_combiners_with_self() {
        let a = from_positions(&gen_clustered_positions(12, 200, 3000));

        assert_eq!(a.or(&a), a);
        assert_eq!(a.and(&a), a);

        let zero = a.xor(&a);
        assert_eq!(zero.count_ones(), 0);
        assert_eq!(zero.len(), a.len());
        assert_eq!(a.and_not(&a).count_ones(), 0);
    }

    #[test]
    fn test_and_not_equals_and_with_negation() {
        let universe = 5000;
        let mut pa = gen_strictly_increasing_sequence(300, universe);
        let mut pb = gen_strictly_increasing_sequence(400, universe);
        // equal bit lengths so the negated operand covers the minuend
        pa.push(universe - 1);
        pb.push(universe - 1);
        pa.dedup();
        pb.dedup();

        let a = from_positions(&pa);
        let b = from_positions(&pb);

        let mut not_b = b.clone();
        not_b.negate();

        assert_eq!(a.and_not(&b), a.and(&not_b));
    }

    #[test]
    fn test_combine_with_empty() {
        let a = from_positions(&[1, 70, 300]);
        let empty = EwahBitmap::new();

        assert_eq!(a.or(&empty), a);
        assert_eq!(empty.or(&a), a);
        assert_eq!(a.xor(&empty), a);
        assert_eq!(a.and_not(&empty), a);

        let and = a.and(&empty);
        assert_eq!(and.count_ones(), 0);
        assert_eq!(and.len(), a.len());

        let rev = empty.and_not(&a);
        assert_eq!(rev.count_ones(), 0);
        assert_eq!(rev.len(), a.len());
    }

    #[test]
    fn test_combine_long_runs() {
        let mut ones = EwahBitmap::new();
        ones.add_empty_words(true, 1000);

        let sparse = from_positions(&[5, 63_999, 70_000]);

        let or = ones.or(&sparse);
        assert_eq!(or.count_ones(), 64_000 + 1);
        assert_eq!(or.len(), 70_001);

        let and = ones.and(&sparse);
        assert_eq!(and.ones().collect::<Vec<_>>(), vec![5, 63_999]);

        let xor = ones.xor(&sparse);
        assert_eq!(xor.count_ones(), 64_000 - 2 + 1);

        let diff = ones.and_not(&sparse);
        assert_eq!(diff.count_ones(), 64_000 - 2);
    }

    // ============ SERIALIZATION TESTS ============

    #[test]
    fn test_serialize_wire_format() {
        let mut bitmap = EwahBitmap::new();
        bitmap.set(0);

        let mut bytes = Vec::new();
        let written = bitmap.serialize_into(&mut bytes).unwrap();
        assert_eq!(written, bytes.len());
        assert_eq!(bytes.len(), 4 + 4 + 2 * 8 + 4);

        let mut expected = Vec::new();
        expected.extend_from_slice(&1u32.to_be_bytes()); // bit length
        expected.extend_from_slice(&2u32.to_be_bytes()); // word count
        expected.extend_from_slice(&(1u64 << 33).to_be_bytes()); // marker: one literal
        expected.extend_from_slice(&1u64.to_be_bytes()); // the literal
        expected.extend_from_slice(&0u32.to_be_bytes()); // marker offset
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let bitmap = from_positions(&[3, 32, 48, 63, 1024, 7600]);

        let mut bytes = Vec::new();
        bitmap.serialize_into(&mut bytes).unwrap();
        let restored = EwahBitmap::deserialize_from(bytes.as_slice()).unwrap();

        assert_eq!(restored, bitmap);
        assert_eq!(
            restored.ones().collect::<Vec<_>>(),
            vec![3, 32, 48, 63, 1024, 7600]
        );
    }

    #[test]
    fn test_serialize_roundtrip_random() {
        for positions in [
            gen_strictly_increasing_sequence(2000, 1 << 18),
            gen_clustered_positions(40, 500, 8000),
        ] {
            let bitmap = from_positions(&positions);
            let mut bytes = Vec::new();
            bitmap.serialize_into(&mut bytes).unwrap();
            let restored = EwahBitmap::deserialize_from(bytes.as_slice()).unwrap();
            assert_eq!(restored, bitmap);
        }
    }

    #[test]
    fn test_serialize_empty() {
        let bitmap = EwahBitmap::new();
        let mut bytes = Vec::new();
        let written = bitmap.serialize_into(&mut bytes).unwrap();
        assert_eq!(written, 4 + 4 + 8 + 4);

        let restored = EwahBitmap::deserialize_from(bytes.as_slice()).unwrap();
        assert_eq!(restored, bitmap);
        assert!(restored.is_empty());
    }

    #[test]
    fn test_deserialize_short_input() {
        let bitmap = from_positions(&[1, 2, 3]);
        let mut bytes = Vec::new();
        bitmap.serialize_into(&mut bytes).unwrap();

        for cut in [0, 3, 7, bytes.len() - 1] {
            assert!(EwahBitmap::deserialize_from(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_deserialize_rejects_bad_marker_offset() {
        let bitmap = from_positions(&[1, 2, 3]);
        let mut bytes = Vec::new();
        bitmap.serialize_into(&mut bytes).unwrap();

        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(EwahBitmap::deserialize_from(bytes.as_slice()).is_err());
    }

    #[test]
    fn test_serialize_rejects_oversized() {
        let mut bitmap = EwahBitmap::new();
        // a cheap bitmap whose bit length overflows the header field
        bitmap.add_empty_words(false, (1 << 26) + 1);
        assert!(bitmap.len() > u32::MAX as usize);

        let mut bytes = Vec::new();
        assert!(bitmap.serialize_into(&mut bytes).is_err());
    }

    // ============ DIAGNOSTICS ============

    #[test]
    fn test_debug_dump() {
        let bitmap = from_positions(&[0, 200]);
        let dump = format!("{:?}", bitmap);
        assert!(dump.contains("201 bits"));
        assert!(dump.contains("run("));
    }
}
