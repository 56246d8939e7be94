/// The number of bits in a 64-bit word.
pub const BITS_IN_WORD: usize = 64;

// A function that returns a u64 with the first `bits` set to 1.
// UB if `bits` > 64
#[inline]
pub fn tail_mask(bits: usize) -> u64 {
    if bits == 0 {
        0
    } else {
        u64::MAX >> (64 - bits)
    }
}

// Required by trailing_zeros_debruijn. Maps the top 6 bits of
// isolated_lsb * DEBRUIJN64 back to the bit index.
const DEBRUIJN64: u64 = 0x03f7_9d71_b4cb_0a89;
const DEBRUIJN64_INDEX: [u32; 64] = [
    0, 1, 48, 2, 57, 49, 28, 3, 61, 58, 50, 42, 38, 29, 17, 4, 62, 55, 59, 36, 53, 51, 43, 22, 45,
    39, 33, 30, 24, 18, 12, 5, 63, 47, 56, 27, 60, 41, 37, 16, 54, 35, 52, 21, 44, 32, 23, 11, 46,
    26, 40, 15, 34, 20, 31, 10, 25, 14, 19, 9, 13, 8, 7, 6,
];

/// Computes the number of trailing zeros in a 64-bit word without a
/// hardware bit-scan instruction, by multiplying the isolated lowest set
/// bit with a de Bruijn sequence.
///
/// Returns 64 when `word` is 0. The compressed-bitmap iterators use the
/// native [`u64::trailing_zeros`]; this fallback is provided for targets
/// without a usable intrinsic and is tested against the native result.
///
/// # Examples
///
/// ```
/// use ewah::utils::trailing_zeros_debruijn;
///
/// assert_eq!(trailing_zeros_debruijn(0b1000), 3);
/// assert_eq!(trailing_zeros_debruijn(0), 64);
/// ```
#[inline]
pub fn trailing_zeros_debruijn(word: u64) -> u32 {
    if word == 0 {
        return 64;
    }
    let isolated = word & word.wrapping_neg();
    DEBRUIJN64_INDEX[(isolated.wrapping_mul(DEBRUIJN64) >> 58) as usize]
}
