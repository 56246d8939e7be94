//! This crate provides compressed bitmaps in the Enhanced Word-Aligned
//! Hybrid (EWAH) encoding: arbitrarily long bit strings stored as
//! run-length-compressed 64-bit words, with streaming construction,
//! one-pass iteration, and logical combination (OR, AND, XOR, AND NOT)
//! that never decompresses the operands. A plain uncompressed bitmap is
//! included as the common ingestion path.

pub mod ewah;
pub use ewah::{EwahBitmap, OnesIter, WordIter};

pub mod bitmap;
pub use bitmap::Bitmap;

pub mod gen_sequences;

pub mod utils;
