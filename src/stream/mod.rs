//! Compression and the streaming encode/decode pipelines built on top
//! of [`crate::session::PadSession`].
//!
//! Compression is mandatory and not configurable: every message is
//! bzip2-compressed before being pad-XORed (encrypting) or
//! bzip2-decompressed after being pad-unXORed (decrypting, at the
//! internal format level). [`Compressor`] and [`Decompressor`] are
//! small duck-typed traits over that so the encoder/decoder don't
//! need to know which compression library backs them; [`Bzip2Compressor`]
//! and [`Bzip2Decompressor`] are the only implementations, backed by
//! the `bzip2` crate's low-level streaming interface.

mod bzip2_codec;
mod decoder;
mod encoder;

pub use bzip2_codec::{Bzip2Compressor, Bzip2Decompressor};
pub use decoder::StreamDecoder;
pub use encoder::StreamEncoder;

use crate::Result;

/// A streaming compressor: plaintext in, compressed bytes out.
///
/// Implementations may buffer internally; [`Compressor::finish`] must
/// be called exactly once, after the last call to
/// [`Compressor::compress`], to flush any buffered output.
pub trait Compressor {
    /// Compresses `chunk`, returning any newly available compressed
    /// output (which may be empty, or span output from several prior
    /// calls).
    fn compress(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;

    /// Flushes and finalizes the compression stream.
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// A streaming decompressor: compressed bytes in, plaintext out.
pub trait Decompressor {
    /// Decompresses `chunk`, returning any newly available plaintext.
    fn decompress(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;
}
