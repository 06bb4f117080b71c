//! bzip2-backed [`Compressor`]/[`Decompressor`] implementations.

use bzip2::{Action, Compress, Compression, Decompress, Status};

use super::{Compressor, Decompressor};
use crate::{Error, Result};

const BUFFER_SIZE: usize = 8192;

/// Compresses via the `bzip2` crate's low-level streaming interface.
pub struct Bzip2Compressor {
    inner: Compress,
}

impl Bzip2Compressor {
    /// Creates a new compressor at the default compression level.
    pub fn new() -> Self {
        Self { inner: Compress::new(Compression::default(), 0) }
    }
}

impl Default for Bzip2Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Bzip2Compressor {
    fn compress(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; BUFFER_SIZE];
        let mut input = chunk;
        loop {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            self.inner
                .compress(input, &mut buf, Action::Run)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);
            input = &input[consumed..];
            if input.is_empty() {
                break;
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .compress(&[], &mut buf, Action::Finish)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);
            if status == Status::StreamEnd {
                break;
            }
        }
        Ok(out)
    }
}

/// Decompresses via the `bzip2` crate's low-level streaming
/// interface.
pub struct Bzip2Decompressor {
    inner: Decompress,
}

impl Bzip2Decompressor {
    /// Creates a new decompressor.
    pub fn new() -> Self {
        Self { inner: Decompress::new(false) }
    }
}

impl Default for Bzip2Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for Bzip2Decompressor {
    fn decompress(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; BUFFER_SIZE];
        let mut input = chunk;
        loop {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(input, &mut buf)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);
            input = &input[consumed..];
            if input.is_empty() || status == Status::StreamEnd {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_data() {
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let mut c = Bzip2Compressor::new();
        let mut compressed = c.compress(&plaintext).unwrap();
        compressed.extend(c.finish().unwrap());
        assert!(compressed.len() < plaintext.len());

        let mut d = Bzip2Decompressor::new();
        let recovered = d.decompress(&compressed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn round_trips_empty_input() {
        let mut c = Bzip2Compressor::new();
        let mut compressed = c.compress(&[]).unwrap();
        compressed.extend(c.finish().unwrap());

        let mut d = Bzip2Decompressor::new();
        let recovered = d.decompress(&compressed).unwrap();
        assert!(recovered.is_empty());
    }
}
