//! The streaming encrypt-and-armor pipeline.

use std::io::{Read, Seek};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

use super::{Bzip2Compressor, Compressor};
use crate::pad::store::PadRecordsStore;
use crate::session::PadSession;
use crate::Result;

/// Line length (in base64 characters) at which the armored body
/// wraps, matching the historical MIME convention of 76 characters
/// per line.
const LINE_LENGTH: usize = 76;

/// Feeds plaintext to the session's running hash, compresses it,
/// pad-XORs the compressed bytes through a prepared
/// [`PadSession`], and base64-encodes the result with line wrapping.
///
/// `session` must already have had [`PadSession::prepare_for_encryption`]
/// called on it.
pub struct StreamEncoder<P> {
    session: PadSession<P>,
    compressor: Bzip2Compressor,
    line_writer: Base64LineWriter,
}

impl<P: Read + Seek> StreamEncoder<P> {
    /// Wraps an already-prepared encrypting session.
    pub fn new(session: PadSession<P>) -> Self {
        Self {
            session,
            compressor: Bzip2Compressor::new(),
            line_writer: Base64LineWriter::new(),
        }
    }

    /// Encodes one chunk of plaintext, returning the armored text
    /// produced so far (which may be empty, if not enough compressed
    /// output has accumulated to fill a base64 group).
    pub fn encode(&mut self, plaintext: &[u8]) -> Result<String> {
        self.session.digest_gulp(plaintext);
        let compressed = self.compressor.compress(plaintext)?;
        let ciphertext = self.session.convert(&compressed)?;
        Ok(self.line_writer.write(&ciphertext))
    }

    /// Flushes compression, emits the digest and tail fuzz, records
    /// pad consumption with `store`, and returns the final armored
    /// text (including any trailing partial base64 group).
    pub fn finish(mut self, store: &mut PadRecordsStore) -> Result<String> {
        let tail_compressed = self.compressor.finish()?;
        let mut ciphertext = self.session.convert(&tail_compressed)?;
        ciphertext.extend(self.session.finish(store)?);
        let mut out = self.line_writer.write(&ciphertext);
        out.push_str(&self.line_writer.finish());
        Ok(out)
    }

    /// Borrows the underlying session, e.g. to read its identifier or
    /// offset for the message header.
    pub fn session(&self) -> &PadSession<P> {
        &self.session
    }
}

/// A line-wrapping base64 encoder that accepts input in arbitrary
/// chunk sizes.
///
/// Mirrors the three-byte stash technique used by line-wrapping
/// armor writers generally: base64 maps 3 input bytes to 4 output
/// characters, so a chunk boundary that falls mid-group is stashed
/// until enough bytes arrive to complete it.
struct Base64LineWriter {
    stash: Vec<u8>,
    column: usize,
}

impl Base64LineWriter {
    fn new() -> Self {
        Self { stash: Vec::with_capacity(2), column: 0 }
    }

    fn write(&mut self, mut input: &[u8]) -> String {
        let mut out = String::new();

        if !self.stash.is_empty() {
            while self.stash.len() < 3 && !input.is_empty() {
                self.stash.push(input[0]);
                input = &input[1..];
            }
            if self.stash.len() < 3 {
                return out;
            }
            self.append_wrapped(&mut out, &STANDARD_NO_PAD.encode(&self.stash));
            self.stash.clear();
        }

        let whole_len = input.len() - (input.len() % 3);
        let (whole, rest) = input.split_at(whole_len);
        self.stash.extend_from_slice(rest);
        if !whole.is_empty() {
            self.append_wrapped(&mut out, &STANDARD_NO_PAD.encode(whole));
        }
        out
    }

    fn finish(mut self) -> String {
        let mut out = String::new();
        if !self.stash.is_empty() {
            self.append_wrapped(&mut out, &STANDARD.encode(&self.stash));
            self.stash.clear();
        }
        if self.column > 0 {
            out.push('\n');
        }
        out
    }

    fn append_wrapped(&mut self, out: &mut String, encoded: &str) {
        let mut rest = encoded.as_bytes();
        while !rest.is_empty() {
            let avail = LINE_LENGTH - self.column;
            let n = avail.min(rest.len());
            out.push_str(std::str::from_utf8(&rest[..n]).expect("base64 is ascii"));
            self.column += n;
            rest = &rest[n..];
            if self.column == LINE_LENGTH {
                out.push('\n');
                self.column = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_line_length() {
        let mut w = Base64LineWriter::new();
        let mut out = w.write(&[0u8; 300]);
        out.push_str(&w.finish());
        for line in out.lines() {
            assert!(line.len() <= LINE_LENGTH);
        }
        assert!(out.lines().count() > 1);
    }

    #[test]
    fn handles_byte_at_a_time_input() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut whole = Base64LineWriter::new();
        let mut expected = whole.write(&data);
        expected.push_str(&whole.finish());

        let mut piecemeal = Base64LineWriter::new();
        let mut got = String::new();
        for byte in &data {
            got.push_str(&piecemeal.write(std::slice::from_ref(byte)));
        }
        got.push_str(&piecemeal.finish());
        assert_eq!(got, expected);
    }
}
