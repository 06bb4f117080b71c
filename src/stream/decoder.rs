//! The streaming unarmor-and-decrypt pipeline.

use std::io::{Read, Seek};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::{Bzip2Decompressor, Decompressor};
use crate::pad::store::PadRecordsStore;
use crate::session::{FormatLevel, PadSession};
use crate::{Error, Result};

/// Reverses [`super::StreamEncoder`]: base64-decodes an armored body,
/// pad-unmasks it through a prepared [`PadSession`], decompresses it,
/// and feeds the recovered plaintext back into the session's running
/// hash so it can be checked against the embedded digest at
/// [`StreamDecoder::finish`].
///
/// At [`FormatLevel::Original`], reproduces the legacy decode order
/// verbatim: decompress the still pad-masked bytes, *then* unmask.
/// This does not generally recover anything usable; it exists only
/// for bug-compatible reads of pre-existing `original`-level
/// messages, matching the historical implementation (see
/// `DESIGN.md`).
pub struct StreamDecoder<P> {
    session: PadSession<P>,
    decompressor: Bzip2Decompressor,
    format_level: FormatLevel,
    base64_stash: String,
}

impl<P: Read + Seek> StreamDecoder<P> {
    /// Wraps an already-prepared decrypting session.
    ///
    /// `format_level` must match the level `session` was prepared
    /// with ([`PadSession::prepare_for_decryption`]); a mismatch, or a
    /// session that has not been prepared for decryption at all, is
    /// rejected with [`crate::Error::FormatLevel`] rather than
    /// silently decoding with the wrong byte ordering.
    pub fn new(session: PadSession<P>, format_level: FormatLevel) -> Result<Self> {
        match session.format_level() {
            Some(level) if level == format_level => {}
            Some(_) => {
                return Err(Error::FormatLevel(
                    "format_level passed to StreamDecoder::new does not match \
                     the level the session was prepared for decryption with"
                        .into(),
                ))
            }
            None => {
                return Err(Error::FormatLevel(
                    "session has not been prepared for decryption".into(),
                ))
            }
        }
        Ok(Self { session, decompressor: Bzip2Decompressor::new(), format_level, base64_stash: String::new() })
    }

    /// Decodes one chunk of armored body text, returning any
    /// recovered plaintext bytes.
    pub fn decode(&mut self, chunk: &str) -> Result<Vec<u8>> {
        let ciphertext = self.take_base64_groups(chunk);
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        match self.format_level {
            FormatLevel::Internal => self.decode_internal(&ciphertext),
            FormatLevel::Original => self.decode_original(&ciphertext),
        }
    }

    fn decode_internal(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let unmasked = self.session.convert(ciphertext)?;
        let plaintext = self.decompressor.decompress(&unmasked)?;
        self.session.digest_gulp(&plaintext);
        Ok(plaintext)
    }

    fn decode_original(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let decompressed = self.decompressor.decompress(ciphertext)?;
        self.session.convert(&decompressed)
    }

    /// Flushes any trailing base64 group, finishes the underlying
    /// session (verifying the digest and tail fuzz at the internal
    /// level), and records pad consumption with `store`.
    pub fn finish(mut self, store: &mut PadRecordsStore) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if !self.base64_stash.is_empty() {
            let mut padded = self.base64_stash.clone();
            while padded.len() % 4 != 0 {
                padded.push('=');
            }
            let ciphertext = STANDARD
                .decode(padded.as_bytes())
                .map_err(crate::Error::from)?;
            out.extend(match self.format_level {
                FormatLevel::Internal => self.decode_internal(&ciphertext)?,
                FormatLevel::Original => self.decode_original(&ciphertext)?,
            });
        }
        out.extend(self.session.finish(store)?);
        Ok(out)
    }

    fn take_base64_groups(&mut self, chunk: &str) -> Vec<u8> {
        self.base64_stash.extend(chunk.chars().filter(|c| !c.is_whitespace()));
        let whole_len = self.base64_stash.len() - (self.base64_stash.len() % 4);
        let whole: String = self.base64_stash.drain(..whole_len).collect();
        if whole.is_empty() {
            return Vec::new();
        }
        STANDARD.decode(whole.as_bytes()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::store::PadRecordsStore;
    use crate::random::SeededRandom;
    use crate::stream::StreamEncoder;
    use std::io::Cursor;

    fn pad(len: usize) -> Vec<u8> {
        let mut r = SeededRandom::new();
        r.fill(len)
    }

    #[test]
    fn round_trips_through_armored_text() {
        let pad_bytes = pad(1 << 16);
        let mut store = PadRecordsStore::open("-").unwrap();

        let mut enc_session =
            PadSession::new(Cursor::new(pad_bytes.clone()), pad_bytes.len() as u64, true, Box::new(SeededRandom::new()))
                .unwrap();
        enc_session.register(&mut store).unwrap();
        enc_session.prepare_for_encryption().unwrap();
        let offset = enc_session.offset().unwrap();
        let mut encoder = StreamEncoder::new(enc_session);

        let plaintext = b"a message that spans more than one base64 group, for sure";
        let mut armored = encoder.encode(plaintext).unwrap();
        armored.push_str(&encoder.finish(&mut store).unwrap());

        let mut dec_session =
            PadSession::new(Cursor::new(pad_bytes), (1 << 16) as u64, true, Box::new(SeededRandom::new())).unwrap();
        dec_session.register(&mut store).unwrap();
        dec_session.set_offset(offset).unwrap();
        dec_session.prepare_for_decryption(FormatLevel::Internal).unwrap();
        let mut decoder = StreamDecoder::new(dec_session, FormatLevel::Internal).unwrap();
        let mut recovered = decoder.decode(&armored).unwrap();
        recovered.extend(decoder.finish(&mut store).unwrap());

        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn rejects_format_level_mismatch() {
        let pad_bytes = pad(2048);
        let mut store = PadRecordsStore::open("-").unwrap();

        let mut dec_session =
            PadSession::new(Cursor::new(pad_bytes), 2048, true, Box::new(SeededRandom::new())).unwrap();
        dec_session.register(&mut store).unwrap();
        dec_session.prepare_for_decryption(FormatLevel::Internal).unwrap();
        assert!(matches!(
            StreamDecoder::new(dec_session, FormatLevel::Original),
            Err(crate::Error::FormatLevel(_))
        ));
    }

    #[test]
    fn rejects_unprepared_session() {
        let pad_bytes = pad(2048);
        let mut store = PadRecordsStore::open("-").unwrap();

        let mut dec_session =
            PadSession::new(Cursor::new(pad_bytes), 2048, true, Box::new(SeededRandom::new())).unwrap();
        dec_session.register(&mut store).unwrap();
        assert!(matches!(
            StreamDecoder::new(dec_session, FormatLevel::Internal),
            Err(crate::Error::FormatLevel(_))
        ));
    }
}
