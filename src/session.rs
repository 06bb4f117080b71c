//! The pad session state machine.
//!
//! A [`PadSession`] owns a positioned pad reader and drives the
//! inner-header wire format: it produces or consumes the fuzz
//! regions, maintains the running integrity hash, and performs the
//! byte-wise pad XOR that is the actual "encryption". It registers
//! with a [`crate::pad::store::PadRecordsStore`] to establish its
//! starting offset, and records its consumption when finished.
//!
//! A session is single-use: construct, register with a store (always,
//! for both encrypting and decrypting sessions), optionally override
//! the resulting offset with an explicit one, prepare for encryption
//! or decryption exactly once, call [`PadSession::convert`] one or
//! more times, then [`PadSession::finish`]. Deviating from that order
//! is a programming error, reported via [`crate::Error::Uninitialized`]
//! or [`crate::Error::OverPrepared`].

use std::io::{Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

use crate::pad::store::PadRecordsStore;
use crate::pad::{current_identifier, legacy_identifier, ID_SOURCE_LENGTH};
use crate::random::RandomSource;
use crate::{Error, Result};

/// Length, in bytes, of the embedded message digest.
pub const DIGEST_LENGTH: u64 = 32;

/// Number of contiguous raw pad bytes used as the hash seed.
const DIGEST_SOURCE_LENGTH: u64 = 32;

/// Number of raw pad bytes consulted to derive each fuzz length.
const DEFAULT_FUZZ_SOURCE_LENGTH: u64 = 2;

/// Modulus applied to the fuzz length source bytes.
const DEFAULT_FUZZ_SOURCE_MODULO: u64 = 512;

/// Which direction a [`PadSession`] is converting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Encrypting,
    Decrypting,
}

/// The wire format level a session is operating at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatLevel {
    /// Legacy OneTime 1.x format: no inner header, no fuzz, no
    /// digest. Read-only; encryption at this level is unsupported.
    Original,
    /// The format specified here: inner header, fuzz, and digest.
    Internal,
}

/// Decode-side progress through the inner header.
///
/// The fixed-prefix fields (`format_version`, `flags`) and the head
/// fuzz region are the only parts of the inner header actually
/// carried on the wire; the two fuzz-length-source placeholders are
/// present in the ciphertext stream but never inspected (both sides
/// derive the same lengths independently from their synchronized pad
/// position), and the hash seed is never transmitted at all. See
/// `DESIGN.md` for how this was resolved against the original
/// implementation.
///
/// This state machine advances by as little as one byte per call to
/// [`PadSession::convert`], so an arbitrarily short initial chunk is
/// tolerated rather than assumed away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderPhase {
    Version,
    Flags,
    SkipFuzzSourcePlaceholders { remaining: u8 },
    HeadFuzz { remaining: u64 },
    Done,
}

/// The pad-session engine: see the module documentation.
pub struct PadSession<P> {
    pad: P,
    pad_size: u64,
    current_id: String,
    legacy_id: String,
    no_trace: bool,
    random: Box<dyn RandomSource>,

    registered: bool,
    offset: Option<u64>,
    length: u64,
    role: Option<Role>,
    format_level: Option<FormatLevel>,

    hash: Option<Sha256>,
    header_phase: HeaderPhase,
    pending_head_fuzz_len: Option<u64>,
    tail_fuzz_length: Option<u64>,
    tail_buffer: Vec<u8>,
    head_output_buffer: Vec<u8>,
    begun: bool,
}

impl<P: Read + Seek> PadSession<P> {
    /// Opens a new pad session over `pad`, a reader of `pad_size`
    /// bytes. Computes both the current and legacy identifiers
    /// up-front (this requires the pad to be at least 1024 bytes
    /// long, the legacy identifier's source stretch).
    ///
    /// The session cannot be used for conversion until
    /// [`PadSession::register`] has been called (always, for both
    /// encrypting and decrypting sessions) and, optionally,
    /// [`PadSession::set_offset`] afterward to override the offset
    /// `register` established, followed by
    /// [`PadSession::prepare_for_encryption`] or
    /// [`PadSession::prepare_for_decryption`].
    pub fn new(
        mut pad: P,
        pad_size: u64,
        no_trace: bool,
        random: Box<dyn RandomSource>,
    ) -> Result<Self> {
        let current_id = current_identifier(&mut pad)?;
        let legacy_id = legacy_identifier(&mut pad)?;
        Ok(Self {
            pad,
            pad_size,
            current_id,
            legacy_id,
            no_trace,
            random,
            registered: false,
            offset: None,
            length: 0,
            role: None,
            format_level: None,
            hash: None,
            header_phase: HeaderPhase::Done,
            pending_head_fuzz_len: None,
            tail_fuzz_length: None,
            tail_buffer: Vec::new(),
            head_output_buffer: Vec::new(),
            begun: false,
        })
    }

    /// This session's current-format pad identifier.
    pub fn id(&self) -> &str {
        &self.current_id
    }

    /// This session's legacy-format pad identifier.
    pub fn legacy_id(&self) -> &str {
        &self.legacy_id
    }

    /// The offset this session started converting from.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// The number of pad bytes consumed so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The format level this session was prepared at, or `None` if it
    /// has not been prepared yet.
    pub fn format_level(&self) -> Option<FormatLevel> {
        self.format_level
    }

    /// Registers this session's pad with `store`, upgrading a legacy
    /// record if one is found, and sets the offset to the next free
    /// offset the store reports.
    ///
    /// This must be called exactly once on every session, encrypting
    /// or decrypting alike, before preparing it: it is what performs
    /// the legacy-to-current identifier upgrade and the "both
    /// identifiers present" consistency check (see
    /// [`PadRecordsStore::register`]), so skipping it for a
    /// session that already knows its starting offset (for example,
    /// one parsed from an incoming message's `Offset:` header) would
    /// leave that pad's bookkeeping un-upgraded. A caller with an
    /// explicit starting offset instead calls [`PadSession::set_offset`]
    /// afterward, to override the offset `register` established.
    pub fn register(&mut self, store: &mut PadRecordsStore) -> Result<()> {
        let offset = store.register(&self.current_id, &self.legacy_id)?;
        self.registered = true;
        self.apply_offset(offset)
    }

    /// Overrides this session's starting offset, established by an
    /// earlier call to [`PadSession::register`], with an explicit
    /// value.
    ///
    /// `offset` must be at least [`ID_SOURCE_LENGTH`] (the reserved
    /// identifier stretch is never encroached on) and less than the
    /// pad's size. [`PadSession::register`] must have been called
    /// first; calling this beforehand is a programming error, since
    /// it would bypass the store's legacy-upgrade and consistency
    /// check.
    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        if !self.registered {
            return Err(Error::Uninitialized(
                "pad session must be registered with a pad-records store \
                 (PadSession::register) before its offset may be set or \
                 overridden"
                    .into(),
            ));
        }
        self.apply_offset(offset)
    }

    fn apply_offset(&mut self, offset: u64) -> Result<()> {
        if offset < ID_SOURCE_LENGTH {
            return Err(Error::Configuration(format!(
                "offset must be >= {ID_SOURCE_LENGTH} (the reserved identifier stretch)"
            )));
        }
        if offset >= self.pad_size {
            return Err(Error::PadTooShort(
                "offset exceeds pad size, need more pad".into(),
            ));
        }
        self.pad.seek(SeekFrom::Start(offset))?;
        self.offset = Some(offset);
        Ok(())
    }

    /// Marks this session as encrypting and emits the inner header to
    /// be prepended to the first [`PadSession::convert`] output.
    ///
    /// Must be called exactly once, and not combined with
    /// [`PadSession::prepare_for_decryption`] on the same session.
    pub fn prepare_for_encryption(&mut self) -> Result<()> {
        self.ensure_not_prepared()?;
        self.role = Some(Role::Encrypting);
        self.format_level = Some(FormatLevel::Internal);

        let version_pad = self.read_pad(1)?[0];
        let version_cipher = 0u8 ^ version_pad;
        let flags_pad = self.read_pad(1)?[0];
        let flags_cipher = 0u8 ^ flags_pad;

        let (head_len, head_src) = self.fuzz_length_from_pad()?;
        let (tail_len, tail_src) = self.fuzz_length_from_pad()?;
        self.tail_fuzz_length = Some(tail_len);

        self.initialize_hash()?;
        let head_fuzz = self.make_fuzz(head_len, true)?;

        let mut header = Vec::with_capacity(2 + head_src.len() + tail_src.len() + head_fuzz.len());
        header.push(version_cipher);
        header.push(flags_cipher);
        header.extend(head_src);
        header.extend(tail_src);
        header.extend(head_fuzz);
        self.head_output_buffer = header;
        Ok(())
    }

    /// Marks this session as decrypting at the given format level.
    ///
    /// Must be called exactly once, and not combined with
    /// [`PadSession::prepare_for_encryption`] on the same session.
    pub fn prepare_for_decryption(&mut self, level: FormatLevel) -> Result<()> {
        self.ensure_not_prepared()?;
        self.role = Some(Role::Decrypting);
        self.format_level = Some(level);
        if level == FormatLevel::Internal {
            self.header_phase = HeaderPhase::Version;
        }
        Ok(())
    }

    fn ensure_not_prepared(&self) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::OverPrepared(
                "pad session may only be prepared once".into(),
            ));
        }
        Ok(())
    }

    /// Feeds `data` into the running integrity hash directly, without
    /// consuming any pad.
    ///
    /// Callers push plaintext here: the encoder pushes a chunk before
    /// compressing it, the decoder pushes a chunk after decompressing
    /// it, so both sides hash the same bytes in the same order.
    pub fn digest_gulp(&mut self, data: &[u8]) {
        if let Some(hash) = self.hash.as_mut() {
            hash.update(data);
        }
    }

    /// Converts `chunk`, returning ciphertext (encrypting) or
    /// recovered compressed plaintext (decrypting), or an empty
    /// vector if `chunk` was entirely absorbed into header parsing or
    /// tail buffering without producing output yet.
    pub fn convert(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        if self.offset.is_none() {
            return Err(Error::Uninitialized(
                "pad session not yet initialized (no offset)".into(),
            ));
        }
        match self.role {
            None => Err(Error::Uninitialized(
                "pad session not yet prepared for either encrypting or decrypting".into(),
            )),
            Some(Role::Encrypting) => self.convert_encrypt(chunk),
            Some(Role::Decrypting) => self.convert_decrypt(chunk),
        }
    }

    fn convert_encrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let pad_bytes = self.read_pad(chunk.len())?;
        let mut out: Vec<u8> = chunk.iter().zip(pad_bytes.iter()).map(|(c, p)| c ^ p).collect();
        self.begun = true;
        if !self.head_output_buffer.is_empty() {
            let mut result = std::mem::take(&mut self.head_output_buffer);
            result.append(&mut out);
            Ok(result)
        } else {
            Ok(out)
        }
    }

    fn convert_decrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        match self.format_level {
            Some(FormatLevel::Original) => self.convert_decrypt_original(chunk),
            Some(FormatLevel::Internal) => self.convert_decrypt_internal(chunk),
            None => unreachable!("role implies format_level is set"),
        }
    }

    fn convert_decrypt_original(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let pad_bytes = self.read_pad(chunk.len())?;
        self.begun = true;
        Ok(chunk.iter().zip(pad_bytes.iter()).map(|(c, p)| c ^ p).collect())
    }

    fn convert_decrypt_internal(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut rest = chunk;
        if self.header_phase != HeaderPhase::Done {
            let consumed = self.feed_decrypt_header(rest)?;
            rest = &rest[consumed..];
            if self.header_phase != HeaderPhase::Done {
                return Ok(Vec::new());
            }
        }
        self.begun = true;

        let tail_fuzz_len = self
            .tail_fuzz_length
            .expect("set once the header phase reaches Done");
        let reserve = (DIGEST_LENGTH + tail_fuzz_len) as usize;

        self.tail_buffer.extend_from_slice(rest);
        if self.tail_buffer.len() <= reserve {
            return Ok(Vec::new());
        }

        let emit_len = self.tail_buffer.len() - reserve;
        let emitted: Vec<u8> = self.tail_buffer.drain(..emit_len).collect();
        let pad_bytes = self.read_pad(emitted.len())?;
        Ok(emitted.iter().zip(pad_bytes.iter()).map(|(c, p)| c ^ p).collect())
    }

    /// Advances decode-side inner header parsing using as much of
    /// `chunk` as is available, returning how many bytes were
    /// consumed from it. May consume zero bytes (if called again
    /// after [`HeaderPhase::Done`]) or fewer than `chunk.len()` (if
    /// the header finishes partway through).
    fn feed_decrypt_header(&mut self, chunk: &[u8]) -> Result<usize> {
        let mut pos = 0usize;
        loop {
            match self.header_phase {
                HeaderPhase::Done => break,
                HeaderPhase::Version => {
                    if pos >= chunk.len() {
                        break;
                    }
                    let pad_byte = self.read_pad(1)?[0];
                    let version = chunk[pos] ^ pad_byte;
                    pos += 1;
                    if version != 0 {
                        return Err(Error::InnerFormat(format!(
                            "unknown inner format version {version}"
                        )));
                    }
                    self.header_phase = HeaderPhase::Flags;
                }
                HeaderPhase::Flags => {
                    if pos >= chunk.len() {
                        break;
                    }
                    let pad_byte = self.read_pad(1)?[0];
                    let flags = chunk[pos] ^ pad_byte;
                    pos += 1;
                    if flags & 0x01 != 0 {
                        return Err(Error::InnerFormat(
                            "sender-chosen fuzz length is not supported".into(),
                        ));
                    }
                    if flags & !0x01 != 0 {
                        return Err(Error::InnerFormat(format!(
                            "reserved flag bits set: {flags:#010b}"
                        )));
                    }

                    let (head_len, _) = self.fuzz_length_from_pad()?;
                    let (tail_len, _) = self.fuzz_length_from_pad()?;
                    self.tail_fuzz_length = Some(tail_len);
                    self.initialize_hash()?;

                    self.pending_head_fuzz_len = Some(head_len);
                    self.header_phase = HeaderPhase::SkipFuzzSourcePlaceholders {
                        remaining: (2 * DEFAULT_FUZZ_SOURCE_LENGTH) as u8,
                    };
                }
                HeaderPhase::SkipFuzzSourcePlaceholders { remaining } => {
                    if remaining == 0 {
                        let head_len = self.pending_head_fuzz_len.take().unwrap_or(0);
                        self.header_phase = HeaderPhase::HeadFuzz { remaining: head_len };
                        continue;
                    }
                    if pos >= chunk.len() {
                        break;
                    }
                    pos += 1;
                    self.header_phase = HeaderPhase::SkipFuzzSourcePlaceholders {
                        remaining: remaining - 1,
                    };
                }
                HeaderPhase::HeadFuzz { remaining } => {
                    if remaining == 0 {
                        self.header_phase = HeaderPhase::Done;
                        continue;
                    }
                    if pos >= chunk.len() {
                        break;
                    }
                    let pad_byte = self.read_pad(1)?[0];
                    let raw = chunk[pos] ^ pad_byte;
                    self.digest_gulp(&[raw]);
                    pos += 1;
                    self.header_phase = HeaderPhase::HeadFuzz { remaining: remaining - 1 };
                }
            }
        }
        Ok(pos)
    }

    /// Finalizes the session: emits the digest and tail fuzz
    /// (encrypting) or verifies them (decrypting), then records pad
    /// consumption with `store` and saves it, unless this session was
    /// constructed with `no_trace`.
    pub fn finish(&mut self, store: &mut PadRecordsStore) -> Result<Vec<u8>> {
        let offset = self.offset.ok_or_else(|| {
            Error::Uninitialized("pad session not yet initialized (no offset)".into())
        })?;

        let (remainder, allow_overlap) = match self.role {
            Some(Role::Encrypting) => (self.finish_encrypt()?, false),
            Some(Role::Decrypting) => (self.finish_decrypt()?, true),
            None => {
                return Err(Error::Uninitialized(
                    "pad session out of whack: neither encrypting nor decrypting".into(),
                ))
            }
        };

        store.record_consumed(&self.current_id, offset, self.length, allow_overlap)?;
        if !self.no_trace {
            store.save()?;
        }
        Ok(remainder)
    }

    fn finish_encrypt(&mut self) -> Result<Vec<u8>> {
        let tail_len = self.tail_fuzz_length.ok_or_else(|| {
            Error::Uninitialized("tail fuzz length never initialized".into())
        })?;
        let hash = self
            .hash
            .take()
            .ok_or_else(|| Error::Uninitialized("session hash never initialized".into()))?;
        let digest = hash.finalize();
        let mut out = self.convert_encrypt(&digest)?;
        out.extend(self.make_fuzz(tail_len, false)?);
        Ok(out)
    }

    fn finish_decrypt(&mut self) -> Result<Vec<u8>> {
        match self.format_level {
            Some(FormatLevel::Original) => Ok(Vec::new()),
            Some(FormatLevel::Internal) => {
                self.verify_digest()?;
                self.verify_tail_fuzz()?;
                Ok(Vec::new())
            }
            None => Err(Error::Uninitialized("pad session never prepared".into())),
        }
    }

    fn verify_digest(&mut self) -> Result<()> {
        if (self.tail_buffer.len() as u64) < DIGEST_LENGTH {
            return Err(Error::FuzzMismatch(
                "ciphertext ended before the message digest".into(),
            ));
        }
        let pad_bytes = self.read_pad(DIGEST_LENGTH as usize)?;
        let received: Vec<u8> = self.tail_buffer[..DIGEST_LENGTH as usize]
            .iter()
            .zip(pad_bytes.iter())
            .map(|(c, p)| c ^ p)
            .collect();
        self.tail_buffer.drain(..DIGEST_LENGTH as usize);

        let hash = self
            .hash
            .take()
            .ok_or_else(|| Error::Uninitialized("session hash never initialized".into()))?;
        let computed = hash.finalize();
        if computed.as_slice() != received.as_slice() {
            return Err(Error::DigestMismatch);
        }
        Ok(())
    }

    fn verify_tail_fuzz(&mut self) -> Result<()> {
        let tail_len = self
            .tail_fuzz_length
            .expect("set once the header phase reaches Done");
        if self.tail_buffer.len() as u64 != tail_len {
            return Err(Error::FuzzMismatch(format!(
                "expected {} bytes of tail fuzz, found {}",
                tail_len,
                self.tail_buffer.len()
            )));
        }
        // The tail fuzz's content is never checked, only its length:
        // tampering inside it is allowed to go undetected by design.
        self.read_pad(tail_len as usize)?;
        self.tail_buffer.clear();
        Ok(())
    }

    fn initialize_hash(&mut self) -> Result<()> {
        if self.hash.is_some() {
            return Err(Error::OverPrepared(
                "pad session hash was prematurely initialized".into(),
            ));
        }
        let seed = self.read_pad(DIGEST_SOURCE_LENGTH as usize)?;
        let mut hasher = Sha256::new();
        hasher.update(&seed);
        self.hash = Some(hasher);
        Ok(())
    }

    fn fuzz_length_from_pad(&mut self) -> Result<(u64, Vec<u8>)> {
        let bytes = self.read_pad(DEFAULT_FUZZ_SOURCE_LENGTH as usize)?;
        let mut acc: u64 = 1;
        for &b in &bytes {
            acc *= b as u64;
        }
        Ok((acc % DEFAULT_FUZZ_SOURCE_MODULO, bytes))
    }

    fn make_fuzz(&mut self, n: u64, is_head_fuzz: bool) -> Result<Vec<u8>> {
        let raw = self.random.fill(n as usize);
        let pad_bytes = self.read_pad(n as usize)?;
        let masked: Vec<u8> = raw.iter().zip(pad_bytes.iter()).map(|(r, p)| r ^ p).collect();
        if is_head_fuzz {
            self.digest_gulp(&raw);
        }
        Ok(masked)
    }

    fn read_pad(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.pad.read_exact(&mut buf).map_err(|_| {
            Error::PadTooShort("not enough pad data available to continue".into())
        })?;
        self.length += n as u64;
        Ok(buf)
    }
}
