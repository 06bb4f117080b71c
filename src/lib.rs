//! A pad-session engine for one-time-pad message encryption.
//!
//! This crate implements the hard part of a one-time-pad messaging
//! tool: a length-hiding, authenticated wire format layered on top of
//! raw pad XOR, the bookkeeping that keeps a pad from ever being
//! reused for encryption, and the streaming compression/armor
//! pipeline that ties it all together.
//!
//! It does not implement a command-line front-end, pad generation, or
//! any transport for moving pads between parties; those are the
//! responsibility of callers. This crate assumes it is handed:
//!
//! - a pad: a read-only, seekable byte source of known length;
//! - a pad-records store location (a path, or `"-"` for an ephemeral,
//!   ignore-everything store);
//! - plaintext or ciphertext to push through [`session::PadSession`],
//!   [`stream::StreamEncoder`], or [`stream::StreamDecoder`].
//!
//! See [`session`] for the core state machine, [`pad::store`] for the
//! pad-usage bookkeeping, [`stream`] for the compression/armor
//! pipeline, and [`armor`] for the plaintext message framing.

#![warn(missing_docs)]

pub mod armor;
pub mod pad;
pub mod random;
pub mod session;
pub mod stream;

/// Crate result specialization.
///
/// Unlike a typical application crate, this engine's errors must
/// remain programmatically distinguishable at the API boundary (a
/// caller needs to tell a digest failure from pad exhaustion from a
/// configuration error), so this is a concrete [`Error`], not an
/// opaque boxed error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by this crate.
///
/// This enum is deliberately flat: every failure mode gets its own
/// variant with a descriptive payload, rather than a hierarchy of
/// nested error types. New variants may be added in non-breaking
/// releases, so callers should not exhaustively match without a
/// wildcard arm.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The pad-records store is in an impossible or inconsistent
    /// state (both legacy and current identifiers present, a leftover
    /// intermediate save file, incoherent used ranges).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The pad does not have enough remaining bytes to satisfy a
    /// header, fuzz, body, or digest read.
    #[error("pad too short: {0}")]
    PadTooShort(String),

    /// A [`session::PadSession`] was prepared twice, or prepared for
    /// both encryption and decryption.
    #[error("pad session over-prepared: {0}")]
    OverPrepared(String),

    /// A [`session::PadSession`] was used before it was prepared or
    /// given a starting offset.
    #[error("pad session uninitialized: {0}")]
    Uninitialized(String),

    /// An unknown or internally inconsistent format level was
    /// requested (`"original"` vs. `"internal"`).
    #[error("format level error: {0}")]
    FormatLevel(String),

    /// The inner header carried an unsupported format version or had
    /// reserved flag bits set.
    #[error("inner format error: {0}")]
    InnerFormat(String),

    /// The amount of tail fuzz recovered did not match the amount
    /// promised by the inner header.
    #[error("fuzz length mismatch: {0}")]
    FuzzMismatch(String),

    /// The embedded message digest did not match the digest computed
    /// over the recovered plaintext.
    #[error("digest mismatch")]
    DigestMismatch,

    /// The plaintext armor (begin/end markers, headers) was malformed
    /// or used an unknown `Format:` value.
    #[error("malformed armor: {0}")]
    MalformedArmor(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Base64 decoding of the ciphertext body failed.
    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// An I/O error occurred reading the pad or the pad-records store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
