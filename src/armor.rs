//! The plaintext message framing around an armored body.
//!
//! This is distinct from the base64 line wrapping
//! ([`crate::stream::StreamEncoder`]/[`crate::stream::StreamDecoder`]
//! already produce wrapped text): this module only adds and parses
//! the enclosing begin/end markers and the small header block that
//! tells a reader which pad and offset a message was encrypted
//! against.

use crate::session::FormatLevel;
use crate::{Error, Result};

const BEGIN_CURRENT: &str = "-----BEGIN OneTime MESSAGE-----";
const END_CURRENT: &str = "-----END OneTime MESSAGE-----";
const BEGIN_LEGACY: &str = "-----BEGIN OTP MESSAGE-----";
const END_LEGACY: &str = "-----END OTP MESSAGE-----";

/// A parsed message: its header fields, and the still base64-encoded
/// body text.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// The format level the body was encoded at. Absent `Format:`
    /// implies [`FormatLevel::Original`].
    pub format: FormatLevel,
    /// The `Pad ID:` header, if present. Informational only: this
    /// crate never needs to consult it to decode, since it always
    /// computes the pad's identifier from the pad itself.
    pub pad_id: Option<String>,
    /// The `Offset:` header: where in the pad this message's session
    /// started.
    pub offset: u64,
    /// The armored body, with line breaks intact.
    pub body: String,
}

/// Renders the begin marker and header block that precedes an
/// armored body. New messages are always written at the internal
/// format level; `original` is a read-only compatibility level.
pub fn render_header(pad_id: &str, offset: u64) -> String {
    format!("{BEGIN_CURRENT}\nFormat: internal\nPad ID: {pad_id}\nOffset: {offset}\n\n")
}

/// Renders the end marker that follows an armored body.
pub fn render_footer() -> String {
    format!("{END_CURRENT}\n")
}

/// Parses a complete armored message, returning its header fields and
/// body text.
///
/// Both the current begin/end markers and the legacy
/// `-----BEGIN/END OTP MESSAGE-----` markers are accepted on input.
/// Header line order is not significant; the first blank line
/// terminates the header block. A missing `Format:` header implies
/// [`FormatLevel::Original`]; any value other than `internal` or
/// `original` is an error.
pub fn parse_message(input: &str) -> Result<ParsedMessage> {
    let mut lines = input.lines();

    let first = lines
        .next()
        .ok_or_else(|| Error::MalformedArmor("empty message".into()))?;
    if first.trim_end() != BEGIN_CURRENT && first.trim_end() != BEGIN_LEGACY {
        return Err(Error::MalformedArmor(format!(
            "missing begin marker, found: {first}"
        )));
    }

    let mut format: Option<String> = None;
    let mut pad_id: Option<String> = None;
    let mut offset: Option<u64> = None;
    let mut body = String::new();
    let mut in_body = false;
    let mut saw_end = false;

    for line in lines {
        if !in_body {
            if line.trim().is_empty() {
                in_body = true;
                continue;
            }
            if let Some(rest) = line.strip_prefix("Format:") {
                format = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("Pad ID:") {
                pad_id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("Offset:") {
                let rest = rest.trim();
                offset = Some(rest.parse().map_err(|_| {
                    Error::MalformedArmor(format!("invalid Offset: value {rest}"))
                })?);
            }
            // Unrecognized header lines are ignored rather than
            // rejected, for forward compatibility.
            continue;
        }

        let trimmed = line.trim_end();
        if trimmed == END_CURRENT || trimmed == END_LEGACY {
            saw_end = true;
            break;
        }
        body.push_str(line);
        body.push('\n');
    }

    if !saw_end {
        return Err(Error::MalformedArmor("missing end marker".into()));
    }

    let format_level = match format.as_deref() {
        None => FormatLevel::Original,
        Some("internal") => FormatLevel::Internal,
        Some("original") => FormatLevel::Original,
        Some(other) => {
            return Err(Error::MalformedArmor(format!("unknown Format: {other}")))
        }
    };

    let offset = offset.ok_or_else(|| Error::MalformedArmor("missing Offset: header".into()))?;

    Ok(ParsedMessage { format: format_level, pad_id, offset, body })
}
