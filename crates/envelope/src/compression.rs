//! Payload compression.
//!
//! The only algorithm is raw DEFLATE (`zip: "DEF"`). Compression is skipped for payloads below
//! the configured floor; the decision travels with the envelope as the presence or absence of
//! the `zip` header, so the decoder never has to guess.
//!
//! ## Security
//!
//! - Inflation stops at a configured maximum output size
//! - Unknown `zip` values are rejected rather than ignored

use crate::constants::ZIP_DEFLATE;
use crate::{EnvelopeError, EnvelopeResult};
use flate2::write::DeflateEncoder;
use flate2::{Decompress, FlushDecompress, Status};
use std::io::Write;

const INFLATE_CHUNK: usize = 16 * 1024;

/// Compression policy requested for a seal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Deflate,
}

impl Compression {
    /// Header value, or `None` when nothing is recorded.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Deflate => Some(ZIP_DEFLATE),
        }
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::CompressionError`] for unknown `zip` values.
    pub fn from_header(value: Option<&str>) -> EnvelopeResult<Self> {
        match value {
            None => Ok(Self::None),
            Some(ZIP_DEFLATE) => Ok(Self::Deflate),
            Some(other) => Err(EnvelopeError::CompressionError(format!(
                "unsupported zip algorithm '{other}'"
            ))),
        }
    }
}

/// Apply `policy` unless `payload` is shorter than `floor`.
///
/// Returns the (possibly unchanged) bytes and the algorithm actually applied.
pub(crate) fn compress(
    payload: Vec<u8>,
    policy: Compression,
    floor: usize,
) -> EnvelopeResult<(Vec<u8>, Compression)> {
    if policy == Compression::None || payload.len() < floor {
        return Ok((payload, Compression::None));
    }
    let compressed = deflate(&payload)?;
    tracing::debug!(
        original = payload.len(),
        compressed = compressed.len(),
        "deflated payload"
    );
    Ok((compressed, Compression::Deflate))
}

/// Undo [`compress`].
///
/// With `sniff` set, a payload without a `zip` header is inflated if it is valid DEFLATE data
/// and used as-is otherwise.
pub(crate) fn decompress(
    payload: Vec<u8>,
    applied: Compression,
    sniff: bool,
    max_size: usize,
) -> EnvelopeResult<Vec<u8>> {
    match applied {
        Compression::Deflate => inflate(&payload, max_size),
        Compression::None if sniff => match inflate(&payload, max_size) {
            Ok(inflated) => Ok(inflated),
            Err(_) => {
                tracing::debug!("unflagged payload is not deflate data; using it unchanged");
                Ok(payload)
            }
        },
        Compression::None => Ok(payload),
    }
}

pub(crate) fn deflate(bytes: &[u8]) -> EnvelopeResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| EnvelopeError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EnvelopeError::CompressionError(e.to_string()))
}

/// Inflate a complete raw DEFLATE stream.
///
/// Truncated streams and trailing bytes are errors, so a payload that merely starts with
/// plausible DEFLATE bits is not mistaken for compressed data.
pub(crate) fn inflate(bytes: &[u8], max_size: usize) -> EnvelopeResult<Vec<u8>> {
    let corrupt =
        |reason: String| EnvelopeError::CompressionError(format!("inflate failed: {reason}"));
    let too_large = || {
        EnvelopeError::CompressionError(format!("inflated payload exceeds {max_size} bytes"))
    };

    let mut decoder = Decompress::new(false);
    let mut output: Vec<u8> = Vec::with_capacity(INFLATE_CHUNK);

    loop {
        if output.len() > max_size {
            return Err(too_large());
        }
        if output.capacity() - output.len() < INFLATE_CHUNK {
            output.reserve(INFLATE_CHUNK);
        }

        let before = (decoder.total_in(), decoder.total_out());
        let consumed = usize::try_from(decoder.total_in())
            .map_err(|_| corrupt("input offset overflow".into()))?;
        let status = decoder
            .decompress_vec(&bytes[consumed..], &mut output, FlushDecompress::Finish)
            .map_err(|e| corrupt(e.to_string()))?;

        if matches!(status, Status::StreamEnd) {
            break;
        }
        if (decoder.total_in(), decoder.total_out()) == before {
            return Err(corrupt("truncated stream".into()));
        }
    }

    if output.len() > max_size {
        return Err(too_large());
    }
    if decoder.total_in() != bytes.len() as u64 {
        return Err(corrupt("trailing bytes after end of stream".into()));
    }
    Ok(output)
}
