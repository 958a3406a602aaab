use encoding_rs::{CoderResult, DecoderResult, Encoding, BIG5, GBK, UTF_16BE, UTF_16LE, WINDOWS_1252};
use std::fmt;
use thiserror::Error;

pub const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown encoding label: {0}")]
    UnknownLabel(String),
    #[error("malformed {codec} input at byte {offset}")]
    Malformed { codec: String, offset: usize },
    #[error("{codec} cannot represent {ch:?}")]
    Unmappable { codec: String, ch: char },
    #[error("writing {0} is not supported")]
    EncodeUnsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Strict,
    Replace,
}

/// A named text encoding.
///
/// Most encodings are backed by `encoding_rs`; the ones the WHATWG label table folds into
/// something else (true ISO-8859-1, ASCII, UTF-32, BOM-sniffing UTF-16) are handled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Utf8,
    Utf8Sig,
    Ascii,
    Latin1,
    Utf16,
    Utf32,
    Utf32Le,
    Utf32Be,
    Web(&'static Encoding),
}

impl Codec {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");

        let codec = match normalized.as_str() {
            "utf-8" | "utf8" => Self::Utf8,
            "utf-8-sig" | "utf8-sig" => Self::Utf8Sig,
            "ascii" | "us-ascii" => Self::Ascii,
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" | "l1" => Self::Latin1,
            "utf-16" | "utf16" => Self::Utf16,
            "utf-32" | "utf32" => Self::Utf32,
            "utf-32le" => Self::Utf32Le,
            "utf-32be" => Self::Utf32Be,
            "cp936" | "gb2312" => Self::Web(GBK),
            "cp950" | "big5-hkscs" | "big5hkscs" => Self::Web(BIG5),
            "cp1252" => Self::Web(WINDOWS_1252),
            other => {
                let encoding = Encoding::for_label(other.as_bytes())?;
                if encoding == encoding_rs::REPLACEMENT {
                    return None;
                }
                Self::Web(encoding)
            }
        };

        Some(codec)
    }

    pub fn parse(label: &str) -> Result<Self, CodecError> {
        Self::from_label(label).ok_or_else(|| CodecError::UnknownLabel(label.to_string()))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Utf8 => "utf-8".to_string(),
            Self::Utf8Sig => "utf-8-sig".to_string(),
            Self::Ascii => "ascii".to_string(),
            Self::Latin1 => "latin1".to_string(),
            Self::Utf16 => "utf-16".to_string(),
            Self::Utf32 => "utf-32".to_string(),
            Self::Utf32Le => "utf-32le".to_string(),
            Self::Utf32Be => "utf-32be".to_string(),
            Self::Web(encoding) => encoding.name().to_ascii_lowercase(),
        }
    }

    /// Decode `bytes` into a `String`.
    ///
    /// With `last == false` the input is treated as a prefix of a longer stream: an incomplete
    /// sequence at the very end is dropped instead of being reported as malformed.
    pub fn decode(&self, bytes: &[u8], mode: DecodeMode, last: bool) -> Result<String, CodecError> {
        match self {
            Self::Utf8 => decode_utf8(bytes, mode, last),
            Self::Utf8Sig => decode_utf8(bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes), mode, last),
            Self::Ascii => decode_ascii(bytes, mode),
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Self::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => decode_web(UTF_16BE, rest, mode, last),
                [0xFF, 0xFE, rest @ ..] => decode_web(UTF_16LE, rest, mode, last),
                _ => decode_web(UTF_16LE, bytes, mode, last),
            },
            Self::Utf32 => match bytes {
                [0x00, 0x00, 0xFE, 0xFF, rest @ ..] => decode_utf32(rest, true, mode, last),
                [0xFF, 0xFE, 0x00, 0x00, rest @ ..] => decode_utf32(rest, false, mode, last),
                _ => decode_utf32(bytes, false, mode, last),
            },
            Self::Utf32Le => decode_utf32(bytes, false, mode, last),
            Self::Utf32Be => decode_utf32(bytes, true, mode, last),
            Self::Web(encoding) => decode_web(encoding, bytes, mode, last),
        }
    }

    /// Encode `text` strictly: characters the codec cannot represent are an error.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf8Sig => Ok(b"\xEF\xBB\xBF".iter().chain(text.as_bytes()).copied().collect()),
            Self::Ascii => encode_narrow(text, 0x7F, self),
            Self::Latin1 => encode_narrow(text, 0xFF, self),
            Self::Web(encoding) if encoding.output_encoding() == *encoding => {
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    let ch = text
                        .chars()
                        .find(|c| encoding.encode(c.encode_utf8(&mut [0; 4])).2)
                        .unwrap_or(REPLACEMENT);
                    return Err(CodecError::Unmappable { codec: self.name(), ch });
                }
                Ok(bytes.into_owned())
            }
            _ => Err(CodecError::EncodeUnsupported(self.name())),
        }
    }

    pub fn can_encode(&self) -> bool {
        self.encode("").is_ok()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

pub fn count_replacements(text: &str) -> usize {
    text.chars().filter(|&c| c == REPLACEMENT).count()
}

fn decode_utf8(bytes: &[u8], mode: DecodeMode, last: bool) -> Result<String, CodecError> {
    let bytes = if last { bytes } else { trim_incomplete_utf8(bytes) };
    match mode {
        DecodeMode::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DecodeMode::Strict => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| CodecError::Malformed {
                codec: "utf-8".to_string(),
                offset: e.valid_up_to(),
            }),
    }
}

/// Drop a trailing, truncated UTF-8 sequence so a byte prefix can be decoded on its own.
pub fn trim_incomplete_utf8(bytes: &[u8]) -> &[u8] {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => &bytes[..e.valid_up_to()],
        _ => bytes,
    }
}

fn decode_ascii(bytes: &[u8], mode: DecodeMode) -> Result<String, CodecError> {
    match (mode, bytes.iter().position(|b| !b.is_ascii())) {
        (_, None) => Ok(bytes.iter().map(|&b| b as char).collect()),
        (DecodeMode::Strict, Some(offset)) => Err(CodecError::Malformed {
            codec: "ascii".to_string(),
            offset,
        }),
        (DecodeMode::Replace, Some(_)) => Ok(bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { REPLACEMENT })
            .collect()),
    }
}

fn decode_utf32(bytes: &[u8], big_endian: bool, mode: DecodeMode, last: bool) -> Result<String, CodecError> {
    let usable = if last { bytes.len() } else { bytes.len() - bytes.len() % 4 };
    let (body, tail) = bytes[..usable].split_at(usable - usable % 4);
    let codec = if big_endian { "utf-32be" } else { "utf-32le" };

    let mut out = String::with_capacity(body.len() / 4);
    for (i, chunk) in body.chunks_exact(4).enumerate() {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let value = if big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };
        match (char::from_u32(value), mode) {
            (Some(c), _) => out.push(c),
            (None, DecodeMode::Replace) => out.push(REPLACEMENT),
            (None, DecodeMode::Strict) => {
                return Err(CodecError::Malformed {
                    codec: codec.to_string(),
                    offset: i * 4,
                })
            }
        }
    }

    match (tail.is_empty(), mode) {
        (true, _) => Ok(out),
        (false, DecodeMode::Replace) => {
            out.push(REPLACEMENT);
            Ok(out)
        }
        (false, DecodeMode::Strict) => Err(CodecError::Malformed {
            codec: codec.to_string(),
            offset: body.len(),
        }),
    }
}

fn decode_web(
    encoding: &'static Encoding,
    bytes: &[u8],
    mode: DecodeMode,
    last: bool,
) -> Result<String, CodecError> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let malformed = |offset| CodecError::Malformed {
        codec: encoding.name().to_ascii_lowercase(),
        offset,
    };

    match mode {
        DecodeMode::Strict => {
            let capacity = decoder
                .max_utf8_buffer_length_without_replacement(bytes.len())
                .ok_or_else(|| malformed(0))?;
            let mut out = String::with_capacity(capacity);
            let (result, read) = decoder.decode_to_string_without_replacement(bytes, &mut out, last);
            match result {
                DecoderResult::InputEmpty => Ok(out),
                DecoderResult::Malformed(_, _) | DecoderResult::OutputFull => Err(malformed(read)),
            }
        }
        DecodeMode::Replace => {
            let capacity = decoder
                .max_utf8_buffer_length(bytes.len())
                .ok_or_else(|| malformed(0))?;
            let mut out = String::with_capacity(capacity);
            let (result, read, _) = decoder.decode_to_string(bytes, &mut out, last);
            match result {
                CoderResult::InputEmpty => Ok(out),
                CoderResult::OutputFull => Err(malformed(read)),
            }
        }
    }
}

fn encode_narrow(text: &str, max: u32, codec: &Codec) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|ch| match u32::from(ch) {
            value if value <= max => Ok(value as u8),
            _ => Err(CodecError::Unmappable {
                codec: codec.name(),
                ch,
            }),
        })
        .collect()
}
