use encoding_rs::{CoderResult, Encoding as RsEncoding, UTF_8};
use std::borrow::Cow;
use std::fmt;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;
}

/// A text encoding for captured output, resolved from a WHATWG label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding(&'static RsEncoding);

impl Encoding {
    #[inline]
    pub fn utf8() -> Self {
        Encoding(UTF_8)
    }

    /// Resolve a label such as `"utf-8"`, `"latin1"` or `"shift_jis"`.
    /// Matching is case-insensitive and ignores surrounding whitespace.
    pub fn for_label(label: &str) -> Option<Self> {
        RsEncoding::for_label(label.trim().as_bytes()).map(Encoding)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.0.name()
    }

    #[inline]
    pub fn is_utf8(self) -> bool {
        self.0 == UTF_8
    }

    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        self.0
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Encoding").field(&self.name()).finish()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A one-shot decoder bound to one encoding.
///
/// Byte order marks are kept as regular characters; captured output is never
/// sniffed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    /// Start an incremental decode with the same encoding.
    pub fn stream(&self) -> StreamDecoder {
        StreamDecoder::new(self.enc)
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        if self.enc.is_utf8() {
            return match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            };
        }
        let (cow, _had_errors) = self.enc.as_encoding_rs().decode_without_bom_handling(bytes);
        cow
    }
}

/// Incremental decoder for bytes that arrive in arbitrary chunks.
///
/// A multi-byte sequence split across two `feed` calls is held back until its
/// continuation bytes arrive. `finish` flushes whatever is left, replacing an
/// incomplete tail with U+FFFD, and leaves the decoder ready for a new stream.
pub struct StreamDecoder {
    enc: Encoding,
    inner: encoding_rs::Decoder,
}

impl StreamDecoder {
    pub fn new(enc: Encoding) -> Self {
        Self {
            enc,
            inner: enc.as_encoding_rs().new_decoder_without_bom_handling(),
        }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    pub fn feed(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    pub fn finish(&mut self) -> String {
        let tail = self.run(&[], true);
        self.inner = self.enc.as_encoding_rs().new_decoder_without_bom_handling();
        tail
    }

    fn run(&mut self, mut src: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3) + 16);
            out.reserve(needed);
            let (result, read, _had_errors) = self.inner.decode_to_string(src, &mut out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

impl fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDecoder").field("enc", &self.enc).finish()
    }
}
