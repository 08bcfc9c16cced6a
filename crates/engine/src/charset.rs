//! Charset fallback chain for inbound control bytes.
//!
//! UTF-8 is attempted first. An invalid sequence degrades the session to
//! the per-server custom charset (when one is declared), then Latin-1 as
//! the last resort; the degrade is persistent for the rest of the session
//! unless the server was explicitly declared UTF-8.

use encoding_rs::Encoding;
use xfer_core::EncodingType;

/// Outcome flag of a conversion, telling the socket whether to emit the
/// one-time degrade notice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConversionNote {
    /// Converted without incident.
    Clean,
    /// UTF-8 was just disabled for the remainder of the session.
    DegradedNow,
}

/// Ordered list of converters with a persistent degrade flag.
#[derive(Debug)]
pub struct CharsetConverter {
    use_utf8: bool,
    declared_utf8: bool,
    custom: Option<&'static Encoding>,
}

impl CharsetConverter {
    /// Builds the chain for a server's declared encoding.
    #[must_use]
    pub fn new(encoding: &EncodingType) -> Self {
        let custom = match encoding {
            EncodingType::Custom(label) => Encoding::for_label(label.as_bytes()),
            _ => None,
        };
        Self {
            use_utf8: true,
            declared_utf8: matches!(encoding, EncodingType::Utf8),
            custom,
        }
    }

    /// Whether UTF-8 is still the active converter.
    #[must_use]
    pub fn uses_utf8(&self) -> bool {
        self.use_utf8
    }

    /// Converts inbound bytes to text, degrading on invalid UTF-8.
    pub(crate) fn to_local(&mut self, bytes: &[u8]) -> (String, ConversionNote) {
        let mut note = ConversionNote::Clean;
        if self.use_utf8 {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return (text.to_owned(), note);
            }
            if !self.declared_utf8 {
                self.use_utf8 = false;
                note = ConversionNote::DegradedNow;
            }
        }
        if let Some(encoding) = self.custom {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
            {
                return (text.into_owned(), note);
            }
        }
        // Latin-1 maps every byte; the chain always terminates here.
        (bytes.iter().map(|&b| char::from(b)).collect(), note)
    }

    /// Converts outbound text to server bytes.
    #[must_use]
    pub fn to_server(&self, text: &str, force_utf8: bool) -> Vec<u8> {
        if self.use_utf8 || force_utf8 {
            return text.as_bytes().to_vec();
        }
        if let Some(encoding) = self.custom {
            let (encoded, _, _) = encoding.encode(text);
            return encoded.into_owned();
        }
        text.chars()
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect()
    }
}
