use anyhow::{anyhow, Error};
use encoding_rs::Encoding;
use tracing::warn;

/// Converts the raw bytes of an object into UTF-8 before parsing.
pub trait Decoder: Send + Sync {
    fn decode(&self, data: Vec<u8>) -> Result<Vec<u8>, Error>;
}

/// Decodes text in a named encoding, e.g. `shift_jis` or `utf-16le`.
///
/// A byte order mark, when present, wins over the configured encoding and is stripped.
/// Malformed sequences are replaced with U+FFFD.
#[derive(Debug, Clone, Copy)]
pub struct TextDecoder {
    encoding: &'static Encoding,
}

impl TextDecoder {
    /// Look up an encoding by its WHATWG label.
    pub fn for_label(label: &str) -> Result<Self, Error> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| anyhow!("unknown encoding: {label}"))
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

impl Decoder for TextDecoder {
    fn decode(&self, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let (text, used, had_errors) = self.encoding.decode(&data);
        if had_errors {
            warn!(
                "malformed {} input, invalid sequences were replaced",
                used.name()
            );
        }

        Ok(text.into_owned().into_bytes())
    }
}
