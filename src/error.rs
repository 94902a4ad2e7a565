use std::io;

/// Errors produced by the karaoke codecs.
///
/// Structural errors (`Format`, `TruncatedData`) abort the parse call that hit
/// them. `SizeMismatch` and `PayloadDecode` are scoped to one section or payload
/// and are usually reported as diagnostics next to a partial result.
#[derive(thiserror::Error, Debug)]
pub enum KaraokeError {
    #[error("format error: {0}")]
    Format(String),
    #[error("truncated data at offset {offset} while reading {context}")]
    TruncatedData { offset: usize, context: &'static str },
    #[error("section {tag}: declared {expected} bytes, inflated to {actual}")]
    SizeMismatch {
        tag: String,
        expected: u32,
        actual: usize,
    },
    #[error("lyric payload decode failed: {0}")]
    PayloadDecode(String),
    #[error("unknown MIDI status 0x{status:02X} at offset {offset}")]
    UnknownEvent { status: u8, offset: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl KaraokeError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        KaraokeError::Format(msg.into())
    }

    pub(crate) fn truncated(offset: usize, context: &'static str) -> Self {
        KaraokeError::TruncatedData { offset, context }
    }

    pub(crate) fn payload(msg: impl std::fmt::Display) -> Self {
        KaraokeError::PayloadDecode(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KaraokeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = KaraokeError::truncated(12, "track length");
        assert_eq!(
            e.to_string(),
            "truncated data at offset 12 while reading track length"
        );

        let e = KaraokeError::SizeMismatch {
            tag: "MIDI_DATA".into(),
            expected: 10,
            actual: 9,
        };
        assert!(e.to_string().contains("MIDI_DATA"));

        let e = KaraokeError::UnknownEvent { status: 0xF4, offset: 30 };
        assert_eq!(e.to_string(), "unknown MIDI status 0xF4 at offset 30");
    }
}
