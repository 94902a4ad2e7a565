//! `.lyr` text: the plain lyric sheet shipped next to `.mid` and `.cur`.
//!
//! ```text
//! title
//! artist
//! key
//!
//! first lyric line
//! ...
//! ```
//!
//! CRLF line endings, Thai code page.

use crate::song::{LyricEvent, SongField, SongInfo};
use crate::thai;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyrText {
    pub title: String,
    pub artist: String,
    pub key: String,
    pub lines: Vec<String>,
}

impl LyrText {
    pub fn from_song(info: &SongInfo, lines: &[Vec<LyricEvent>]) -> Self {
        Self {
            title: info.title().unwrap_or_default().to_string(),
            artist: info.artist().unwrap_or_default().to_string(),
            key: info.key().unwrap_or_default().to_string(),
            lines: lines
                .iter()
                .map(|l| l.iter().map(|e| e.text.as_str()).collect())
                .collect(),
        }
    }

    pub fn song_info(&self) -> SongInfo {
        SongInfo::new()
            .with(SongField::Title, self.title.as_str())
            .with(SongField::Artist, self.artist.as_str())
            .with(SongField::Key, self.key.as_str())
    }

    pub fn to_text(&self) -> String {
        let mut rows = vec![self.title.as_str(), self.artist.as_str(), self.key.as_str(), ""];
        rows.extend(self.lines.iter().map(String::as_str));
        let mut out = rows.join("\r\n");
        out.push_str("\r\n");
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        thai::encode(&self.to_text())
    }

    /// Missing header rows come back empty.
    pub fn parse_text(text: &str) -> Self {
        let mut rows = text.lines().map(|r| r.trim_end_matches('\r'));
        let mut next = || rows.next().unwrap_or_default().to_string();
        let (title, artist, key) = (next(), next(), next());
        let _blank = next();
        let mut lines: Vec<String> = rows.map(str::to_string).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        Self { title, artist, key, lines }
    }
}

/// Encoded `.lyr` bytes.
pub fn build(info: &SongInfo, lines: &[Vec<LyricEvent>]) -> Vec<u8> {
    LyrText::from_song(info, lines).to_bytes()
}

pub fn parse(bytes: &[u8]) -> LyrText {
    LyrText::parse_text(&thai::decode(bytes))
}
