use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named metadata fields carried in the lyric payload `INFO` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SongField {
    Version,
    Source,
    Charset,
    Title,
    Artist,
    Album,
    Author,
    Composer,
    Genre,
    Rhythm,
    Key,
    Tempo,
    TimeSignature,
    Language,
    VocalChannel,
    SongType,
    Creator,
    Company,
    Remark,
}

impl SongField {
    pub const ALL: [SongField; 19] = [
        SongField::Version,
        SongField::Source,
        SongField::Charset,
        SongField::Title,
        SongField::Artist,
        SongField::Album,
        SongField::Author,
        SongField::Composer,
        SongField::Genre,
        SongField::Rhythm,
        SongField::Key,
        SongField::Tempo,
        SongField::TimeSignature,
        SongField::Language,
        SongField::VocalChannel,
        SongField::SongType,
        SongField::Creator,
        SongField::Company,
        SongField::Remark,
    ];

    /// XML element name.
    pub fn tag(self) -> &'static str {
        match self {
            SongField::Version => "VERSION",
            SongField::Source => "SOURCE",
            SongField::Charset => "CHARSET",
            SongField::Title => "TITLE",
            SongField::Artist => "ARTIST",
            SongField::Album => "ALBUM",
            SongField::Author => "AUTHOR",
            SongField::Composer => "COMPOSER",
            SongField::Genre => "GENRE",
            SongField::Rhythm => "RHYTHM",
            SongField::Key => "KEY",
            SongField::Tempo => "TEMPO",
            SongField::TimeSignature => "TIME_SIGNATURE",
            SongField::Language => "LANGUAGE",
            SongField::VocalChannel => "VOCAL_CHANNEL",
            SongField::SongType => "SONG_TYPE",
            SongField::Creator => "CREATOR",
            SongField::Company => "COMPANY",
            SongField::Remark => "REMARK",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }
}

/// How lyric times are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// Ticks of the accompanying MIDI file.
    #[default]
    Midi,
    /// Milliseconds into an MP3 track.
    Mp3,
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingMode::Midi => f.write_str("MIDI"),
            TimingMode::Mp3 => f.write_str("MP3"),
        }
    }
}

impl FromStr for TimingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIDI" | "MID" | "1" => Ok(TimingMode::Midi),
            "MP3" | "2" => Ok(TimingMode::Mp3),
            other => Err(format!("unknown timing mode '{other}'")),
        }
    }
}

/// Flat song metadata. Empty values are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongInfo {
    fields: BTreeMap<SongField, String>,
}

impl SongInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: SongField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Set a field; an empty value clears it.
    pub fn set(&mut self, field: SongField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn with(mut self, field: SongField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.get(SongField::Title)
    }

    pub fn artist(&self) -> Option<&str> {
        self.get(SongField::Artist)
    }

    pub fn key(&self) -> Option<&str> {
        self.get(SongField::Key)
    }

    pub fn song_type(&self) -> Option<TimingMode> {
        self.get(SongField::SongType).and_then(|s| s.parse().ok())
    }

    pub fn vocal_channel(&self) -> Option<u8> {
        self.get(SongField::VocalChannel).and_then(|s| s.trim().parse().ok())
    }

    /// Present fields in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (SongField, &str)> {
        self.fields.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One timed lyric word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricEvent {
    pub text: String,
    pub tick: u32,
    pub vocal: Option<String>,
}

impl LyricEvent {
    pub fn new(text: impl Into<String>, tick: u32) -> Self {
        Self { text: text.into(), tick, vocal: None }
    }
}

/// Lyric words grouped by display line.
pub type LyricLines = Vec<Vec<LyricEvent>>;

/// A chord marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordEvent {
    pub chord: String,
    pub tick: u32,
}

impl ChordEvent {
    pub fn new(chord: impl Into<String>, tick: u32) -> Self {
        Self { chord: chord.into(), tick }
    }
}

/// A word as the editor times it. Times are ticks (MIDI) or seconds (MP3).
#[derive(Debug, Clone, PartialEq)]
pub struct LyricWordData {
    pub name: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub line_index: usize,
    pub index: usize,
}

impl LyricWordData {
    pub fn new(name: impl Into<String>, start: f64, end: f64, line_index: usize, index: usize) -> Self {
        Self {
            name: name.into(),
            start: Some(start),
            end: Some(end),
            line_index,
            index,
        }
    }

    /// Flatten grouped lyric events into editor words. A word ends where the
    /// next one on the same line starts; the last word of a line ends at its own
    /// start plus `tail`.
    pub fn from_lines(lines: &[Vec<LyricEvent>], tail: f64) -> Vec<LyricWordData> {
        let mut out = Vec::new();
        let mut index = 0;
        for (line_index, line) in lines.iter().enumerate() {
            for (i, ev) in line.iter().enumerate() {
                let start = ev.tick as f64;
                let end = line.get(i + 1).map_or(start + tail, |n| n.tick as f64);
                out.push(LyricWordData::new(ev.text.clone(), start, end, line_index, index));
                index += 1;
            }
        }
        out
    }
}
