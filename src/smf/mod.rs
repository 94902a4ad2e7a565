//! Standard MIDI File model, reader and writer.
//!
//! Events keep their absolute tick and their raw payload bytes so a parsed file
//! can be written back without disturbing anything the caller did not touch.

mod read;
mod write;

pub use read::{ParsedMidi, extract_chords, extract_lyrics, first_note_tick, parse, parse_karaoke};
pub use write::{build, write};

use crate::thai;

pub const META_TEXT: u8 = 0x01;
pub const META_TRACK_NAME: u8 = 0x03;
pub const META_LYRIC: u8 = 0x05;
pub const META_MARKER: u8 = 0x06;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;

/// Text written ahead of the payload on the lyric carrier track.
pub const LYRIC_SENTINEL: &str = "@KLyr";

/// Meta types whose payload is code-page text.
pub fn is_text_meta(meta_type: u8) -> bool {
    matches!(meta_type, META_TEXT | META_TRACK_NAME | META_LYRIC | META_MARKER)
}

/// A decoded file.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiFile {
    pub format: u16,
    pub ticks_per_beat: u16,
    pub tracks: Vec<MidiTrack>,
}

impl MidiFile {
    pub fn new(format: u16, ticks_per_beat: u16) -> Self {
        Self { format, ticks_per_beat, tracks: Vec::new() }
    }

    /// All events with their track index, in track then event order.
    pub fn events(&self) -> impl Iterator<Item = (usize, &MidiEvent)> {
        self.tracks
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.events.iter().map(move |e| (i, e)))
    }

    /// Index of the track owning the first tempo event.
    pub fn tempo_track(&self) -> Option<usize> {
        self.tracks.iter().position(|t| {
            t.events
                .iter()
                .any(|e| matches!(e.kind, EventKind::Meta { meta_type: META_TEMPO, .. }))
        })
    }
}

/// Events ordered by non-decreasing absolute tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiTrack {
    pub events: Vec<MidiEvent>,
}

impl MidiTrack {
    pub fn new(events: Vec<MidiEvent>) -> Self {
        Self { events }
    }

    pub fn last_tick(&self) -> u32 {
        self.events.last().map_or(0, |e| e.absolute_time)
    }

    pub fn has_end_of_track(&self) -> bool {
        self.events.iter().any(MidiEvent::is_end_of_track)
    }

    /// Stable sort by tick, keeping one end-of-track at the very end.
    pub fn sort_events(&mut self) {
        let eot_tick = self
            .events
            .iter()
            .filter(|e| e.is_end_of_track())
            .map(|e| e.absolute_time)
            .max();
        self.events.retain(|e| !e.is_end_of_track());
        self.events.sort_by_key(|e| e.absolute_time);
        if let Some(t) = eot_tick {
            let at = t.max(self.last_tick());
            self.events.push(MidiEvent::meta(at, META_END_OF_TRACK, Vec::new()));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    pub absolute_time: u32,
    pub kind: EventKind,
}

/// Closed set of track event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Meta {
        meta_type: u8,
        data: Vec<u8>,
        /// Decoded text for the code-page text types.
        text: Option<String>,
    },
    Channel {
        status: u8,
        params: Vec<u8>,
    },
    /// `status` is `0xF0` or `0xF7`; `data` excludes the length prefix.
    Sysex {
        status: u8,
        data: Vec<u8>,
    },
    /// Skipped status byte; never written back.
    Unknown {
        status: u8,
    },
}

impl MidiEvent {
    pub fn meta(absolute_time: u32, meta_type: u8, data: Vec<u8>) -> Self {
        let text = is_text_meta(meta_type).then(|| thai::decode(&data));
        Self { absolute_time, kind: EventKind::Meta { meta_type, data, text } }
    }

    /// A code-page text meta event.
    pub fn text(absolute_time: u32, meta_type: u8, text: &str) -> Self {
        Self {
            absolute_time,
            kind: EventKind::Meta {
                meta_type,
                data: thai::encode(text),
                text: Some(text.to_string()),
            },
        }
    }

    pub fn channel(absolute_time: u32, status: u8, params: Vec<u8>) -> Self {
        Self { absolute_time, kind: EventKind::Channel { status, params } }
    }

    pub fn is_end_of_track(&self) -> bool {
        matches!(self.kind, EventKind::Meta { meta_type: META_END_OF_TRACK, .. })
    }

    pub fn meta_type(&self) -> Option<u8> {
        match self.kind {
            EventKind::Meta { meta_type, .. } => Some(meta_type),
            _ => None,
        }
    }

    pub fn meta_text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Meta { text: Some(t), .. } => Some(t),
            _ => None,
        }
    }

    /// Note-on with non-zero velocity.
    pub fn is_sounding_note_on(&self) -> bool {
        match &self.kind {
            EventKind::Channel { status, params } => {
                status & 0xF0 == 0x90 && params.get(1).is_some_and(|&v| v > 0)
            }
            _ => false,
        }
    }
}

/// Number of parameter bytes following a channel status.
pub fn channel_param_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keeps_end_of_track_last() {
        let mut track = MidiTrack::new(vec![
            MidiEvent::channel(0, 0x90, vec![60, 100]),
            MidiEvent::meta(10, META_END_OF_TRACK, vec![]),
            MidiEvent::text(40, META_MARKER, "Am"),
            MidiEvent::text(5, META_MARKER, "C"),
        ]);
        track.sort_events();
        let ticks: Vec<u32> = track.events.iter().map(|e| e.absolute_time).collect();
        assert_eq!(ticks, vec![0, 5, 40, 40]);
        assert!(track.events[3].is_end_of_track());
    }

    #[test]
    fn note_on_velocity_zero_is_silent() {
        assert!(MidiEvent::channel(0, 0x93, vec![60, 1]).is_sounding_note_on());
        assert!(!MidiEvent::channel(0, 0x93, vec![60, 0]).is_sounding_note_on());
        assert!(!MidiEvent::channel(0, 0x83, vec![60, 64]).is_sounding_note_on());
    }

    #[test]
    fn param_lengths() {
        assert_eq!(channel_param_len(0xC5), 1);
        assert_eq!(channel_param_len(0xD0), 1);
        assert_eq!(channel_param_len(0xB2), 2);
    }
}
