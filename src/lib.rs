//! Codecs for legacy karaoke song packages.
//!
//! * [`smf`]: Standard MIDI File reader/writer with the embedded lyric track
//! * [`klyr`]: the compressed XML lyric payload
//! * [`emk`]: the encrypted multi-section archive
//! * [`cursor`]: per-character `.cur` timing from word timings
//! * [`range_index`]: active-line lookup for playback preview
//!
//! Every codec call is a pure transform over in-memory buffers.

pub mod cursor;
pub mod emk;
pub mod error;
pub mod id3;
pub mod klyr;
pub mod lyr;
pub mod range_index;
pub mod smf;
pub mod song;
pub mod thai;

pub use cursor::{CursorLine, CursorMode, CursorSegment, generate_segment as generate_cursor_segment, parse_cur};
pub use emk::{EmkArchive, EmkBuilder, Section, build as build_emk, parse as parse_emk};
pub use error::{KaraokeError, Result};
pub use klyr::{DEFAULT_HEADER_TAG, decode as decode_klyr, encode as encode_klyr};
pub use range_index::{Lane, LyricRangeIndex, RangeEntry, RangeHit};
pub use smf::{MidiEvent, MidiFile, MidiTrack, ParsedMidi, build as build_midi, parse_karaoke as parse_midi};
pub use song::{ChordEvent, LyricEvent, LyricLines, LyricWordData, SongField, SongInfo, TimingMode};
