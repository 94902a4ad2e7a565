//! cursor
//!
//! Synthesises the legacy `.cur` stream: one timing unit per lyric character,
//! derived from word-level start/end times.
//!
//! Words are split into Thai clusters (a base character plus its marks). Each
//! word spreads its clusters between its own start and the next word's start
//! with a slightly eased curve; the last word of a line runs up to the line's
//! `group_end`, which also closes the line in the stream.
//!
//! MIDI mode counts in 24ths of a beat (`ticks_per_beat / 24` ticks per unit).
//! MP3 mode counts in seconds at millisecond granularity and is written out in
//! centiseconds.

mod legacy;

pub use legacy::generate_legacy;

use log::debug;

use crate::song::LyricWordData;
use crate::thai::{self, ThaiCharCluster};

/// Fraction of the gap to the next line given to the closing unit.
const GAP_RATIO: f64 = 0.2;
/// Exponent of the per-word easing curve.
const EASE_EXPONENT: f64 = 0.95;
const CHARS_PER_SPAN: usize = 3;
/// Legacy cursor resolution.
pub const UNITS_PER_BEAT: u16 = 24;

/// Time base of the words and of the generated units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Word times are ticks; units are 24ths of a beat.
    Midi { ticks_per_beat: u16 },
    /// Word times and units are seconds.
    Mp3,
}

impl CursorMode {
    /// MIDI ticks per cursor unit, never below one.
    pub fn ticks_per_unit(self) -> f64 {
        match self {
            CursorMode::Midi { ticks_per_beat } => {
                (ticks_per_beat as f64 / UNITS_PER_BEAT as f64).round().max(1.0)
            }
            CursorMode::Mp3 => 1.0,
        }
    }

    /// Smallest distinguishable step.
    pub(crate) fn step(self) -> f64 {
        match self {
            CursorMode::Midi { .. } => 1.0,
            CursorMode::Mp3 => 0.001,
        }
    }

    /// Spacing forced between consecutive units.
    pub(crate) fn min_spacing(self) -> f64 {
        match self {
            CursorMode::Midi { .. } => 0.0,
            CursorMode::Mp3 => 0.001,
        }
    }

    fn span_per_char(self, final_line: bool) -> f64 {
        match (self, final_line) {
            (CursorMode::Midi { .. }, false) => 4.0,
            (CursorMode::Midi { .. }, true) => 2.0,
            (CursorMode::Mp3, false) => 0.1,
            (CursorMode::Mp3, true) => 0.05,
        }
    }

    /// Word time to cursor units.
    pub fn to_units(self, t: f64) -> f64 {
        match self {
            CursorMode::Midi { .. } => (t / self.ticks_per_unit()).round(),
            CursorMode::Mp3 => self.round(t),
        }
    }

    /// Cursor units back to word time.
    pub fn to_time(self, unit: f64) -> f64 {
        match self {
            CursorMode::Midi { .. } => unit * self.ticks_per_unit(),
            CursorMode::Mp3 => unit,
        }
    }

    /// Round to the mode's granularity.
    pub(crate) fn round(self, v: f64) -> f64 {
        let s = self.step();
        (v / s).round() * s
    }

    pub(crate) fn floor(self, v: f64) -> f64 {
        let s = self.step();
        // keep 0.3 / 0.001 from landing on 299.999..
        ((v / s) + 1e-9).floor() * s
    }

    /// Value written to the `.cur` file.
    pub fn to_legacy(self, unit: f64) -> u16 {
        let v = match self {
            CursorMode::Midi { .. } => unit.round(),
            CursorMode::Mp3 => (unit * 100.0).round(),
        };
        v.clamp(0.0, u16::MAX as f64) as u16
    }
}

/// Units for one lyric line. The last unit is always `group_end`.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorLine {
    pub line_index: usize,
    pub units: Vec<f64>,
    pub group_end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorSegment {
    pub mode: CursorMode,
    pub lines: Vec<CursorLine>,
}

impl CursorSegment {
    /// The whole stream, line after line.
    pub fn units(&self) -> Vec<f64> {
        self.lines.iter().flat_map(|l| l.units.iter().copied()).collect()
    }

    pub fn legacy_units(&self) -> Vec<u16> {
        self.units().into_iter().map(|u| self.mode.to_legacy(u)).collect()
    }

    /// Serialized `.cur` bytes.
    pub fn export(&self) -> Vec<u8> {
        serialize(&self.legacy_units())
    }
}

/// Little-endian u16 values followed by a single `0xFF`.
pub fn serialize(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() * 2 + 1);
    for u in units {
        out.extend_from_slice(&u.to_le_bytes());
    }
    out.push(0xFF);
    out
}

/// Read a `.cur` file back. A lone trailing byte is the sentinel.
pub fn parse_cur(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// A word with its times resolved to cursor units.
pub(crate) struct TimedWord<'a> {
    pub text: &'a str,
    pub start: f64,
    pub end: f64,
}

/// Group words by line in `(line_index, index)` order and resolve missing
/// times from the previous word.
pub(crate) fn timed_lines(words: &[LyricWordData], mode: CursorMode) -> Vec<(usize, Vec<TimedWord<'_>>)> {
    let mut sorted: Vec<&LyricWordData> = words.iter().collect();
    sorted.sort_by_key(|w| (w.line_index, w.index));

    let mut lines: Vec<(usize, Vec<TimedWord<'_>>)> = Vec::new();
    let mut carry = 0.0;
    for w in sorted {
        let start = w.start.map_or(carry, |t| mode.to_units(t));
        let end = w.end.map_or(start, |t| mode.to_units(t)).max(start);
        carry = end;
        let word = TimedWord { text: &w.name, start, end };
        match lines.last_mut() {
            Some((li, line)) if *li == w.line_index => line.push(word),
            _ => lines.push((w.line_index, vec![word])),
        }
    }
    lines
}

/// Tail used when the next line gives no usable gap. `chars` counts the
/// clusters of the line's last word, not the whole line.
pub(crate) fn fallback_span(mode: CursorMode, chars: usize, final_line: bool) -> f64 {
    let spans = (chars / CHARS_PER_SPAN).max(1) as f64;
    (mode.span_per_char(final_line) * spans).max(mode.step())
}

/// Where a line closes: a fifth of the gap to the next line, or a
/// length-based tail.
pub(crate) fn group_end_unit(
    mode: CursorMode,
    last_unit: f64,
    next_first: Option<f64>,
    last_word_chars: usize,
) -> f64 {
    match next_first {
        Some(next) if next - last_unit > 0.0 => {
            let gap = next - last_unit;
            mode.round(last_unit + mode.floor(GAP_RATIO * gap).max(mode.step()))
        }
        Some(_) => mode.round(last_unit + fallback_span(mode, last_word_chars, false)),
        None => mode.round(last_unit + fallback_span(mode, last_word_chars, true)),
    }
}

/// Generate the cluster-based cursor stream.
pub fn generate_segment(words: &[LyricWordData], mode: CursorMode) -> CursorSegment {
    let lines = timed_lines(words, mode);
    let mut out = Vec::with_capacity(lines.len());
    let mut prev: Option<f64> = None;

    for (li, (line_index, line)) in lines.iter().enumerate() {
        let Some(last) = line.last() else { continue };
        let clustered: Vec<Vec<ThaiCharCluster>> =
            line.iter().map(|w| thai::clusters(w.text)).collect();

        let next_first = lines.get(li + 1).and_then(|(_, l)| l.first()).map(|w| w.start);
        let last_chars = clustered.last().map_or(0, Vec::len);
        let mut group_end = group_end_unit(mode, last.end, next_first, last_chars);

        let mut units = Vec::new();
        for (wi, word) in line.iter().enumerate() {
            let stop = line.get(wi + 1).map_or(group_end, |n| n.start);
            let upper = (stop - mode.step()).max(word.start);
            let clusters = &clustered[wi];
            let n = clusters.len();

            for (i, cluster) in clusters.iter().enumerate() {
                let pos = if n == 1 {
                    word.start
                } else {
                    let frac = (i as f64 / n as f64).powf(EASE_EXPONENT);
                    word.start + frac * (stop - word.start)
                };
                let mut v = mode.round(pos).clamp(word.start, upper);
                if let Some(p) = prev {
                    v = v.max(mode.round(p + mode.min_spacing()));
                }
                prev = Some(v);
                units.extend(std::iter::repeat_n(v, cluster.len()));
            }
        }

        if let Some(p) = prev {
            group_end = group_end.max(mode.round(p + mode.min_spacing()));
        }
        prev = Some(group_end);
        units.push(group_end);

        out.push(CursorLine { line_index: *line_index, units, group_end });
    }

    debug!("cursor: {} lines, {} units", out.len(), out.iter().map(|l| l.units.len()).sum::<usize>());
    CursorSegment { mode, lines: out }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIDI24: CursorMode = CursorMode::Midi { ticks_per_beat: 24 };

    fn word(name: &str, start: f64, end: f64, line: usize, index: usize) -> LyricWordData {
        LyricWordData::new(name, start, end, line, index)
    }

    fn non_decreasing(v: &[f64]) -> bool {
        v.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn single_word_ends_at_fallback() {
        let seg = generate_segment(&[word("AB", 0.0, 10.0, 0, 0)], MIDI24);
        let line = &seg.lines[0];
        // final line: 2 units per span, one span for a 2-char word
        assert_eq!(line.group_end, 12.0);
        assert_eq!(line.units, vec![0.0, 6.0, 12.0]);
        assert!(line.units.last().unwrap() > line.units.first().unwrap());
    }

    #[test]
    fn gap_to_next_line_sets_group_end() {
        let words = [
            word("ab", 0.0, 20.0, 0, 0),
            word("cd", 20.0, 40.0, 0, 1),
            word("ef", 90.0, 100.0, 1, 2),
        ];
        let seg = generate_segment(&words, MIDI24);
        // gap 50, a fifth of it
        assert_eq!(seg.lines[0].group_end, 50.0);
        assert_eq!(seg.lines[0].units, vec![0.0, 10.0, 20.0, 36.0, 50.0]);
        assert_eq!(seg.lines[1].units.last(), Some(&seg.lines[1].group_end));
        assert!(non_decreasing(&seg.units()));
    }

    #[test]
    fn tail_length_follows_last_word() {
        let words = [word("abcdef", 0.0, 10.0, 0, 0), word("gh", 10.0, 20.0, 0, 1)];
        let seg = generate_segment(&words, MIDI24);
        // one span for "gh"; the whole line would give two
        assert_eq!(seg.lines[0].group_end, 22.0);
    }

    #[test]
    fn overlapping_lines_fall_back_to_tail() {
        let words = [word("abcdef", 0.0, 30.0, 0, 0), word("g", 20.0, 25.0, 1, 1)];
        let seg = generate_segment(&words, MIDI24);
        // mid-song tail: 4 units per span, two spans for six chars
        assert_eq!(seg.lines[0].group_end, 38.0);
        let all = seg.units();
        assert!(non_decreasing(&all));
        assert_eq!(seg.lines[1].units.last(), Some(&seg.lines[1].group_end));
    }

    #[test]
    fn ticks_are_scaled_to_24ths() {
        let mode = CursorMode::Midi { ticks_per_beat: 480 };
        assert_eq!(mode.ticks_per_unit(), 20.0);
        assert_eq!(mode.to_units(965.0), 48.0);
        assert_eq!(mode.to_time(48.0), 960.0);
        assert_eq!(CursorMode::Midi { ticks_per_beat: 10 }.ticks_per_unit(), 1.0);
    }

    #[test]
    fn thai_marks_share_their_base_unit() {
        let seg = generate_segment(&[word("น้ำ", 0.0, 24.0, 0, 0)], MIDI24);
        let u = &seg.lines[0].units;
        // three chars, two clusters, plus the closing unit
        assert_eq!(u.len(), 4);
        assert_eq!(u[0], u[1]);
        assert!(u[2] > u[1]);
    }

    #[test]
    fn mp3_units_are_spaced_by_a_millisecond() {
        let words = [word("abc", 1.0, 1.001, 0, 0), word("d", 1.001, 1.5, 0, 1)];
        let seg = generate_segment(&words, CursorMode::Mp3);
        let u = seg.units();
        for w in u.windows(2) {
            assert!(w[1] - w[0] >= 0.000_999, "{u:?}");
        }
        assert_eq!(seg.lines[0].units.last(), Some(&seg.lines[0].group_end));
    }

    #[test]
    fn untimed_words_inherit_previous_end() {
        let mut w2 = word("b", 0.0, 0.0, 0, 1);
        w2.start = None;
        w2.end = None;
        let seg = generate_segment(&[word("a", 0.0, 12.0, 0, 0), w2], MIDI24);
        assert_eq!(seg.lines[0].units[1], 12.0);
    }

    #[test]
    fn export_is_le_u16_with_sentinel() {
        let seg = generate_segment(&[word("AB", 0.0, 10.0, 0, 0)], MIDI24);
        let bytes = seg.export();
        assert_eq!(bytes, vec![0, 0, 6, 0, 12, 0, 0xFF]);
        assert_eq!(parse_cur(&bytes), vec![0, 6, 12]);
    }

    #[test]
    fn mp3_legacy_values_are_centiseconds() {
        assert_eq!(CursorMode::Mp3.to_legacy(12.346), 1235);
        assert_eq!(MIDI24.to_legacy(-3.0), 0);
    }

    #[test]
    fn empty_input_gives_empty_stream() {
        let seg = generate_segment(&[], MIDI24);
        assert!(seg.lines.is_empty());
        assert_eq!(seg.export(), vec![0xFF]);
    }
}
