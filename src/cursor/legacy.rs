//! Per-character cursor used by older files.
//!
//! Every raw character (combining marks included) gets its own unit. Words
//! anchor at their start, lines close halfway to the next line, and the
//! stream is strictly increasing.

use super::{CursorLine, CursorMode, CursorSegment, fallback_span, timed_lines};
use crate::song::LyricWordData;

fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn ease_out_cubic(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(3)
}

fn blend(t: f64) -> f64 {
    0.5 * ease_in_out(t) + 0.5 * ease_out_cubic(t)
}

pub fn generate_legacy(words: &[LyricWordData], mode: CursorMode) -> CursorSegment {
    let lines = timed_lines(words, mode);
    let step = mode.step();
    let mut out = Vec::with_capacity(lines.len());
    let mut prev: Option<f64> = None;
    let next_unit = |v: f64, prev: &mut Option<f64>| {
        let v = match *prev {
            Some(p) => mode.round(v.max(p + step)),
            None => mode.round(v),
        };
        *prev = Some(v);
        v
    };

    for (li, (line_index, line)) in lines.iter().enumerate() {
        let Some(last) = line.last() else { continue };
        let next_first = lines.get(li + 1).and_then(|(_, l)| l.first()).map(|w| w.start);
        let line_end = match next_first {
            Some(next) if next > last.end => (last.end + next) / 2.0,
            _ => {
                let chars = last.text.chars().count();
                last.end + fallback_span(mode, chars, next_first.is_none())
            }
        };

        let mut units = Vec::new();
        for (wi, word) in line.iter().enumerate() {
            let stop = line.get(wi + 1).map_or(line_end, |n| n.start);
            let m = word.text.chars().count();
            for j in 0..m {
                let t = j as f64 / m as f64;
                let pos = word.start + blend(t) * (stop - word.start);
                units.push(next_unit(pos, &mut prev));
            }
        }
        let group_end = next_unit(line_end, &mut prev);
        units.push(group_end);

        out.push(CursorLine { line_index: *line_index, units, group_end });
    }

    CursorSegment { mode, lines: out }
}
