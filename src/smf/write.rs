use log::debug;
use midly::num::{u4, u7, u14, u15};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent,
    TrackEventKind,
};

use super::{
    EventKind, LYRIC_SENTINEL, META_END_OF_TRACK, META_LYRIC, META_MARKER, META_TEXT,
    META_TRACK_NAME, MidiEvent, MidiFile, MidiTrack,
};
use crate::error::{KaraokeError, Result};
use crate::klyr;
use crate::song::{ChordEvent, LyricEvent, LyricLines, SongInfo, TimingMode};

/// Rebuild a karaoke MIDI file with new song data.
///
/// Existing chord markers and the old lyric carrier track are always removed.
/// `chords`, when given, are injected into the tempo track (track 0 without
/// one). When `song_info` or `lyrics` is given a new carrier track is appended;
/// the missing half falls back to whatever the original file carried.
pub fn build(
    original: &MidiFile,
    song_info: Option<&SongInfo>,
    lyrics: Option<&[Vec<LyricEvent>]>,
    chords: Option<&[ChordEvent]>,
    header_tag: &str,
) -> Result<Vec<u8>> {
    let mut midi = MidiFile::new(original.format, original.ticks_per_beat);
    midi.tracks = original
        .tracks
        .iter()
        .filter(|t| !is_lyric_carrier(t, header_tag))
        .map(|t| MidiTrack::new(
            t.events
                .iter()
                .filter(|e| e.meta_type() != Some(META_MARKER))
                .cloned()
                .collect(),
        ))
        .collect();
    debug!(
        "rebuild: kept {} of {} tracks",
        midi.tracks.len(),
        original.tracks.len()
    );

    if let Some(chords) = chords.filter(|c| !c.is_empty()) {
        if midi.tracks.is_empty() {
            midi.tracks.push(MidiTrack::new(vec![MidiEvent::meta(0, META_END_OF_TRACK, Vec::new())]));
        }
        let target = midi.tempo_track().unwrap_or(0);
        let track = &mut midi.tracks[target];
        track.events.extend(
            chords
                .iter()
                .map(|c| MidiEvent::text(c.tick, META_MARKER, &c.chord)),
        );
        track.sort_events();
        debug!("rebuild: {} chords into track {target}", chords.len());
    }

    if song_info.is_some() || lyrics.is_some() {
        let fallback = match (song_info, lyrics) {
            (Some(_), Some(_)) => None,
            _ => super::extract_lyrics(original, header_tag).and_then(|r| r.ok()),
        };
        let (old_info, old_lines): (SongInfo, LyricLines) = fallback.unwrap_or_default();
        let info = song_info.unwrap_or(&old_info);
        let lines = lyrics.unwrap_or(old_lines.as_slice());

        let payload = klyr::encode_with_header(info, lines, TimingMode::Midi, header_tag)?;
        midi.tracks.push(lyric_carrier(&payload));
    }

    if midi.format == 0 && midi.tracks.len() > 1 {
        midi.format = 1;
    }
    write(&midi)
}

/// A track holding the sentinel and one payload event.
fn lyric_carrier(payload: &str) -> MidiTrack {
    MidiTrack::new(vec![
        MidiEvent::text(0, META_TEXT, LYRIC_SENTINEL),
        MidiEvent::text(0, META_TEXT, payload),
        MidiEvent::meta(0, META_END_OF_TRACK, Vec::new()),
    ])
}

fn is_lyric_carrier(track: &MidiTrack, header_tag: &str) -> bool {
    let texts = || track.events.iter().filter_map(MidiEvent::meta_text);
    texts().any(|t| t == LYRIC_SENTINEL)
        && texts().any(|t| klyr::has_header(t) || (!header_tag.is_empty() && t.starts_with(header_tag)))
}

/// Serialize the model to SMF bytes with `midly`, which applies running
/// status. Every track ends in exactly one end-of-track.
pub fn write(midi: &MidiFile) -> Result<Vec<u8>> {
    let smf = Smf {
        header: Header::new(smf_format(midi.format)?, smf_timing(midi.ticks_per_beat)?),
        tracks: midi.tracks.iter().map(track_events).collect(),
    };
    let mut out = Vec::with_capacity(14 + midi.tracks.len() * 256);
    smf.write_std(&mut out)?;
    Ok(out)
}

fn smf_format(format: u16) -> Result<Format> {
    match format {
        0 => Ok(Format::SingleTrack),
        1 => Ok(Format::Parallel),
        2 => Ok(Format::Sequential),
        other => Err(KaraokeError::format(format!("cannot write SMF format {other}"))),
    }
}

fn smf_timing(division: u16) -> Result<Timing> {
    if division & 0x8000 == 0 {
        return Ok(Timing::Metrical(u15::from(division)));
    }
    let fps = match (division >> 8) as u8 as i8 {
        -24 => Fps::Fps24,
        -25 => Fps::Fps25,
        -29 => Fps::Fps29,
        -30 => Fps::Fps30,
        other => {
            return Err(KaraokeError::format(format!("bad SMPTE frame rate {other}")));
        }
    };
    Ok(Timing::Timecode(fps, division as u8))
}

/// Delta-timed events for one track. End-of-track events in the middle are
/// dropped and a single one closes the track at its latest tick.
fn track_events(track: &MidiTrack) -> Vec<TrackEvent<'_>> {
    let eot = track.events.iter().map(|e| e.absolute_time).max().unwrap_or(0);

    let mut out = Vec::with_capacity(track.events.len() + 1);
    let mut prev: u32 = 0;
    for ev in &track.events {
        if ev.is_end_of_track() {
            continue;
        }
        let Some(kind) = event_kind(&ev.kind) else { continue };
        out.push(TrackEvent { delta: ev.absolute_time.saturating_sub(prev).into(), kind });
        prev = prev.max(ev.absolute_time);
    }
    out.push(TrackEvent {
        delta: eot.saturating_sub(prev).into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    out
}

fn event_kind(kind: &EventKind) -> Option<TrackEventKind<'_>> {
    let kind = match kind {
        EventKind::Meta { meta_type, data, .. } => TrackEventKind::Meta(match *meta_type {
            META_TEXT => MetaMessage::Text(data),
            META_TRACK_NAME => MetaMessage::TrackName(data),
            META_LYRIC => MetaMessage::Lyric(data),
            META_MARKER => MetaMessage::Marker(data),
            other => MetaMessage::Unknown(other, data),
        }),
        EventKind::Channel { status, params } => {
            let p = |i: usize| u7::from(params.get(i).copied().unwrap_or(0));
            let message = match status & 0xF0 {
                0x80 => MidiMessage::NoteOff { key: p(0), vel: p(1) },
                0x90 => MidiMessage::NoteOn { key: p(0), vel: p(1) },
                0xA0 => MidiMessage::Aftertouch { key: p(0), vel: p(1) },
                0xB0 => MidiMessage::Controller { controller: p(0), value: p(1) },
                0xC0 => MidiMessage::ProgramChange { program: p(0) },
                0xD0 => MidiMessage::ChannelAftertouch { vel: p(0) },
                _ => {
                    let bend = p(0).as_int() as u16 | (p(1).as_int() as u16) << 7;
                    MidiMessage::PitchBend { bend: PitchBend(u14::from(bend)) }
                }
            };
            TrackEventKind::Midi { channel: u4::from(status & 0x0F), message }
        }
        EventKind::Sysex { status: 0xF0, data } => TrackEventKind::SysEx(data),
        EventKind::Sysex { data, .. } => TrackEventKind::Escape(data),
        EventKind::Unknown { .. } => return None,
    };
    Some(kind)
}
