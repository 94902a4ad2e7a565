use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};

use super::{EventKind, META_END_OF_TRACK, META_MARKER, MidiEvent, MidiFile, MidiTrack, channel_param_len};
use crate::error::{KaraokeError, Result};
use crate::klyr;
use crate::song::{ChordEvent, LyricLines, SongInfo};

/// A karaoke MIDI file with its embedded song data pulled out.
#[derive(Debug)]
pub struct ParsedMidi {
    pub midi: MidiFile,
    pub song_info: SongInfo,
    pub lyrics: LyricLines,
    pub chords: Vec<ChordEvent>,
    /// Earliest sounding note, used as the pre-roll reference.
    pub first_note_tick: Option<u32>,
    /// Recoverable problems met while reading.
    pub diagnostics: Vec<KaraokeError>,
}

/// Parse SMF bytes into the event model.
pub fn parse(bytes: &[u8]) -> Result<MidiFile> {
    let mut diagnostics = Vec::new();
    parse_into(bytes, &mut diagnostics)
}

/// Parse SMF bytes and extract lyrics, chords and the first note.
///
/// A broken lyric payload is reported in `diagnostics` and leaves the lyrics
/// empty; only structural SMF errors fail the call.
pub fn parse_karaoke(bytes: &[u8], header_tag: &str) -> Result<ParsedMidi> {
    let mut diagnostics = Vec::new();
    let midi = parse_into(bytes, &mut diagnostics)?;

    let (song_info, lyrics) = match extract_lyrics(&midi, header_tag) {
        Some(Ok(found)) => found,
        Some(Err(e)) => {
            warn!("embedded lyrics unreadable: {e}");
            diagnostics.push(e);
            (SongInfo::new(), Vec::new())
        }
        None => (SongInfo::new(), Vec::new()),
    };
    let chords = extract_chords(&midi);
    let first_note_tick = first_note_tick(&midi);

    debug!(
        "karaoke midi: {} tracks, {} lyric lines, {} chords",
        midi.tracks.len(),
        lyrics.len(),
        chords.len()
    );

    Ok(ParsedMidi { midi, song_info, lyrics, chords, first_note_tick, diagnostics })
}

fn parse_into(bytes: &[u8], diagnostics: &mut Vec<KaraokeError>) -> Result<MidiFile> {
    let mut r = Cursor::new(bytes);

    let magic = take(&mut r, 4, "header magic")?;
    if magic != b"MThd" {
        return Err(KaraokeError::format("missing MThd header"));
    }
    let header_len = r.read_u32::<BigEndian>().map_err(|_| eof(&r, "header length"))? as usize;
    if header_len < 6 {
        return Err(KaraokeError::format(format!("header length {header_len} < 6")));
    }
    let header = take(&mut r, header_len, "header body")?;
    let format = u16::from_be_bytes([header[0], header[1]]);
    let track_count = u16::from_be_bytes([header[2], header[3]]);
    let ticks_per_beat = u16::from_be_bytes([header[4], header[5]]);

    let mut midi = MidiFile::new(format, ticks_per_beat);
    for index in 0..track_count {
        let chunk_start = r.position() as usize;
        let id = take(&mut r, 4, "track magic")?;
        if id != b"MTrk" {
            return Err(KaraokeError::format(format!(
                "track {index}: expected MTrk at offset {chunk_start}"
            )));
        }
        let len = r.read_u32::<BigEndian>().map_err(|_| eof(&r, "track length"))? as usize;
        let base = r.position() as usize;
        let data = take(&mut r, len, "track data")?;
        let track = read_track(data, base, diagnostics)?;
        debug!("track {index}: {} events", track.events.len());
        midi.tracks.push(track);
    }

    Ok(midi)
}

fn eof(r: &Cursor<&[u8]>, context: &'static str) -> KaraokeError {
    KaraokeError::truncated(r.position() as usize, context)
}

/// Borrow the next `n` bytes and advance.
fn take<'a>(r: &mut Cursor<&'a [u8]>, n: usize, context: &'static str) -> Result<&'a [u8]> {
    let start = r.position() as usize;
    let buf: &'a [u8] = *r.get_ref();
    let slice = start
        .checked_add(n)
        .and_then(|end| buf.get(start..end))
        .ok_or_else(|| KaraokeError::truncated(start, context))?;
    r.set_position((start + n) as u64);
    Ok(slice)
}

fn read_vlq(data: &[u8], pos: &mut usize, base: usize) -> Result<u32> {
    let mut value: u32 = 0;
    for _ in 0..5 {
        let b = *data
            .get(*pos)
            .ok_or_else(|| KaraokeError::truncated(base + *pos, "variable-length quantity"))?;
        *pos += 1;
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(KaraokeError::format(format!(
        "variable-length quantity longer than 5 bytes at offset {}",
        base + *pos
    )))
}

fn slice<'a>(data: &'a [u8], pos: &mut usize, n: usize, base: usize, context: &'static str) -> Result<&'a [u8]> {
    let start = *pos;
    let out = start
        .checked_add(n)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| KaraokeError::truncated(base + start, context))?;
    *pos += n;
    Ok(out)
}

fn read_track(data: &[u8], base: usize, diagnostics: &mut Vec<KaraokeError>) -> Result<MidiTrack> {
    let mut events = Vec::new();
    let mut pos = 0usize;
    let mut absolute: u32 = 0;
    let mut running: Option<u8> = None;

    while pos < data.len() {
        let delta = read_vlq(data, &mut pos, base)?;
        absolute = absolute.saturating_add(delta);

        let status_at = pos;
        let status = *data
            .get(pos)
            .ok_or_else(|| KaraokeError::truncated(base + pos, "event status"))?;

        match status {
            0xFF => {
                pos += 1;
                let meta_type = *slice(data, &mut pos, 1, base, "meta type")?.first().unwrap_or(&0);
                let len = read_vlq(data, &mut pos, base)? as usize;
                let payload = slice(data, &mut pos, len, base, "meta payload")?;
                events.push(MidiEvent::meta(absolute, meta_type, payload.to_vec()));
                if meta_type == META_END_OF_TRACK {
                    break;
                }
            }
            0xF0 | 0xF7 => {
                pos += 1;
                let len = read_vlq(data, &mut pos, base)? as usize;
                let payload = slice(data, &mut pos, len, base, "sysex payload")?;
                events.push(MidiEvent {
                    absolute_time: absolute,
                    kind: EventKind::Sysex { status, data: payload.to_vec() },
                });
            }
            0x80..=0xEF => {
                pos += 1;
                running = Some(status);
                let params = slice(data, &mut pos, channel_param_len(status), base, "channel params")?;
                events.push(MidiEvent::channel(absolute, status, params.to_vec()));
            }
            0x00..=0x7F => {
                let status = match running {
                    Some(s) => s,
                    None => {
                        warn!(
                            "data byte 0x{status:02X} at offset {} without running status, assuming note-on ch 0",
                            base + status_at
                        );
                        running = Some(0x90);
                        0x90
                    }
                };
                let params = slice(data, &mut pos, channel_param_len(status), base, "channel params")?;
                events.push(MidiEvent::channel(absolute, status, params.to_vec()));
            }
            _ => {
                warn!("skipping unknown status 0x{status:02X} at offset {}", base + status_at);
                diagnostics.push(KaraokeError::UnknownEvent { status, offset: base + status_at });
                pos += 1;
                events.push(MidiEvent { absolute_time: absolute, kind: EventKind::Unknown { status } });
            }
        }
    }

    Ok(MidiTrack::new(events))
}

/// Decode the first embedded lyric payload, if any.
pub fn extract_lyrics(midi: &MidiFile, header_tag: &str) -> Option<Result<(SongInfo, LyricLines)>> {
    let text = midi
        .events()
        .filter_map(|(_, e)| e.meta_text())
        .find(|t| klyr::has_header(t) || (!header_tag.is_empty() && t.starts_with(header_tag)))?;
    Some(klyr::decode(text, header_tag))
}

/// Every marker event as a chord, ordered by tick.
pub fn extract_chords(midi: &MidiFile) -> Vec<ChordEvent> {
    let mut chords: Vec<ChordEvent> = midi
        .events()
        .filter(|(_, e)| e.meta_type() == Some(META_MARKER))
        .map(|(_, e)| ChordEvent::new(e.meta_text().unwrap_or_default(), e.absolute_time))
        .collect();
    chords.sort_by_key(|c| c.tick);
    chords
}

/// Earliest note-on with non-zero velocity across all tracks.
pub fn first_note_tick(midi: &MidiFile) -> Option<u32> {
    midi.events()
        .filter(|(_, e)| e.is_sounding_note_on())
        .map(|(_, e)| e.absolute_time)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smf::META_TEMPO;

    fn smf(format: u16, tpb: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
        out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&tpb.to_be_bytes());
        for t in tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(t.len() as u32).to_be_bytes());
            out.extend_from_slice(t);
        }
        out
    }

    /// Append `d` as a variable-length quantity.
    fn delta(out: &mut Vec<u8>, d: u32) {
        let mut groups = vec![(d & 0x7F) as u8];
        let mut v = d >> 7;
        while v > 0 {
            groups.push(0x80 | (v & 0x7F) as u8);
            v >>= 7;
        }
        out.extend(groups.iter().rev());
    }

    #[test]
    fn vlq_reference_values() {
        for (bytes, value) in [
            (&[0x00][..], 0),
            (&[0x7F][..], 0x7F),
            (&[0x81, 0x00][..], 0x80),
            (&[0xC0, 0x00][..], 0x2000),
            (&[0xFF, 0xFF, 0xFF, 0x7F][..], 0x0FFF_FFFF),
        ] {
            let mut pos = 0;
            assert_eq!(read_vlq(bytes, &mut pos, 0).unwrap(), value);
            assert_eq!(pos, bytes.len());
            let mut enc = Vec::new();
            delta(&mut enc, value);
            assert_eq!(enc, bytes);
        }
    }

    #[test]
    fn parses_header_and_running_status() {
        let mut t = Vec::new();
        delta(&mut t, 0);
        t.extend_from_slice(&[0xFF, META_TEMPO, 3, 0x07, 0xA1, 0x20]);
        delta(&mut t, 0);
        t.extend_from_slice(&[0x90, 60, 100]);
        delta(&mut t, 0x80); // two-byte delta
        t.extend_from_slice(&[62, 90]); // running status
        delta(&mut t, 10);
        t.extend_from_slice(&[0xC1, 5]);
        delta(&mut t, 0);
        t.extend_from_slice(&[0xFF, 0x2F, 0]);

        let midi = parse(&smf(1, 480, &[t])).unwrap();
        assert_eq!(midi.format, 1);
        assert_eq!(midi.ticks_per_beat, 480);
        let ev = &midi.tracks[0].events;
        assert_eq!(ev.len(), 5);
        assert_eq!(ev[2], MidiEvent::channel(128, 0x90, vec![62, 90]));
        assert_eq!(ev[3], MidiEvent::channel(138, 0xC1, vec![5]));
        assert!(ev[4].is_end_of_track());
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let err = parse(b"RIFF\0\0\0\x06\0\0\0\0\0\0").unwrap_err();
        assert!(matches!(err, KaraokeError::Format(_)));

        let mut bytes = smf(0, 96, &[vec![0, 0xFF, 0x2F, 0]]);
        bytes[14..18].copy_from_slice(b"XTrk");
        assert!(matches!(parse(&bytes).unwrap_err(), KaraokeError::Format(_)));
    }

    #[test]
    fn truncation_is_reported() {
        // meta claims 10 bytes, only 2 present
        let t = vec![0, 0xFF, 0x01, 10, b'h', b'i'];
        let err = parse(&smf(0, 96, &[t])).unwrap_err();
        assert!(matches!(err, KaraokeError::TruncatedData { .. }));

        // dangling continuation bit
        let t = vec![0x81];
        assert!(matches!(
            parse(&smf(0, 96, &[t])).unwrap_err(),
            KaraokeError::TruncatedData { .. }
        ));

        let mut bytes = smf(0, 96, &[vec![0, 0xFF, 0x2F, 0]]);
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(parse(&bytes).unwrap_err(), KaraokeError::TruncatedData { .. }));
    }

    #[test]
    fn missing_running_status_falls_back_to_note_on() {
        let t = vec![0, 60, 100, 5, 62, 0, 0, 0xFF, 0x2F, 0];
        let midi = parse(&smf(0, 96, &[t])).unwrap();
        let ev = &midi.tracks[0].events;
        assert_eq!(ev[0], MidiEvent::channel(0, 0x90, vec![60, 100]));
        assert_eq!(ev[1], MidiEvent::channel(5, 0x90, vec![62, 0]));
    }

    #[test]
    fn unknown_status_is_skipped() {
        let t = vec![0, 0xF4, 0, 0x90, 60, 1, 0, 0xFF, 0x2F, 0];
        let parsed = parse_karaoke(&smf(0, 96, &[t]), klyr::DEFAULT_HEADER_TAG).unwrap();
        let ev = &parsed.midi.tracks[0].events;
        assert_eq!(ev[0].kind, EventKind::Unknown { status: 0xF4 });
        assert_eq!(ev[1], MidiEvent::channel(0, 0x90, vec![60, 1]));
        assert!(matches!(
            parsed.diagnostics[0],
            KaraokeError::UnknownEvent { status: 0xF4, .. }
        ));
    }

    #[test]
    fn text_meta_is_decoded_from_code_page() {
        let mut t = vec![0, 0xFF, 0x05, 4];
        t.extend_from_slice(&crate::thai::encode("เพลง"));
        t.extend_from_slice(&[0, 0xFF, 0x7F, 2, 0xE0, 0xE1]);
        t.extend_from_slice(&[0, 0xFF, 0x2F, 0]);
        let midi = parse(&smf(0, 96, &[t])).unwrap();
        assert_eq!(midi.tracks[0].events[0].meta_text(), Some("เพลง"));
        // sequencer-specific data stays raw
        assert_eq!(midi.tracks[0].events[1].meta_text(), None);
    }

    #[test]
    fn chords_sorted_and_first_note_found() {
        let a = vec![
            0, 0xFF, 0x06, 2, b'A', b'm', //
            10, 0x90, 64, 0, // silent note-on
            5, 0x90, 64, 80, //
            0, 0xFF, 0x2F, 0,
        ];
        let b = vec![0, 0xFF, 0x06, 1, b'C', 3, 0x91, 40, 1, 0, 0xFF, 0x2F, 0];
        let parsed = parse_karaoke(&smf(1, 96, &[a, b]), klyr::DEFAULT_HEADER_TAG).unwrap();
        assert_eq!(
            parsed.chords,
            vec![ChordEvent::new("Am", 0), ChordEvent::new("C", 0)]
        );
        assert_eq!(parsed.first_note_tick, Some(3));
        assert!(parsed.lyrics.is_empty());
    }

    #[test]
    fn broken_payload_degrades_to_no_lyrics() {
        let text = b"KLyrHdr1@@@@";
        let mut t = vec![0, 0xFF, 0x01, text.len() as u8];
        t.extend_from_slice(text);
        t.extend_from_slice(&[0, 0xFF, 0x2F, 0]);
        let parsed = parse_karaoke(&smf(0, 96, &[t]), klyr::DEFAULT_HEADER_TAG).unwrap();
        assert!(parsed.lyrics.is_empty());
        assert!(matches!(parsed.diagnostics[0], KaraokeError::PayloadDecode(_)));
    }
}
