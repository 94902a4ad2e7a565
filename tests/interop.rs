use std::fs;

use karaoke_codec::{
    ChordEvent, CursorMode, DEFAULT_HEADER_TAG, LyricEvent, LyricRangeIndex, LyricWordData,
    SongField, SongInfo, TimingMode, build_emk, build_midi, decode_klyr, emk, encode_klyr,
    generate_cursor_segment, id3, lyr, parse_cur, parse_emk, parse_midi, smf,
};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24},
};
use pretty_assertions::assert_eq;

const TAG: &str = DEFAULT_HEADER_TAG;

fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent { delta: delta.into(), kind }
}

fn note_on(key: u8, vel: u8) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::from(0),
        message: MidiMessage::NoteOn { key: u7::from(key), vel: u7::from(vel) },
    }
}

/// A two-track song written by midly.
fn source_song() -> Vec<u8> {
    let header = Header { format: Format::Parallel, timing: Timing::Metrical(u15::from(480)) };
    let tempo = vec![
        ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::from(500_000)))),
        ev(0, TrackEventKind::Meta(MetaMessage::Marker(b"F"))),
        ev(1920, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ];
    let notes = vec![
        ev(480, note_on(60, 100)),
        ev(240, note_on(60, 0)),
        ev(0, note_on(64, 90)),
        ev(240, note_on(64, 0)),
        ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ];
    let smf = Smf { header, tracks: vec![tempo, notes] };
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).unwrap();
    bytes
}

fn song_lines() -> Vec<Vec<LyricEvent>> {
    vec![
        vec![LyricEvent::new("รัก", 480), LyricEvent::new("เธอ", 720)],
        vec![LyricEvent::new("ตลอด", 1440)],
    ]
}

fn song_info() -> SongInfo {
    SongInfo::new()
        .with(SongField::Title, "รักเธอ")
        .with(SongField::Artist, "นักร้อง")
        .with(SongField::Key, "C")
}

#[test]
fn reads_midly_output() {
    let parsed = parse_midi(&source_song(), TAG).unwrap();
    assert_eq!(parsed.midi.ticks_per_beat, 480);
    assert_eq!(parsed.midi.tracks.len(), 2);
    assert_eq!(parsed.first_note_tick, Some(480));
    assert_eq!(parsed.chords, vec![ChordEvent::new("F", 0)]);
    assert!(parsed.lyrics.is_empty());
    assert!(parsed.diagnostics.is_empty());
}

#[test]
fn midly_reads_rebuilt_karaoke_file() {
    let parsed = parse_midi(&source_song(), TAG).unwrap();
    let chords = [ChordEvent::new("C", 0), ChordEvent::new("G", 960)];
    let out = build_midi(&parsed.midi, Some(&song_info()), Some(&song_lines()), Some(&chords), TAG).unwrap();

    let smf = Smf::parse(&out).unwrap();
    assert_eq!(smf.tracks.len(), 3);
    let markers: Vec<&[u8]> = smf.tracks[0]
        .iter()
        .filter_map(|e| match &e.kind {
            TrackEventKind::Meta(MetaMessage::Marker(m)) => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(markers, vec![&b"C"[..], &b"G"[..]]);
    assert!(matches!(
        smf.tracks[2][0].kind,
        TrackEventKind::Meta(MetaMessage::Text(b"@KLyr"))
    ));

    let back = parse_midi(&out, TAG).unwrap();
    assert_eq!(back.lyrics, song_lines());
    assert_eq!(back.song_info.title(), Some("รักเธอ"));
    assert_eq!(back.chords, chords.to_vec());
}

#[test]
fn rewrite_is_stable() {
    let first = smf::parse(&source_song()).unwrap();
    let bytes = smf::write(&first).unwrap();
    let second = smf::parse(&bytes).unwrap();
    assert_eq!(second, first);
    assert_eq!(smf::write(&second).unwrap(), bytes);
}

#[test]
fn package_round_trip_through_disk() {
    let parsed = parse_midi(&source_song(), TAG).unwrap();
    let mid = build_midi(&parsed.midi, Some(&song_info()), Some(&song_lines()), None, TAG).unwrap();
    let parsed = parse_midi(&mid, TAG).unwrap();

    let words = LyricWordData::from_lines(&parsed.lyrics, 480.0);
    let segment = generate_cursor_segment(&words, CursorMode::Midi { ticks_per_beat: 480 });
    let cur = segment.export();
    let lyr_bytes = lyr::build(&parsed.song_info, &parsed.lyrics);

    let archive = build_emk(&[
        (emk::TAG_MIDI, mid.as_slice()),
        (emk::TAG_LYRIC, lyr_bytes.as_slice()),
        (emk::TAG_CURSOR, cur.as_slice()),
    ])
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.emk");
    fs::write(&path, &archive).unwrap();
    let back = parse_emk(&fs::read(&path).unwrap()).unwrap();

    assert!(back.errors.is_empty());
    assert_eq!(back.mid.as_deref(), Some(mid.as_slice()));
    assert_eq!(back.cur.as_deref(), Some(cur.as_slice()));
    let text = lyr::LyrText::parse_text(back.lyr.as_deref().unwrap());
    assert_eq!(text.title, "รักเธอ");
    assert_eq!(text.lines, vec!["รักเธอ".to_string(), "ตลอด".to_string()]);

    // six characters and four characters, each line closed by one unit
    let units = parse_cur(&cur);
    assert_eq!(units.len(), 12);
    assert!(units.windows(2).all(|w| w[0] <= w[1]), "{units:?}");
    assert_eq!(units[0], 24);
}

#[test]
fn preview_index_follows_lines() {
    let idx = LyricRangeIndex::from_lines(&song_lines(), 480);
    assert!(idx.search(0).is_none());
    assert_eq!(idx.search(1000).map(|h| *h.value()), Some(0));
    assert_eq!(idx.search(1440).map(|h| *h.value()), Some(1));
    assert_eq!(idx.get_next(500).map(|h| h.entry.start), Some(1440));
}

#[test]
fn mp3_payload_travels_in_id3() {
    let lines = vec![vec![LyricEvent::new("ฝัน", 12_345), LyricEvent::new("ดี", 13_000)]];
    let info = song_info().with(SongField::SongType, TimingMode::Mp3.to_string());
    let payload = encode_klyr(&info, &lines, TimingMode::Mp3).unwrap();

    let audio = [0xFFu8, 0xFB, 0x90, 0x44, 0, 0];
    let mp3 = id3::embed_klyr(&audio, &format!("{TAG}{payload}")).unwrap();
    let found = id3::extract_klyr(&mp3).unwrap().unwrap();

    let (back_info, back_lines) = decode_klyr(&found, TAG).unwrap();
    assert_eq!(back_lines, lines);
    assert_eq!(back_info.song_type(), Some(TimingMode::Mp3));
}
