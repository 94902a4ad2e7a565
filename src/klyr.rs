//! klyr.rs
//!
//! The compressed lyric payload embedded in karaoke MIDI meta text and MP3 tags.
//!
//! Wire form: `<headerTag><base64(zlib(codepage(xml)))>` where the XML is
//!
//! ```text
//! <SONG_LYRIC>
//!   <INFO><TITLE>..</TITLE>..</INFO>
//!   <LYRIC><LINE><WORD><TIME/><TEXT/><VOCAL/></WORD>..</LINE>..</LYRIC>
//! </SONG_LYRIC>
//! ```

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use log::debug;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::error::{KaraokeError, Result};
use crate::song::{LyricEvent, LyricLines, SongField, SongInfo, TimingMode};
use crate::thai;

/// Header tag written in front of new payloads.
pub const DEFAULT_HEADER_TAG: &str = "KLyrHdr1";

const HEADER_PREFIX: &str = "KLyrHdr";

/// Split `KLyrHdr<digits><payload>` into header and payload.
pub fn split_header(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix(HEADER_PREFIX)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    Some(text.split_at(HEADER_PREFIX.len() + digits))
}

/// True when `text` starts with a header tag.
pub fn has_header(text: &str) -> bool {
    split_header(text).is_some()
}

/// Serialize song info and lyric lines to the payload XML.
pub fn to_xml(info: &SongInfo, lines: &[Vec<LyricEvent>], mode: TimingMode) -> String {
    let mut xml = String::with_capacity(256 + lines.len() * 96);
    xml.push_str("<?xml version=\"1.0\" encoding=\"TIS-620\"?>\r\n");
    xml.push_str("<SONG_LYRIC>");

    xml.push_str("<INFO>");
    for (field, value) in info.iter() {
        push_element(&mut xml, field.tag(), value);
    }
    xml.push_str("</INFO>");

    xml.push_str("<LYRIC>");
    for line in lines {
        xml.push_str("<LINE>");
        for word in line {
            xml.push_str("<WORD>");
            push_element(&mut xml, "TIME", &format_time(word.tick, mode));
            push_element(&mut xml, "TEXT", &word.text);
            if let Some(vocal) = &word.vocal {
                push_element(&mut xml, "VOCAL", vocal);
            }
            xml.push_str("</WORD>");
        }
        xml.push_str("</LINE>");
    }
    xml.push_str("</LYRIC>");

    xml.push_str("</SONG_LYRIC>");
    xml
}

fn push_element(xml: &mut String, tag: &str, value: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push('>');
    xml.push_str(&escape(value));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push('>');
}

fn format_time(tick: u32, mode: TimingMode) -> String {
    match mode {
        TimingMode::Midi => tick.to_string(),
        TimingMode::Mp3 => format!("{}.{:03}", tick / 1000, tick % 1000),
    }
}

/// Integer ticks, or decimal seconds which become milliseconds.
fn parse_time(s: &str) -> Result<u32> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if s.contains('.') {
        let secs: f64 = s
            .parse()
            .map_err(|_| KaraokeError::payload(format!("bad TIME '{s}'")))?;
        return Ok((secs * 1000.0).round().max(0.0) as u32);
    }
    s.parse()
        .map_err(|_| KaraokeError::payload(format!("bad TIME '{s}'")))
}

/// Encode to the base64 payload (without header tag).
pub fn encode(info: &SongInfo, lines: &[Vec<LyricEvent>], mode: TimingMode) -> Result<String> {
    let xml = to_xml(info, lines, mode);
    let raw = thai::encode(&xml);

    let mut enc = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    enc.write_all(&raw)?;
    let compressed = enc.finish()?;

    Ok(STANDARD.encode(compressed))
}

/// Encode and prepend the header tag, ready to store as meta text.
pub fn encode_with_header(
    info: &SongInfo,
    lines: &[Vec<LyricEvent>],
    mode: TimingMode,
    header_tag: &str,
) -> Result<String> {
    Ok(format!("{header_tag}{}", encode(info, lines, mode)?))
}

/// Decode a payload, with or without its header tag.
pub fn decode(payload: &str, header_tag: &str) -> Result<(SongInfo, LyricLines)> {
    let body = match payload.strip_prefix(header_tag) {
        Some(rest) if !header_tag.is_empty() => rest,
        _ => split_header(payload).map_or(payload, |(_, rest)| rest),
    };

    let compressed = STANDARD
        .decode(repair_base64(body))
        .map_err(KaraokeError::payload)?;
    let raw = inflate(&compressed)?;
    let xml = thai::decode(&raw);
    debug!("klyr payload: {} compressed, {} xml bytes", compressed.len(), raw.len());

    from_xml(&xml)
}

/// Drop whitespace and restore `=` padding some writers leave off.
fn repair_base64(body: &str) -> String {
    let mut s: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    while s.len() % 4 != 0 {
        s.push('=');
    }
    s
}

/// zlib first, raw deflate as a fallback for headerless streams.
fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    if ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(KaraokeError::payload)?;
    Ok(out)
}

#[derive(Default)]
struct WordBuilder {
    time: Option<String>,
    text: String,
    vocal: Option<String>,
}

/// Parse payload XML back into song info and lines.
pub fn from_xml(xml: &str) -> Result<(SongInfo, LyricLines)> {
    let mut reader = Reader::from_str(xml);

    let mut info = SongInfo::new();
    let mut lines: LyricLines = Vec::new();
    let mut saw_root = false;
    let mut depth = 0usize;
    let mut in_info = false;
    let mut word: Option<WordBuilder> = None;
    let mut leaf: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader.read_event().map_err(KaraokeError::payload)?;
        match event {
            Event::Start(e) => {
                depth += 1;
                match e.name().as_ref() {
                    b"SONG_LYRIC" => saw_root = true,
                    b"INFO" => in_info = true,
                    b"LYRIC" => {}
                    b"LINE" => lines.push(Vec::new()),
                    b"WORD" => word = Some(WordBuilder::default()),
                    other => {
                        leaf = Some(String::from_utf8_lossy(other).into_owned());
                        text.clear();
                    }
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                close_leaf(&name, "", in_info, &mut info, word.as_mut())?;
            }
            Event::Text(t) => {
                if leaf.is_some() {
                    text.push_str(&t.unescape().map_err(KaraokeError::payload)?);
                }
            }
            Event::CData(c) => {
                if leaf.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.name().as_ref() {
                    b"INFO" => in_info = false,
                    b"WORD" => {
                        if let Some(w) = word.take() {
                            let tick = parse_time(w.time.as_deref().unwrap_or(""))?;
                            let ev = LyricEvent { text: w.text, tick, vocal: w.vocal };
                            match lines.last_mut() {
                                Some(line) => line.push(ev),
                                None => lines.push(vec![ev]),
                            }
                        }
                    }
                    _ => {
                        if let Some(name) = leaf.take() {
                            close_leaf(&name, &text, in_info, &mut info, word.as_mut())?;
                            text.clear();
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(KaraokeError::payload("missing SONG_LYRIC root"));
    }
    if depth != 0 {
        return Err(KaraokeError::payload("unclosed element at end of payload"));
    }
    Ok((info, lines))
}

fn close_leaf(
    name: &str,
    value: &str,
    in_info: bool,
    info: &mut SongInfo,
    word: Option<&mut WordBuilder>,
) -> Result<()> {
    if let Some(w) = word {
        match name {
            "TIME" => w.time = Some(value.to_string()),
            "TEXT" => w.text = value.to_string(),
            "VOCAL" => w.vocal = Some(value.to_string()),
            _ => debug!("ignoring WORD child <{name}>"),
        }
    } else if in_info {
        match SongField::from_tag(name) {
            Some(field) => info.set(field, value),
            None => debug!("ignoring INFO field <{name}>"),
        }
    }
    Ok(())
}
