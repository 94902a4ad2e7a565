//! KLyr payload carried in an MP3's ID3v2 tag, as a `TXXX` frame with the
//! description `KLyr`.
//!
//! Only v2.3 and v2.4 tags are handled. Other frames are copied through
//! untouched; the extended header and the v2.4 footer are dropped on rewrite.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::error::{KaraokeError, Result};

pub const KLYR_DESCRIPTION: &str = "KLyr";

const HEADER_LEN: usize = 10;
const FLAG_UNSYNC: u8 = 0x80;
const FLAG_EXTENDED: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;
const ENC_LATIN1: u8 = 0;
const ENC_UTF8: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    id: [u8; 4],
    flags: u16,
    body: Vec<u8>,
}

impl Frame {
    fn klyr(payload: &str) -> Self {
        let mut body = vec![ENC_LATIN1];
        body.extend_from_slice(KLYR_DESCRIPTION.as_bytes());
        body.push(0);
        body.extend_from_slice(payload.as_bytes());
        Frame { id: *b"TXXX", flags: 0, body }
    }

    /// `(description, value)` of a single-byte-encoded TXXX frame.
    fn user_text(&self) -> Option<(&[u8], &[u8])> {
        if &self.id != b"TXXX" {
            return None;
        }
        let (&enc, rest) = self.body.split_first()?;
        if enc != ENC_LATIN1 && enc != ENC_UTF8 {
            return None;
        }
        let nul = rest.iter().position(|&b| b == 0)?;
        Some((&rest[..nul], &rest[nul + 1..]))
    }

    fn is_klyr(&self) -> bool {
        self.user_text()
            .is_some_and(|(desc, _)| desc == KLYR_DESCRIPTION.as_bytes())
    }
}

struct Tag {
    major: u8,
    frames: Vec<Frame>,
    audio_start: usize,
}

fn syncsafe(b: &[u8]) -> u32 {
    b.iter().take(4).fold(0, |acc, &x| (acc << 7) | (x & 0x7F) as u32)
}

fn to_syncsafe(v: u32) -> [u8; 4] {
    [
        ((v >> 21) & 0x7F) as u8,
        ((v >> 14) & 0x7F) as u8,
        ((v >> 7) & 0x7F) as u8,
        (v & 0x7F) as u8,
    ]
}

fn read_tag(buf: &[u8]) -> Result<Option<Tag>> {
    if buf.len() < HEADER_LEN || &buf[..3] != b"ID3" {
        return Ok(None);
    }
    let major = buf[3];
    if major != 3 && major != 4 {
        return Err(KaraokeError::format(format!("unsupported ID3v2.{major} tag")));
    }
    let flags = buf[5];
    if flags & FLAG_UNSYNC != 0 {
        return Err(KaraokeError::format("unsynchronised ID3 tags are not supported"));
    }
    let end = HEADER_LEN + syncsafe(&buf[6..10]) as usize;
    if end > buf.len() {
        return Err(KaraokeError::truncated(buf.len(), "ID3 tag"));
    }

    let mut pos = HEADER_LEN;
    if flags & FLAG_EXTENDED != 0 {
        let ext = buf.get(pos..pos + 4).ok_or_else(|| KaraokeError::truncated(pos, "ID3 extended header"))?;
        pos += match major {
            4 => syncsafe(ext) as usize,
            _ => BigEndian::read_u32(ext) as usize + 4,
        };
    }

    let mut frames = Vec::new();
    while pos + HEADER_LEN <= end && buf[pos] != 0 {
        let head = &buf[pos..pos + HEADER_LEN];
        let size = match major {
            4 => syncsafe(&head[4..8]),
            _ => BigEndian::read_u32(&head[4..8]),
        } as usize;
        let body_start = pos + HEADER_LEN;
        let body = buf
            .get(body_start..body_start + size)
            .filter(|_| body_start + size <= end)
            .ok_or_else(|| KaraokeError::truncated(body_start, "ID3 frame"))?;
        frames.push(Frame {
            id: [head[0], head[1], head[2], head[3]],
            flags: BigEndian::read_u16(&head[8..10]),
            body: body.to_vec(),
        });
        pos = body_start + size;
    }

    let footer = if major == 4 && flags & FLAG_FOOTER != 0 { HEADER_LEN } else { 0 };
    Ok(Some(Tag { major, frames, audio_start: (end + footer).min(buf.len()) }))
}

/// The embedded KLyr payload, if the file has one.
pub fn extract_klyr(mp3: &[u8]) -> Result<Option<String>> {
    let Some(tag) = read_tag(mp3)? else {
        return Ok(None);
    };
    Ok(tag.frames.iter().find(|f| f.is_klyr()).and_then(|f| {
        let (_, value) = f.user_text()?;
        let value = String::from_utf8_lossy(value);
        Some(value.trim_end_matches('\0').to_string())
    }))
}

/// Store `payload` in the tag, replacing any previous KLyr frame.
pub fn embed_klyr(mp3: &[u8], payload: &str) -> Result<Vec<u8>> {
    let (major, mut frames, audio) = match read_tag(mp3)? {
        Some(tag) => (tag.major, tag.frames, &mp3[tag.audio_start..]),
        None => (3, Vec::new(), mp3),
    };
    let before = frames.len();
    frames.retain(|f| !f.is_klyr());
    debug!("id3: replaced {} KLyr frame(s), keeping {}", before - frames.len(), frames.len());
    frames.push(Frame::klyr(payload));

    let mut body = Vec::new();
    for f in &frames {
        body.extend_from_slice(&f.id);
        let size = f.body.len() as u32;
        match major {
            4 => body.extend_from_slice(&to_syncsafe(size)),
            _ => body.extend_from_slice(&size.to_be_bytes()),
        }
        body.extend_from_slice(&f.flags.to_be_bytes());
        body.extend_from_slice(&f.body);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + audio.len());
    out.extend_from_slice(b"ID3");
    out.extend_from_slice(&[major, 0, 0]);
    out.extend_from_slice(&to_syncsafe(body.len() as u32));
    out.extend_from_slice(&body);
    out.extend_from_slice(audio);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIO: &[u8] = &[0xFF, 0xFB, 0x90, 0x00, 1, 2, 3];

    fn frame_v23(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(body);
        out
    }

    fn tag_v23(frames: &[u8], padding: usize) -> Vec<u8> {
        let mut out = b"ID3\x03\x00\x00".to_vec();
        out.extend_from_slice(&to_syncsafe((frames.len() + padding) as u32));
        out.extend_from_slice(frames);
        out.extend(std::iter::repeat_n(0, padding));
        out
    }

    #[test]
    fn syncsafe_values() {
        assert_eq!(to_syncsafe(257), [0, 0, 2, 1]);
        assert_eq!(syncsafe(&[0, 0, 2, 1]), 257);
        assert_eq!(syncsafe(&to_syncsafe(0x0FFF_FFFF)), 0x0FFF_FFFF);
    }

    #[test]
    fn bare_audio_gets_a_new_tag() {
        let out = embed_klyr(AUDIO, "KLyrHdr1abc").unwrap();
        assert_eq!(&out[..4], b"ID3\x03");
        assert!(out.ends_with(AUDIO));
        assert_eq!(extract_klyr(&out).unwrap().as_deref(), Some("KLyrHdr1abc"));
        assert_eq!(extract_klyr(AUDIO).unwrap(), None);
    }

    #[test]
    fn replaces_klyr_and_keeps_other_frames() {
        let mut frames = frame_v23(b"TIT2", b"\x00Title");
        frames.extend(frame_v23(b"TXXX", b"\x00KLyr\x00old"));
        frames.extend(frame_v23(b"TXXX", b"\x00Other\x00keep"));
        let mut mp3 = tag_v23(&frames, 32);
        mp3.extend_from_slice(AUDIO);

        let out = embed_klyr(&mp3, "new").unwrap();
        let tag = read_tag(&out).unwrap().unwrap();
        let ids: Vec<&[u8]> = tag.frames.iter().map(|f| &f.id[..]).collect();
        assert_eq!(ids, vec![&b"TIT2"[..], &b"TXXX"[..], &b"TXXX"[..]]);
        assert_eq!(tag.frames[1].user_text().unwrap().0, b"Other");
        assert_eq!(extract_klyr(&out).unwrap().as_deref(), Some("new"));
        assert_eq!(&out[tag.audio_start..], AUDIO);
    }

    #[test]
    fn unsynchronised_tags_are_rejected() {
        let mut mp3 = tag_v23(&[], 4);
        mp3[5] = FLAG_UNSYNC;
        assert!(matches!(extract_klyr(&mp3), Err(KaraokeError::Format(_))));
    }

    #[test]
    fn oversized_frame_is_truncated_data() {
        let mut frames = frame_v23(b"TXXX", b"\x00KLyr\x00abc");
        frames[7] = 0x40;
        let mp3 = tag_v23(&frames, 0);
        assert!(matches!(
            extract_klyr(&mp3),
            Err(KaraokeError::TruncatedData { context: "ID3 frame", .. })
        ));
    }
}
