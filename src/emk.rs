//! emk.rs
//!
//! The `.emk` archive: zlib-compressed sections with a record directory,
//! XORed as a whole with a fixed 8-byte key.
//!
//! Layout before the XOR pass:
//!
//! ```text
//! 0x00  ".SFDS"                     magic
//! 0x05  29 zero bytes               reserved
//! 0x22  u32 LE header_pos           start of the record directory
//! 0x26  u32 LE header_end           end of the record directory
//! 0x2A  section data                compressed, back to back
//! ....  records                     one "SFDS" record per section
//! ```
//!
//! Record fields are `(type, value)` pairs: type 2 = u8, 3 = u16 LE,
//! 4 = u32 LE, 6 = u8 length + bytes.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::{debug, warn};

use crate::error::{KaraokeError, Result};
use crate::thai;

pub const XOR_KEY: [u8; 8] = [0xAF, 0xF2, 0x4C, 0x9C, 0xE9, 0xEA, 0x99, 0x43];
pub const MAGIC: &[u8; 5] = b".SFDS";
pub const RECORD_MAGIC: &[u8; 4] = b"SFDS";

pub const TAG_MIDI: &str = "MIDI_DATA";
pub const TAG_LYRIC: &str = "LYRIC_DATA";
pub const TAG_CURSOR: &str = "CURSOR_DATA";

const RESERVED_LEN: usize = 29;
const HEADER_POS_OFFSET: usize = MAGIC.len() + RESERVED_LEN;
/// First byte of section data.
pub const DATA_BASE: u32 = (HEADER_POS_OFFSET + 8) as u32;
const UNKNOWN_SENTINEL: u32 = 0xFFFF_FFFF;
const RECORD_PAD: usize = 16;

const TYPE_U8: u8 = 2;
const TYPE_U16: u8 = 3;
const TYPE_U32: u8 = 4;
const TYPE_STR: u8 = 6;

/// XOR `buf` in place with the cycled key. Applying it twice is a no-op.
pub fn xor(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= XOR_KEY[i % XOR_KEY.len()];
    }
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub tag: String,
    pub raw_bytes: Vec<u8>,
    pub compressed_bytes: Vec<u8>,
    pub uncompressed_size: u32,
}

impl Section {
    /// Compress `raw` at level 9.
    pub fn new(tag: impl Into<String>, raw: Vec<u8>) -> Result<Self> {
        let tag = tag.into();
        if tag.len() > u8::MAX as usize {
            return Err(KaraokeError::format(format!("section tag too long: {tag}")));
        }
        let mut enc = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::best());
        enc.write_all(&raw)?;
        let compressed_bytes = enc.finish()?;
        Ok(Self {
            tag,
            uncompressed_size: raw.len() as u32,
            raw_bytes: raw,
            compressed_bytes,
        })
    }
}

/// Collects sections and assembles the archive.
#[derive(Debug, Default)]
pub struct EmkBuilder {
    sections: Vec<Section>,
}

impl EmkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a section. Lyric text is passed through the code page on the way in.
    pub fn add_section(&mut self, tag: &str, bytes: &[u8]) -> Result<&mut Self> {
        let raw = if tag == TAG_LYRIC {
            thai::encode(&thai::decode(bytes))
        } else {
            bytes.to_vec()
        };
        self.sections.push(Section::new(tag, raw)?);
        Ok(self)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Assemble and encrypt.
    pub fn build(&self) -> Result<Vec<u8>> {
        assemble(&self.sections)
    }
}

/// Build an archive from `(tag, bytes)` pairs.
pub fn build(sections: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut builder = EmkBuilder::new();
    for (tag, bytes) in sections {
        builder.add_section(tag, bytes)?;
    }
    builder.build()
}

fn put_u8(out: &mut Vec<u8>, v: u8) -> Result<()> {
    out.write_u8(TYPE_U8)?;
    out.write_u8(v)?;
    Ok(())
}

fn put_u16(out: &mut Vec<u8>, v: u16) -> Result<()> {
    out.write_u8(TYPE_U16)?;
    out.write_u16::<LittleEndian>(v)?;
    Ok(())
}

fn put_u32(out: &mut Vec<u8>, v: u32) -> Result<()> {
    out.write_u8(TYPE_U32)?;
    out.write_u32::<LittleEndian>(v)?;
    Ok(())
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.write_u8(TYPE_STR)?;
    out.write_u8(s.len() as u8)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn assemble(sections: &[Section]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut records = Vec::new();

    for s in sections {
        let start = DATA_BASE + data.len() as u32;
        data.extend_from_slice(&s.compressed_bytes);
        let end = DATA_BASE + data.len() as u32;

        records.write_all(RECORD_MAGIC)?;
        put_str(&mut records, &s.tag)?;
        put_u32(&mut records, s.uncompressed_size)?;
        put_u32(&mut records, UNKNOWN_SENTINEL)?;
        put_u32(&mut records, start)?;
        put_u32(&mut records, end)?;
        put_u8(&mut records, 0)?;
        put_u16(&mut records, 0)?;
        records.write_all(&[0u8; RECORD_PAD])?;
        put_u32(&mut records, 0)?;
        put_u32(&mut records, 0)?;
        debug!("emk: {} [{start}, {end}) {} bytes raw", s.tag, s.uncompressed_size);
    }

    let header_pos = DATA_BASE + data.len() as u32;
    let header_end = header_pos + records.len() as u32;

    let mut out = Vec::with_capacity(header_end as usize);
    out.write_all(MAGIC)?;
    out.write_all(&[0u8; RESERVED_LEN])?;
    out.write_u32::<LittleEndian>(header_pos)?;
    out.write_u32::<LittleEndian>(header_end)?;
    out.write_all(&data)?;
    out.write_all(&records)?;

    xor(&mut out);
    Ok(out)
}

/// Files recovered from an archive.
#[derive(Debug, Default)]
pub struct EmkArchive {
    pub mid: Option<Vec<u8>>,
    pub lyr: Option<String>,
    pub cur: Option<Vec<u8>>,
    /// Every section that decoded, in directory order.
    pub sections: Vec<Section>,
    /// Sections that failed, with the reason.
    pub errors: Vec<KaraokeError>,
}

impl EmkArchive {
    /// `LYRIC_DATA` exactly as stored, before code page decoding.
    pub fn lyric_bytes(&self) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.tag == TAG_LYRIC)
            .map(|s| s.raw_bytes.as_slice())
    }
}

#[derive(Debug)]
enum Field {
    Byte(u8),
    Word(u16),
    Dword(u32),
    Str(Vec<u8>),
}

impl Field {
    fn as_u32(&self) -> Option<u32> {
        match *self {
            Field::Byte(v) => Some(v as u32),
            Field::Word(v) => Some(v as u32),
            Field::Dword(v) => Some(v),
            Field::Str(_) => None,
        }
    }
}

struct RecordReader<'a> {
    r: Cursor<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    fn offset(&self) -> usize {
        self.r.position() as usize
    }

    fn eof(&self, context: &'static str) -> KaraokeError {
        KaraokeError::truncated(self.offset(), context)
    }

    fn field(&mut self) -> Result<Field> {
        let ty = self.r.read_u8().map_err(|_| self.eof("record field type"))?;
        let field = match ty {
            TYPE_U8 => Field::Byte(self.r.read_u8().map_err(|_| self.eof("u8 field"))?),
            TYPE_U16 => Field::Word(
                self.r
                    .read_u16::<LittleEndian>()
                    .map_err(|_| self.eof("u16 field"))?,
            ),
            TYPE_U32 => Field::Dword(
                self.r
                    .read_u32::<LittleEndian>()
                    .map_err(|_| self.eof("u32 field"))?,
            ),
            TYPE_STR => {
                let len = self.r.read_u8().map_err(|_| self.eof("string length"))? as usize;
                let mut buf = vec![0u8; len];
                self.r.read_exact(&mut buf).map_err(|_| self.eof("string field"))?;
                Field::Str(buf)
            }
            other => {
                return Err(KaraokeError::format(format!(
                    "unknown record field type {other} at offset {}",
                    self.offset() - 1
                )));
            }
        };
        Ok(field)
    }

    fn number(&mut self, what: &str) -> Result<u32> {
        let at = self.offset();
        self.field()?
            .as_u32()
            .ok_or_else(|| KaraokeError::format(format!("expected number for {what} at offset {at}")))
    }

    fn string(&mut self) -> Result<String> {
        let at = self.offset();
        match self.field()? {
            Field::Str(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(KaraokeError::format(format!(
                "expected tag string at offset {at}, got {other:?}"
            ))),
        }
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        let mut buf = vec![0u8; n];
        self.r.read_exact(&mut buf).map_err(|_| self.eof("record padding"))?;
        Ok(())
    }
}

struct Record {
    tag: String,
    uncompressed_size: u32,
    start: u32,
    end: u32,
}

/// Decrypt and unpack an archive.
///
/// Bad magic or a malformed directory fails the call; a section that does not
/// inflate to its declared size is reported in `errors` and skipped.
pub fn parse(bytes: &[u8]) -> Result<EmkArchive> {
    let mut buf = bytes.to_vec();
    xor(&mut buf);

    if buf.len() < DATA_BASE as usize || &buf[..MAGIC.len()] != MAGIC {
        return Err(KaraokeError::format("not an EMK archive"));
    }
    let mut head = Cursor::new(&buf[HEADER_POS_OFFSET..DATA_BASE as usize]);
    let header_pos = head.read_u32::<LittleEndian>()? as usize;
    let header_end = head.read_u32::<LittleEndian>()? as usize;
    if header_pos < DATA_BASE as usize || header_pos > header_end || header_end > buf.len() {
        return Err(KaraokeError::format(format!(
            "directory [{header_pos}, {header_end}) outside archive of {} bytes",
            buf.len()
        )));
    }

    let mut rr = RecordReader { r: Cursor::new(&buf[..header_end]) };
    rr.r.set_position(header_pos as u64);
    let mut records = Vec::new();
    while rr.offset() < header_end {
        let at = rr.offset();
        let mut magic = [0u8; 4];
        rr.r.read_exact(&mut magic).map_err(|_| rr.eof("record magic"))?;
        if &magic != RECORD_MAGIC {
            return Err(KaraokeError::format(format!("bad record magic at offset {at}")));
        }
        let tag = rr.string()?;
        let uncompressed_size = rr.number("uncompressed size")?;
        rr.field()?;
        let start = rr.number("data start")?;
        let end = rr.number("data end")?;
        rr.field()?;
        rr.field()?;
        rr.skip(RECORD_PAD)?;
        rr.field()?;
        rr.field()?;
        records.push(Record { tag, uncompressed_size, start, end });
    }

    let mut archive = EmkArchive::default();
    for rec in records {
        match read_section(&buf, &rec) {
            Ok(section) => {
                match section.tag.as_str() {
                    TAG_MIDI => archive.mid = Some(section.raw_bytes.clone()),
                    TAG_LYRIC => archive.lyr = Some(thai::decode(&section.raw_bytes)),
                    TAG_CURSOR => archive.cur = Some(section.raw_bytes.clone()),
                    other => debug!("emk: keeping unrecognised section {other}"),
                }
                archive.sections.push(section);
            }
            Err(e) => {
                warn!("emk: section {} unreadable: {e}", rec.tag);
                archive.errors.push(e);
            }
        }
    }
    Ok(archive)
}

fn read_section(buf: &[u8], rec: &Record) -> Result<Section> {
    let (start, end) = (rec.start as usize, rec.end as usize);
    if start > end {
        return Err(KaraokeError::format(format!(
            "section {}: range [{start}, {end}) is reversed",
            rec.tag
        )));
    }
    let compressed = buf
        .get(start..end)
        .ok_or_else(|| KaraokeError::truncated(start, "section data"))?;

    let mut raw = Vec::with_capacity(rec.uncompressed_size as usize);
    ZlibDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|e| KaraokeError::format(format!("section {}: {e}", rec.tag)))?;
    if raw.len() != rec.uncompressed_size as usize {
        return Err(KaraokeError::SizeMismatch {
            tag: rec.tag.clone(),
            expected: rec.uncompressed_size,
            actual: raw.len(),
        });
    }

    Ok(Section {
        tag: rec.tag.clone(),
        raw_bytes: raw,
        compressed_bytes: compressed.to_vec(),
        uncompressed_size: rec.uncompressed_size,
    })
}
