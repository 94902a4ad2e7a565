//! thai.rs
//!
//! The legacy single-byte Thai code page (TIS-620 with the CP874 no-break space)
//! and the grapheme-like clustering used by the cursor generator.
//!
//! The code page maps the Thai block onto the upper half of a byte with a fixed
//! additive offset: `0xA1` is U+0E01 (KO KAI), `0xFB` is U+0E5B. Two holes
//! (`0xDB..=0xDE` and `0xFC..=0xFF`) have no Thai character.

/// Difference between a Thai code point and its byte.
const THAI_OFFSET: u32 = 0x0E01 - 0xA1;

/// Byte -> char table, built once at compile time.
static DECODE_TABLE: [char; 256] = build_decode_table();

const fn byte_is_thai(b: u8) -> bool {
    matches!(b, 0xA1..=0xDA | 0xDF..=0xFB)
}

const fn build_decode_table() -> [char; 256] {
    let mut table = ['\u{FFFD}'; 256];
    let mut i = 0usize;
    while i < 256 {
        let b = i as u8;
        table[i] = if b < 0x80 {
            b as char
        } else if b == 0xA0 {
            '\u{00A0}'
        } else if byte_is_thai(b) {
            match char::from_u32(b as u32 + THAI_OFFSET) {
                Some(c) => c,
                None => '\u{FFFD}',
            }
        } else {
            '\u{FFFD}'
        };
        i += 1;
    }
    table
}

/// Map one char to its code-page byte, if it has one.
pub fn encode_char(c: char) -> Option<u8> {
    let cp = c as u32;
    if cp < 0x80 {
        return Some(cp as u8);
    }
    if c == '\u{00A0}' {
        return Some(0xA0);
    }
    let b = cp.checked_sub(THAI_OFFSET)?;
    if b <= 0xFF && byte_is_thai(b as u8) {
        Some(b as u8)
    } else {
        None
    }
}

/// Transcode text to the code page. Unrepresentable characters become `?`.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars().map(|c| encode_char(c).unwrap_or(b'?')).collect()
}

/// Transcode code-page bytes back to text.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| DECODE_TABLE[b as usize]).collect()
}

/// True for the marks that sit on or under the preceding base character.
pub fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0E31}' | '\u{0E34}'..='\u{0E3A}' | '\u{0E47}'..='\u{0E4E}')
}

/// Leading vowels (SARA E .. SARA AI MAIMALAI) are written before the consonant
/// they belong to and never take a mark.
pub fn is_leading_vowel(c: char) -> bool {
    matches!(c, '\u{0E40}'..='\u{0E44}')
}

/// One visual cursor unit: a base character and the marks attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThaiCharCluster {
    pub chars: Vec<char>,
}

impl ThaiCharCluster {
    fn new(base: char) -> Self {
        Self { chars: vec![base] }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Whether a following mark may join this cluster.
    fn absorbs_marks(&self) -> bool {
        self.chars.first().is_some_and(|&c| !is_leading_vowel(c))
    }
}

/// Split text into cursor clusters.
pub fn clusters(text: &str) -> Vec<ThaiCharCluster> {
    let mut out: Vec<ThaiCharCluster> = Vec::new();
    for c in text.chars() {
        match out.last_mut() {
            Some(cur) if is_combining_mark(c) && cur.absorbs_marks() => cur.chars.push(c),
            _ => out.push(ThaiCharCluster::new(c)),
        }
    }
    out
}
