use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::{fs, path::{Path, PathBuf}};

use karaoke_codec::{
    CursorMode, DEFAULT_HEADER_TAG, LyricWordData, TimingMode, cursor, emk, id3, klyr, smf,
};

#[derive(Parser, Debug)]
#[command(name = "karaoke-codec", about = "Inspect, unpack and build karaoke song files")]
struct Opt {
    /// Header tag in front of the embedded lyric payload.
    #[arg(long, global = true, default_value = DEFAULT_HEADER_TAG)]
    header_tag: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print song info, lyric lines and chords of a karaoke MIDI.
    Info { midi: PathBuf },
    /// Extract song.mid, song.lyr and song.cur from an .emk archive.
    Unpack { emk: PathBuf, dir: PathBuf },
    /// Build an .emk archive.
    Pack {
        #[arg(long)]
        mid: PathBuf,
        #[arg(long)]
        lyr: Option<PathBuf>,
        #[arg(long)]
        cur: Option<PathBuf>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Regenerate a .cur file from the lyrics embedded in a MIDI or MP3.
    Cursor {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Timing mode (MIDI or MP3); detected from the file when omitted.
        #[arg(long)]
        mode: Option<TimingMode>,
        /// Override the file's ticks per beat.
        #[arg(long)]
        ticks_per_beat: Option<u16>,
        /// One unit per raw character instead of per cluster.
        #[arg(long, default_value_t = false)]
        legacy: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    match opt.cmd {
        Cmd::Info { midi } => info_cmd(&midi, &opt.header_tag),
        Cmd::Unpack { emk, dir } => unpack(&emk, &dir),
        Cmd::Pack { mid, lyr, cur, out } => pack(&mid, lyr.as_deref(), cur.as_deref(), &out),
        Cmd::Cursor { input, out, mode, ticks_per_beat, legacy } => {
            let out = out.unwrap_or_else(|| input.with_extension("cur"));
            cursor_cmd(&input, &out, mode, ticks_per_beat, legacy, &opt.header_tag)
        }
    }
}

fn info_cmd(path: &Path, header_tag: &str) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed = smf::parse_karaoke(&bytes, header_tag)?;
    for d in &parsed.diagnostics {
        warn!("{d}");
    }

    println!("Format {}, {} tracks, {} ticks/beat", parsed.midi.format, parsed.midi.tracks.len(), parsed.midi.ticks_per_beat);
    match parsed.first_note_tick {
        Some(t) => println!("First note at tick {t}"),
        None => println!("No notes"),
    }

    println!("\nSong info:");
    for (field, value) in parsed.song_info.iter() {
        println!("  {:<15} {}", field.tag(), value);
    }

    println!("\nLyrics ({} lines):", parsed.lyrics.len());
    for line in &parsed.lyrics {
        let tick = line.first().map_or(0, |w| w.tick);
        let text: String = line.iter().map(|w| w.text.as_str()).collect();
        println!("  {tick:>8}  {text}");
    }

    println!("\nChords ({}):", parsed.chords.len());
    for c in &parsed.chords {
        println!("  {:>8}  {}", c.tick, c.chord);
    }
    Ok(())
}

fn unpack(path: &Path, dir: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let archive = emk::parse(&bytes)?;
    for e in &archive.errors {
        warn!("skipped section: {e}");
    }
    fs::create_dir_all(dir)?;

    let mut written = 0;
    if let Some(mid) = &archive.mid {
        fs::write(dir.join("song.mid"), mid)?;
        written += 1;
    }
    if let Some(lyr) = archive.lyric_bytes() {
        fs::write(dir.join("song.lyr"), lyr)?;
        written += 1;
    }
    if let Some(cur) = &archive.cur {
        fs::write(dir.join("song.cur"), cur)?;
        written += 1;
    }
    info!("unpacked {} of {} sections into {}", written, archive.sections.len(), dir.display());
    println!("Unpacked {written} files to {}", dir.display());
    Ok(())
}

fn pack(mid: &Path, lyr: Option<&Path>, cur: Option<&Path>, out: &Path) -> Result<()> {
    let mut builder = emk::EmkBuilder::new();
    builder.add_section(emk::TAG_MIDI, &fs::read(mid).with_context(|| format!("reading {}", mid.display()))?)?;
    if let Some(p) = lyr {
        builder.add_section(emk::TAG_LYRIC, &fs::read(p).with_context(|| format!("reading {}", p.display()))?)?;
    }
    if let Some(p) = cur {
        builder.add_section(emk::TAG_CURSOR, &fs::read(p).with_context(|| format!("reading {}", p.display()))?)?;
    }
    let bytes = builder.build()?;
    fs::write(out, &bytes)?;
    println!("Wrote {} ({} sections, {} bytes)", out.display(), builder.sections().len(), bytes.len());
    Ok(())
}

fn cursor_cmd(
    input: &Path,
    out: &Path,
    mode: Option<TimingMode>,
    ticks_per_beat: Option<u16>,
    legacy: bool,
    header_tag: &str,
) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;

    let (words, mode) = if bytes.starts_with(b"MThd") {
        let midi = smf::parse(&bytes)?;
        let Some(found) = smf::extract_lyrics(&midi, header_tag) else {
            bail!("{} has no embedded lyrics", input.display());
        };
        let (_, lines) = found?;
        let tpb = ticks_per_beat.unwrap_or(midi.ticks_per_beat);
        let words = LyricWordData::from_lines(&lines, tpb as f64);
        (words, cursor_mode(mode.unwrap_or_default(), tpb))
    } else {
        let Some(payload) = id3::extract_klyr(&bytes)? else {
            bail!("{} has no embedded lyrics", input.display());
        };
        let (_, lines) = klyr::decode(&payload, header_tag)?;
        // milliseconds to seconds
        let words = LyricWordData::from_lines(&lines, 500.0)
            .into_iter()
            .map(|mut w| {
                w.start = w.start.map(|t| t / 1000.0);
                w.end = w.end.map(|t| t / 1000.0);
                w
            })
            .collect::<Vec<_>>();
        (words, cursor_mode(mode.unwrap_or(TimingMode::Mp3), ticks_per_beat.unwrap_or(480)))
    };

    let segment = if legacy {
        cursor::generate_legacy(&words, mode)
    } else {
        cursor::generate_segment(&words, mode)
    };
    fs::write(out, segment.export())?;
    println!("Wrote {} ({} lines, {} units)", out.display(), segment.lines.len(), segment.units().len());
    Ok(())
}

fn cursor_mode(mode: TimingMode, ticks_per_beat: u16) -> CursorMode {
    match mode {
        TimingMode::Midi => CursorMode::Midi { ticks_per_beat },
        TimingMode::Mp3 => CursorMode::Mp3,
    }
}
