//! # Subtitle Serialization
//!
//! Writes SRT files from a [`Transcript`](crate::pipeline::Transcript) in
//! one of three chunking modes:
//! - **oneword**: one word per cue (the signature output)
//! - **twoword**: two-word cues
//! - **phrase**: one cue per transcript segment
//!
//! Word modes strip commas so single-word cues read cleanly.

use crate::pipeline::Transcript;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::Write;
use std::path::Path;

/// How transcript words are grouped into subtitle cues. Serialized as the
/// API strings (`oneword`, `twoword`, `phrase`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleMode {
    OneWord,
    TwoWord,
    Phrase,
}

impl std::str::FromStr for SubtitleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "oneword" => Ok(SubtitleMode::OneWord),
            "twoword" => Ok(SubtitleMode::TwoWord),
            "phrase" => Ok(SubtitleMode::Phrase),
            _ => Err(anyhow!("Unknown subtitle mode: {}", s)),
        }
    }
}

impl std::fmt::Display for SubtitleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubtitleMode::OneWord => "oneword",
            SubtitleMode::TwoWord => "twoword",
            SubtitleMode::Phrase => "phrase",
        };
        write!(f, "{}", name)
    }
}

impl Serialize for SubtitleMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SubtitleMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Format seconds as an SRT timestamp: `HH:MM:SS,mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    let millis = ((seconds - total_seconds as f64) * 1000.0).round() as u64;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Serialize a transcript as SRT into any writer.
pub fn write_srt<W: Write>(out: &mut W, transcript: &Transcript, mode: SubtitleMode) -> Result<()> {
    let mut counter = 1u32;

    match mode {
        SubtitleMode::OneWord => {
            for segment in &transcript.segments {
                for word in &segment.words {
                    let text = word.text.trim().replace(',', "");
                    if text.is_empty() {
                        continue;
                    }
                    write_cue(out, counter, word.start, word.end, &text)?;
                    counter += 1;
                }
            }
        }
        SubtitleMode::TwoWord => {
            for segment in &transcript.segments {
                for pair in segment.words.chunks(2) {
                    let text = pair
                        .iter()
                        .map(|w| w.text.trim().replace(',', ""))
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    if text.is_empty() {
                        continue;
                    }
                    write_cue(out, counter, pair[0].start, pair[pair.len() - 1].end, &text)?;
                    counter += 1;
                }
            }
        }
        SubtitleMode::Phrase => {
            for segment in &transcript.segments {
                let text = segment.text.trim();
                if text.is_empty() {
                    continue;
                }
                write_cue(out, counter, segment.start, segment.end, text)?;
                counter += 1;
            }
        }
    }

    Ok(())
}

/// Serialize a transcript to an SRT file on disk.
pub fn write_srt_file(path: &Path, transcript: &Transcript, mode: SubtitleMode) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_srt(&mut file, transcript, mode)?;
    file.flush()?;
    Ok(())
}

fn write_cue<W: Write>(out: &mut W, index: u32, start: f64, end: f64, text: &str) -> Result<()> {
    writeln!(out, "{}", index)?;
    writeln!(
        out,
        "{} --> {}",
        format_timestamp(start),
        format_timestamp(end)
    )?;
    writeln!(out, "{}\n", text)?;
    Ok(())
}
