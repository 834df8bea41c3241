//! # Transcription Pipeline
//!
//! The seam between the job subsystem and the speech-to-text engine.
//! Workers drive a [`TranscriptionEngine`] and observe its coarse
//! milestones through a [`ProgressObserver`]; everything above this module
//! only sees [`Transcript`] values.
//!
//! ## Key Responsibilities:
//! - **Model vocabulary**: recognized model selectors and language hints
//! - **Engine contract**: file in, timestamped transcript out, milestones
//!   and cancellation polled along the way
//! - **Result types**: segments with word-level time spans for the
//!   subtitle serializer

pub mod audio;
pub mod whisper;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

pub use whisper::WhisperEngine;

/// Hugging Face repository id of the supported Hindi/Hinglish fine-tune.
pub const HINDI_HINGLISH_REPO: &str = "Oriserve/Whisper-Hindi2Hinglish-Prime";

/// Recognized Whisper model selectors.
///
/// The five OpenAI sizes plus one specialized fine-tune. Selector strings
/// are part of the processing API: size names are matched
/// case-insensitively, the fine-tune by its full repository id. Serialized
/// as those same strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    HindiHinglish,
}

impl ModelKind {
    /// Hugging Face repository the model weights are fetched from.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelKind::Tiny => "openai/whisper-tiny",
            ModelKind::Base => "openai/whisper-base",
            ModelKind::Small => "openai/whisper-small",
            ModelKind::Medium => "openai/whisper-medium",
            ModelKind::Large => "openai/whisper-large-v2",
            ModelKind::HindiHinglish => HINDI_HINGLISH_REPO,
        }
    }

    /// Approximate weight size in MB, used for download hints.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelKind::Tiny => 39,
            ModelKind::Base => 74,
            ModelKind::Small => 244,
            ModelKind::Medium => 769,
            ModelKind::Large => 1550,
            ModelKind::HindiHinglish => 1550,
        }
    }

    /// Whether the selector names a fine-tune hosted outside the openai
    /// namespace. Those get a first-time-download warning in the initial
    /// job status message.
    pub fn is_finetune(&self) -> bool {
        matches!(self, ModelKind::HindiHinglish)
    }
}

impl std::str::FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case(HINDI_HINGLISH_REPO) {
            return Ok(ModelKind::HindiHinglish);
        }
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelKind::Tiny),
            "base" => Ok(ModelKind::Base),
            "small" => Ok(ModelKind::Small),
            "medium" => Ok(ModelKind::Medium),
            "large" => Ok(ModelKind::Large),
            _ => Err(anyhow!("Unknown model: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelKind::Tiny => "tiny",
            ModelKind::Base => "base",
            ModelKind::Small => "small",
            ModelKind::Medium => "medium",
            ModelKind::Large => "large",
            ModelKind::HindiHinglish => HINDI_HINGLISH_REPO,
        };
        write!(f, "{}", name)
    }
}

impl Serialize for ModelKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModelKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Supported language hints. Absent means auto-detect. Serialized as the
/// two-letter codes the API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Hindi,
    English,
    Urdu,
    Spanish,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Hindi => "hi",
            Language::English => "en",
            Language::Urdu => "ur",
            Language::Spanish => "es",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hi" => Ok(Language::Hindi),
            "en" => Ok(Language::English),
            "ur" => Ok(Language::Urdu),
            "es" => Ok(Language::Spanish),
            _ => Err(anyhow!("Unknown language: {}", s)),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable per-job engine parameters.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub model: ModelKind,
    pub language: Option<Language>,
}

/// A single timestamped word.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordSpan {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A contiguous stretch of speech with its word spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub words: Vec<WordSpan>,
}

/// Complete transcription result for one input file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Full text across all segments.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.words.is_empty())
    }
}

/// Coarse milestones emitted while a transcription runs.
///
/// Granularity is uneven on purpose: model loading can take minutes with
/// no events at all, then chunks arrive steadily. The client-side
/// reconciler is what keeps the displayed progress moving through the
/// gaps.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Model weights are being resolved (may include a large download)
    ModelLoading { model: ModelKind },
    /// Model is in memory and ready to decode
    ModelReady,
    /// Input decoded to PCM
    AudioDecoded { duration_secs: f64 },
    /// One decode window finished
    ChunkDecoded { index: usize, total: usize },
}

/// Callback surface handed to the engine by its driver.
///
/// `is_cancelled` is polled between units of work; a cancelled engine run
/// returns an error and the driver decides what that means for the job.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: PipelineEvent);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores everything. Useful for tests and one-shot runs.
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_event(&self, _event: PipelineEvent) {}
}

/// The speech-to-text engine seam.
///
/// Implementations run on a blocking thread (transcription is CPU/GPU
/// bound); drivers wrap calls in `spawn_blocking`.
pub trait TranscriptionEngine: Send + Sync {
    fn transcribe(
        &self,
        input: &Path,
        request: &TranscribeRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<Transcript>;
}
