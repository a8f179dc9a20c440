//! Reel assembly pipeline
//!
//! Turns a declarative [`EditingPlan`] into ffmpeg invocations and runs them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Reel pipeline                             │
//! │                                                                  │
//! │  loose JSON ──► plan_builder ──► EditingPlan ──► compiler        │
//! │                                                    │             │
//! │                          ┌─────────────────────────┤             │
//! │                          ▼                         ▼             │
//! │                   preprocess (N clips)      single invocation    │
//! │                          │                         │             │
//! │                          └────────► render ◄───────┘             │
//! │                                       │                          │
//! │                                     mixer ──► final artifact     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod compiler;
pub mod mixer;
pub mod plan_builder;
pub mod preprocess;
pub mod render;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use compiler::{Compilation, EngineInvocation, InvocationStage, RenderPaths};
pub use render::{FfmpegEngine, RenderEngine, RenderError, RenderOutput};

/// Keep only the tail of engine stderr; the last lines carry the actual error.
const STDERR_TAIL_BYTES: usize = 2000;

#[derive(Debug, Error)]
pub enum ReelError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Engine exited with code {}: {stderr}", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    EngineFailure { exit_code: Option<i32>, stderr: String },

    #[error("Music mix failed: {0}")]
    MixFailure(String),

    #[error("Variation {index} failed: {message}")]
    VariationFailure { index: usize, message: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Plan generation failed: {0}")]
    PlanGeneration(String),

    #[error("Audio analysis failed: {0}")]
    AnalysisFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReelResult<T> = Result<T, ReelError>;

impl ReelError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            ReelError::InvalidPlan(_) => JobErrorKind::InvalidPlan,
            ReelError::MediaUnavailable(_) => JobErrorKind::MediaUnavailable,
            ReelError::EngineFailure { .. } => JobErrorKind::EngineFailure,
            ReelError::MixFailure(_) => JobErrorKind::MixFailure,
            ReelError::VariationFailure { .. } => JobErrorKind::VariationFailure,
            ReelError::Cancelled => JobErrorKind::Cancelled,
            ReelError::PlanGeneration(_) => JobErrorKind::PlanGeneration,
            ReelError::AnalysisFailure(_) => JobErrorKind::AnalysisFailure,
            ReelError::Io(_) => JobErrorKind::Internal,
        }
    }
}

impl From<RenderError> for ReelError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::MediaUnavailable(msg) => ReelError::MediaUnavailable(msg),
            RenderError::EngineFailure { exit_code, stderr } => ReelError::EngineFailure {
                exit_code,
                stderr: stderr_tail(&stderr).to_string(),
            },
            RenderError::Cancelled => ReelError::Cancelled,
            RenderError::Spawn(e) => ReelError::Io(e),
        }
    }
}

/// Trailing slice of `stderr`, cut on a char boundary.
pub fn stderr_tail(stderr: &str) -> &str {
    if stderr.len() <= STDERR_TAIL_BYTES {
        return stderr.trim();
    }
    let mut start = stderr.len() - STDERR_TAIL_BYTES;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    stderr[start..].trim()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    InvalidPlan,
    MediaUnavailable,
    EngineFailure,
    MixFailure,
    VariationFailure,
    Cancelled,
    PlanGeneration,
    AnalysisFailure,
    /// Non-fatal plan adjustment, such as a clamped transition.
    PlanWarning,
    Internal,
}

/// One entry of a job's append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ReelError> for JobError {
    fn from(err: &ReelError) -> Self {
        JobError::new(err.kind(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Video,
    Image,
    Audio,
}

/// A caller-owned media file. The pipeline never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    pub duration: f64,
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSpec {
    pub id: String,
    pub input_path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    pub volume: f64,
    pub speed: f64,
    pub reverse: bool,
    #[serde(default)]
    pub kind: MediaKind,
}

impl ClipSpec {
    /// Length of the clip on the output timeline.
    pub fn output_duration(&self) -> f64 {
        (self.trim_end - self.trim_start) / self.speed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    None,
    Fade,
    Crossfade,
    Dissolve,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    ZoomIn,
    ZoomOut,
    Blur,
    Glitch,
    RgbSplit,
    Vhs,
}

impl TransitionType {
    pub const ALL: [TransitionType; 16] = [
        TransitionType::None,
        TransitionType::Fade,
        TransitionType::Crossfade,
        TransitionType::Dissolve,
        TransitionType::WipeLeft,
        TransitionType::WipeRight,
        TransitionType::WipeUp,
        TransitionType::WipeDown,
        TransitionType::SlideLeft,
        TransitionType::SlideRight,
        TransitionType::ZoomIn,
        TransitionType::ZoomOut,
        TransitionType::Blur,
        TransitionType::Glitch,
        TransitionType::RgbSplit,
        TransitionType::Vhs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::None => "none",
            TransitionType::Fade => "fade",
            TransitionType::Crossfade => "crossfade",
            TransitionType::Dissolve => "dissolve",
            TransitionType::WipeLeft => "wipe_left",
            TransitionType::WipeRight => "wipe_right",
            TransitionType::WipeUp => "wipe_up",
            TransitionType::WipeDown => "wipe_down",
            TransitionType::SlideLeft => "slide_left",
            TransitionType::SlideRight => "slide_right",
            TransitionType::ZoomIn => "zoom_in",
            TransitionType::ZoomOut => "zoom_out",
            TransitionType::Blur => "blur",
            TransitionType::Glitch => "glitch",
            TransitionType::RgbSplit => "rgb_split",
            TransitionType::Vhs => "vhs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }

    /// `xfade` transition name, `None` for a hard cut.
    pub fn xfade_name(&self) -> Option<&'static str> {
        Some(match self {
            TransitionType::None => return None,
            TransitionType::Fade | TransitionType::Crossfade => "fade",
            TransitionType::Dissolve => "dissolve",
            TransitionType::WipeLeft => "wipeleft",
            TransitionType::WipeRight => "wiperight",
            TransitionType::WipeUp => "wipeup",
            TransitionType::WipeDown => "wipedown",
            TransitionType::SlideLeft => "slideleft",
            TransitionType::SlideRight => "slideright",
            TransitionType::ZoomIn => "zoomin",
            // xfade has no zoom-out; fadefast reads closest
            TransitionType::ZoomOut => "fadefast",
            TransitionType::Blur => "hblur",
            TransitionType::Glitch => "pixelize",
            TransitionType::RgbSplit => "distance",
            TransitionType::Vhs => "hlslice",
        })
    }

    pub fn default_duration(&self) -> f64 {
        match self {
            TransitionType::None => 0.0,
            TransitionType::WipeLeft
            | TransitionType::WipeRight
            | TransitionType::WipeUp
            | TransitionType::WipeDown
            | TransitionType::SlideLeft
            | TransitionType::SlideRight => 0.4,
            TransitionType::Glitch | TransitionType::RgbSplit | TransitionType::Vhs => 0.3,
            _ => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    #[serde(rename = "type")]
    pub kind: TransitionType,
    pub duration: f64,
}

impl TransitionSpec {
    pub fn cut() -> Self {
        Self {
            kind: TransitionType::None,
            duration: 0.0,
        }
    }

    pub fn is_cut(&self) -> bool {
        self.kind == TransitionType::None || self.duration <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    Brightness,
    Contrast,
    Saturation,
    Blur,
    Sharpen,
    Vignette,
    Grain,
    ChromaticAberration,
    Vhs,
    Cinema,
    Warm,
    Cool,
    Dramatic,
    FadeBw,
}

impl EffectType {
    pub const ALL: [EffectType; 14] = [
        EffectType::Brightness,
        EffectType::Contrast,
        EffectType::Saturation,
        EffectType::Blur,
        EffectType::Sharpen,
        EffectType::Vignette,
        EffectType::Grain,
        EffectType::ChromaticAberration,
        EffectType::Vhs,
        EffectType::Cinema,
        EffectType::Warm,
        EffectType::Cool,
        EffectType::Dramatic,
        EffectType::FadeBw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectType::Brightness => "brightness",
            EffectType::Contrast => "contrast",
            EffectType::Saturation => "saturation",
            EffectType::Blur => "blur",
            EffectType::Sharpen => "sharpen",
            EffectType::Vignette => "vignette",
            EffectType::Grain => "grain",
            EffectType::ChromaticAberration => "chromatic_aberration",
            EffectType::Vhs => "vhs",
            EffectType::Cinema => "cinema",
            EffectType::Warm => "warm",
            EffectType::Cool => "cool",
            EffectType::Dramatic => "dramatic",
            EffectType::FadeBw => "fade_bw",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|e| e.as_str() == normalized)
    }

    /// Accepted intensity range; preset looks ignore intensity.
    pub fn intensity_range(&self) -> Option<(f64, f64)> {
        match self {
            EffectType::Brightness => Some((-1.0, 1.0)),
            EffectType::Contrast | EffectType::Saturation => Some((-1.0, 1.0)),
            EffectType::Blur => Some((0.0, 10.0)),
            EffectType::Sharpen => Some((0.0, 5.0)),
            EffectType::Vignette | EffectType::Grain | EffectType::ChromaticAberration => {
                Some((0.0, 1.0))
            }
            _ => None,
        }
    }

    /// ffmpeg filters implementing the effect, applied in order.
    pub fn filters(&self, intensity: f64) -> Vec<String> {
        let i = match self.intensity_range() {
            Some((lo, hi)) => intensity.clamp(lo, hi),
            None => intensity,
        };
        match self {
            EffectType::Brightness => vec![format!("eq=brightness={}", num(i))],
            EffectType::Contrast => vec![format!("eq=contrast={}", num(1.0 + i))],
            EffectType::Saturation => vec![format!("eq=saturation={}", num(1.0 + i))],
            EffectType::Blur => {
                let radius = num(i.max(1.0));
                vec![format!("boxblur={}:1", radius)]
            }
            EffectType::Sharpen => vec![format!("unsharp=5:5:{}:5:5:0.0", num(i.max(0.5)))],
            EffectType::Vignette => {
                // angle range is (0, PI/2]; map 0..1 onto PI/8..PI/3
                use std::f64::consts::{FRAC_PI_3, FRAC_PI_8};
                let angle = FRAC_PI_8 + i * (FRAC_PI_3 - FRAC_PI_8);
                vec![format!("vignette=angle={}", num(angle))]
            }
            EffectType::Grain => vec![format!("noise=alls={}:allf=t+u", (i * 40.0).round().max(1.0))],
            EffectType::ChromaticAberration => {
                let shift = (i * 8.0).round().max(1.0) as i64;
                vec![format!("rgbashift=rh=-{}:bh={}", shift, shift)]
            }
            EffectType::Vhs => vec![
                "eq=saturation=1.3:contrast=1.1".to_string(),
                "noise=alls=18:allf=t".to_string(),
                "rgbashift=rh=-3:bh=3".to_string(),
            ],
            EffectType::Cinema => vec!["eq=saturation=0.8:contrast=1.1:gamma=0.9".to_string()],
            EffectType::Warm => {
                vec!["eq=gamma=1.2:gamma_r=1.1:gamma_g=1.0:gamma_b=0.9".to_string()]
            }
            EffectType::Cool => {
                vec!["eq=gamma=1.2:gamma_r=0.9:gamma_g=1.0:gamma_b=1.1".to_string()]
            }
            EffectType::Dramatic => {
                vec!["eq=contrast=1.3:brightness=-0.05:saturation=1.2".to_string()]
            }
            EffectType::FadeBw => vec!["hue=s=0".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSpec {
    #[serde(rename = "type")]
    pub kind: EffectType,
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    /// Index into `EditingPlan::clips`; `None` applies to the assembled reel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAnimation {
    #[default]
    None,
    FadeIn,
    Typewriter,
    SlideUp,
    Bounce,
}

impl TextAnimation {
    pub const ALL: [TextAnimation; 5] = [
        TextAnimation::None,
        TextAnimation::FadeIn,
        TextAnimation::Typewriter,
        TextAnimation::SlideUp,
        TextAnimation::Bounce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextAnimation::None => "none",
            TextAnimation::FadeIn => "fade_in",
            TextAnimation::Typewriter => "typewriter",
            TextAnimation::SlideUp => "slide_up",
            TextAnimation::Bounce => "bounce",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|a| a.as_str() == normalized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlaySpec {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub x: String,
    pub y: String,
    pub font_size: u32,
    /// Named font; unset means the engine's default. Resolving a name
    /// needs an ffmpeg built with fontconfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default)]
    pub animation: TextAnimation,
}

// ---------------------------------------------------------------------------
// Output configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Square => "1:1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "9:16" => Some(AspectRatio::Portrait),
            "16:9" => Some(AspectRatio::Landscape),
            "1:1" => Some(AspectRatio::Square),
            _ => None,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Landscape => (1920, 1080),
            AspectRatio::Square => (1080, 1080),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: String,
    pub codec: String,
    pub format: String,
    pub preset: String,
}

impl VideoConfig {
    pub fn for_aspect(ratio: AspectRatio) -> Self {
        let (width, height) = ratio.dimensions();
        Self {
            width,
            height,
            fps: 30,
            bitrate: "5M".to_string(),
            codec: "libx264".to_string(),
            format: "mp4".to_string(),
            preset: "ultrafast".to_string(),
        }
    }

    /// Encoder presets only exist for the x264/x265 family.
    pub fn supports_preset(&self) -> bool {
        matches!(self.codec.as_str(), "libx264" | "libx265")
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self::for_aspect(AspectRatio::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music_path: Option<PathBuf>,
    pub music_volume: f64,
    pub original_volume: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            background_music_path: None,
            music_volume: 0.3,
            original_volume: 0.8,
            fade_in: 0.5,
            fade_out: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Everything the compiler needs to render one reel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingPlan {
    pub clips: Vec<ClipSpec>,
    /// Indexed by boundary: entry `i` sits between clip `i` and clip `i + 1`.
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
    #[serde(default)]
    pub text_overlays: Vec<TextOverlaySpec>,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl EditingPlan {
    /// Transition at boundary `index`, ignoring hard cuts.
    pub fn transition_at(&self, index: usize) -> Option<&TransitionSpec> {
        self.transitions.get(index).filter(|t| !t.is_cut())
    }

    /// Declared reel length after transition overlaps.
    pub fn total_duration(&self) -> f64 {
        let durations: Vec<f64> = self.clips.iter().map(ClipSpec::output_duration).collect();
        let mut total: f64 = durations.iter().sum();
        for i in 0..durations.len().saturating_sub(1) {
            if let Some(t) = self.transition_at(i) {
                total -= clamp_transition(t.duration, durations[i], durations[i + 1]);
            }
        }
        total
    }

    /// Structural checks that must hold before anything is rendered.
    pub fn validate(&self) -> ReelResult<()> {
        if self.clips.is_empty() {
            return Err(ReelError::InvalidPlan("No clips provided".to_string()));
        }

        for (i, clip) in self.clips.iter().enumerate() {
            if !(clip.speed.is_finite() && clip.speed > 0.0) {
                return Err(invalid(format!("clip {}: speed must be > 0", i)));
            }
            if clip.trim_start < 0.0 || !(clip.trim_end > clip.trim_start) {
                return Err(invalid(format!(
                    "clip {}: trimEnd ({}) must be greater than trimStart ({})",
                    i, clip.trim_end, clip.trim_start
                )));
            }
            if !(clip.end_time > clip.start_time) {
                return Err(invalid(format!(
                    "clip {}: endTime must be greater than startTime",
                    i
                )));
            }
            if !(clip.volume >= 0.0) {
                return Err(invalid(format!("clip {}: volume must be >= 0", i)));
            }
        }

        for (i, t) in self.transitions.iter().enumerate() {
            if !(t.duration.is_finite() && t.duration >= 0.0) {
                return Err(invalid(format!("transition {}: duration must be >= 0", i)));
            }
        }

        for (i, effect) in self.effects.iter().enumerate() {
            if let Some(clip) = effect.clip {
                if clip >= self.clips.len() {
                    return Err(invalid(format!(
                        "effect {}: clip index {} out of range",
                        i, clip
                    )));
                }
            }
            if let Some(w) = effect.window {
                if !(w.end > w.start) {
                    return Err(invalid(format!("effect {}: window end must follow start", i)));
                }
            }
        }

        for (i, overlay) in self.text_overlays.iter().enumerate() {
            if overlay.text.trim().is_empty() {
                return Err(invalid(format!("text overlay {}: text is required", i)));
            }
            if !(overlay.end_time > overlay.start_time) {
                return Err(invalid(format!(
                    "text overlay {}: endTime must be greater than startTime",
                    i
                )));
            }
            if overlay.font_size == 0 {
                return Err(invalid(format!("text overlay {}: fontSize must be > 0", i)));
            }
        }

        let video = &self.video;
        if video.width == 0 || video.height == 0 || video.fps == 0 {
            return Err(invalid("video: width, height and fps must be > 0".to_string()));
        }

        let audio = &self.audio;
        if !(0.0..=1.0).contains(&audio.music_volume)
            || !(0.0..=1.0).contains(&audio.original_volume)
        {
            return Err(invalid("audio: volumes must be within [0, 1]".to_string()));
        }
        if !(audio.fade_in >= 0.0 && audio.fade_out >= 0.0) {
            return Err(invalid("audio: fades must be >= 0".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ReelError {
    ReelError::InvalidPlan(message)
}

/// Longest transition allowed between two clips: half the shorter one, so a
/// clip flanked by two transitions is never fully consumed.
pub fn clamp_transition(duration: f64, left: f64, right: f64) -> f64 {
    duration.min(left.min(right) / 2.0).max(0.0)
}

/// Compact decimal rendering for filter arguments (`0.5`, `2`, `1.333`).
pub fn num(value: f64) -> String {
    let rendered = format!("{:.3}", value);
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn clip(id: &str, seconds: f64) -> ClipSpec {
        ClipSpec {
            id: id.to_string(),
            input_path: PathBuf::from(format!("/media/{}.mp4", id)),
            start_time: 0.0,
            end_time: seconds,
            trim_start: 0.0,
            trim_end: seconds,
            volume: 1.0,
            speed: 1.0,
            reverse: false,
            kind: MediaKind::Video,
        }
    }

    pub fn plan(clips: Vec<ClipSpec>) -> EditingPlan {
        EditingPlan {
            clips,
            transitions: Vec::new(),
            effects: Vec::new(),
            text_overlays: Vec::new(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
        }
    }

    pub fn overlay(text: &str, start: f64, end: f64) -> TextOverlaySpec {
        TextOverlaySpec {
            text: text.to_string(),
            start_time: start,
            end_time: end,
            x: "(w-text_w)/2".to_string(),
            y: "(h-text_h)/2".to_string(),
            font_size: 48,
            font_family: None,
            color: "white".to_string(),
            background_color: None,
            animation: TextAnimation::None,
        }
    }
}
