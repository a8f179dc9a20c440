//! Music analysis for reel planning.
//!
//! Uses ffprobe for stream facts and ffmpeg `volumedetect` over short windows
//! for an energy curve, then derives:
//! - BPM from the spacing of energy peaks
//! - a regular beat grid
//! - coarse energy and mood labels used to steer plan generation

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

const DEFAULT_BPM: f64 = 120.0;
const MAX_WINDOWS: usize = 200;
const MIN_WINDOW_SECS: f64 = 0.5;
/// Tolerance when matching a beat gap against the expected interval.
const CUT_TOLERANCE_SECS: f64 = 0.1;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Energy {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Upbeat,
    Calm,
    Dramatic,
    Energetic,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Upbeat => "upbeat",
            Mood::Calm => "calm",
            Mood::Dramatic => "dramatic",
            Mood::Energetic => "energetic",
        }
    }
}

/// Produced once per music track; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u32,
    pub bpm: f64,
    /// Ascending timestamps in seconds. May be empty.
    pub beats: Vec<f64>,
    pub energy: Energy,
    pub mood: Mood,
}

/// Energy measurement at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyPoint {
    pub timestamp: f64,
    pub mean_volume_db: f64,
    pub normalized_energy: f64,
}

/// Stream facts from ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u32,
}

#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> Result<AudioAnalysis, AnalysisError>;
}

pub struct FfmpegAudioAnalyzer {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegAudioAnalyzer {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn discover(ffmpeg_override: Option<&str>, ffprobe_override: Option<&str>) -> Self {
        Self::new(
            utils::shell::binary_or_default("ffmpeg", ffmpeg_override),
            utils::shell::binary_or_default("ffprobe", ffprobe_override),
        )
    }

    /// Duration and first audio stream layout via ffprobe
    pub async fn probe(&self, path: &Path) -> Result<ProbeInfo, AnalysisError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "a:0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AnalysisError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    /// Mean loudness per window, normalized so -60dB → 0.0 and 0dB → 1.0.
    pub async fn measure_energy_curve(
        &self,
        path: &Path,
        duration: f64,
    ) -> Result<Vec<EnergyPoint>, AnalysisError> {
        let window = (duration / MAX_WINDOWS as f64).max(MIN_WINDOW_SECS);
        let num_windows = ((duration / window).ceil() as usize).min(MAX_WINDOWS);
        let mut points = Vec::with_capacity(num_windows);

        for i in 0..num_windows {
            let start = i as f64 * window;
            if start >= duration {
                break;
            }
            let segment = window.min(duration - start);

            let output = Command::new(&self.ffmpeg_path)
                .args(["-hide_banner", "-nostdin"])
                .args(["-ss", &format!("{:.3}", start)])
                .args(["-t", &format!("{:.3}", segment)])
                .arg("-i")
                .arg(path)
                .args(["-af", "volumedetect", "-vn", "-f", "null", "-"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await?;

            let stderr = String::from_utf8_lossy(&output.stderr);
            let mean = parse_volumedetect(&stderr, "mean_volume").unwrap_or(-30.0);

            points.push(EnergyPoint {
                timestamp: start + segment / 2.0,
                mean_volume_db: mean,
                normalized_energy: ((mean + 60.0) / 60.0).clamp(0.0, 1.0),
            });
        }

        Ok(points)
    }
}

#[async_trait]
impl AudioAnalyzer for FfmpegAudioAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<AudioAnalysis, AnalysisError> {
        tokio::fs::metadata(path).await?;

        let started = std::time::Instant::now();
        let info = self.probe(path).await?;
        let curve = self.measure_energy_curve(path, info.duration).await?;

        let level = mean_energy(&curve);
        let bpm = detect_bpm(&curve);
        let analysis = AudioAnalysis {
            duration: info.duration,
            sample_rate: info.sample_rate,
            channels: info.channels,
            bpm,
            beats: beat_grid(bpm, info.duration),
            energy: classify_energy(level),
            mood: classify_mood(bpm, level),
        };

        tracing::info!(
            "Audio analyzed in {}ms: {:.0} BPM, {} mood, {} beats",
            started.elapsed().as_millis(),
            analysis.bpm,
            analysis.mood.as_str(),
            analysis.beats.len()
        );
        Ok(analysis)
    }
}

pub fn parse_probe(json: &str) -> Result<ProbeInfo, AnalysisError> {
    let val: serde_json::Value =
        serde_json::from_str(json).map_err(|e| AnalysisError::Parse(format!("ffprobe: {}", e)))?;

    let duration = val["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| AnalysisError::Parse("No duration found".to_string()))?;

    let stream = &val["streams"][0];
    let sample_rate = stream["sample_rate"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(44_100);
    let channels = stream["channels"].as_u64().unwrap_or(2) as u32;

    Ok(ProbeInfo {
        duration,
        sample_rate,
        channels,
    })
}

/// BPM from the average gap between energy peaks, clamped to 60..=200.
pub fn detect_bpm(curve: &[EnergyPoint]) -> f64 {
    if curve.len() < 4 {
        return DEFAULT_BPM;
    }

    let peaks: Vec<f64> = curve
        .windows(3)
        .filter(|w| {
            w[1].normalized_energy > w[0].normalized_energy
                && w[1].normalized_energy > w[2].normalized_energy
                && w[1].normalized_energy > 0.3
        })
        .map(|w| w[1].timestamp)
        .collect();

    if peaks.len() < 2 {
        return DEFAULT_BPM;
    }

    let avg_interval = (peaks[peaks.len() - 1] - peaks[0]) / (peaks.len() - 1) as f64;
    if avg_interval > 0.0 {
        (60.0 / avg_interval).clamp(60.0, 200.0).round()
    } else {
        DEFAULT_BPM
    }
}

/// Regular beats from zero, rounded to centiseconds.
pub fn beat_grid(bpm: f64, duration: f64) -> Vec<f64> {
    if !(bpm > 0.0 && duration > 0.0) {
        return Vec::new();
    }
    let interval = 60.0 / bpm;
    let total = (duration / interval).ceil() as usize;
    (0..total)
        .map(|i| (i as f64 * interval * 100.0).round() / 100.0)
        .filter(|t| *t < duration)
        .collect()
}

pub fn mean_energy(curve: &[EnergyPoint]) -> f64 {
    if curve.is_empty() {
        return 0.5;
    }
    curve.iter().map(|p| p.normalized_energy).sum::<f64>() / curve.len() as f64
}

pub fn classify_energy(level: f64) -> Energy {
    if level > 0.7 {
        Energy::High
    } else if level > 0.4 {
        Energy::Medium
    } else {
        Energy::Low
    }
}

pub fn classify_mood(bpm: f64, level: f64) -> Mood {
    if bpm > 130.0 && level > 0.7 {
        Mood::Energetic
    } else if bpm > 110.0 && level > 0.5 {
        Mood::Upbeat
    } else if bpm < 90.0 && level < 0.4 {
        Mood::Calm
    } else {
        Mood::Dramatic
    }
}

/// Closest beat to `timestamp`; the timestamp itself when there are no beats.
pub fn nearest_beat(beats: &[f64], timestamp: f64) -> f64 {
    beats
        .iter()
        .copied()
        .min_by(|a, b| {
            (a - timestamp)
                .abs()
                .partial_cmp(&(b - timestamp).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(timestamp)
}

/// The first beat plus every beat that lands on the expected interval after
/// its predecessor.
pub fn suggest_cut_points(analysis: &AudioAnalysis) -> Vec<f64> {
    let Some(first) = analysis.beats.first() else {
        return Vec::new();
    };
    let interval = if analysis.bpm > 0.0 {
        60.0 / analysis.bpm
    } else {
        60.0 / DEFAULT_BPM
    };

    let mut cuts = vec![*first];
    cuts.extend(
        analysis
            .beats
            .windows(2)
            .filter(|w| (w[1] - w[0] - interval).abs() < CUT_TOLERANCE_SECS)
            .map(|w| w[1]),
    );
    cuts
}

fn parse_volumedetect(text: &str, key: &str) -> Option<f64> {
    // Format: "[Parsed_volumedetect_0 @ 0x..] mean_volume: -18.5 dB"
    text.lines()
        .filter(|line| line.contains(key))
        .find_map(|line| {
            let (_, value) = line.split_once(&format!("{}:", key))?;
            value.trim().trim_end_matches("dB").trim().parse().ok()
        })
}
