//! Editing-plan generation.
//!
//! Generators return loosely-typed JSON in the shape a language model would
//! produce; the reel plan builder turns it into something renderable. The
//! OpenRouter planner asks a chat model, the heuristic planner derives a
//! beat-snapped plan locally and is used when no API key is configured.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::{
    beat_analysis::{AudioAnalysis, nearest_beat},
    reel::{AspectRatio, EffectType, MediaKind, MediaReference, TextAnimation, TransitionType},
};

const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";
const MAX_TOKENS: u32 = 3000;
const MIN_CLIP_SECS: f64 = 0.5;
const PROMPT_BEATS: usize = 20;

const SYSTEM_PROMPT: &str = r#"You are an expert video editor creating short-form vertical videos (TikTok, Reels, Shorts).

Available tools:
- Transitions: fade, crossfade, dissolve, wipe_left, wipe_right, wipe_up, wipe_down, slide_left, slide_right, zoom_in, zoom_out, blur, glitch, rgb_split, vhs
- Effects: brightness, contrast, saturation, blur, sharpen, vignette, grain, chromatic_aberration, vhs, cinema, warm, cool, dramatic, fade_bw
- Text animations: none, fade_in, typewriter, slide_up, bounce

Rules:
- Hook the viewer in the first 2 seconds
- Cut on music beats when beats are given
- Keep text overlays 2-4 seconds and transitions 0.3-0.5 seconds
- For 15-30 second reels use 3-8 clips

Respond with a single JSON object:
{
  "clips": [{ "sourceIndex": 0, "trimStart": 0, "trimEnd": 5, "speed": 1, "reverse": false,
              "effects": [{ "type": "contrast", "intensity": 0.3 }] }],
  "transitions": [{ "fromClip": 0, "toClip": 1, "type": "zoom_in", "duration": 0.4 }],
  "effects": [{ "type": "vignette", "intensity": 0.3 }],
  "textOverlays": [{ "text": "YOUR TEXT", "startTime": 0, "endTime": 3, "position": "center", "animation": "bounce" }],
  "audio": { "volume": 0.3, "fadeIn": 0.5, "fadeOut": 0.5 },
  "targetDuration": 15,
  "aspectRatio": "9:16"
}"#;

#[derive(Debug, Error)]
pub enum PlanGeneratorError {
    #[error("Plan generator is not configured: {0}")]
    NotConfigured(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Model returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReelStyle {
    #[default]
    Viral,
    Fun,
    Cinematic,
    Dramatic,
    Educational,
}

impl ReelStyle {
    /// Variation order.
    pub const ALL: [ReelStyle; 5] = [
        ReelStyle::Viral,
        ReelStyle::Fun,
        ReelStyle::Cinematic,
        ReelStyle::Dramatic,
        ReelStyle::Educational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReelStyle::Viral => "viral",
            ReelStyle::Fun => "fun",
            ReelStyle::Cinematic => "cinematic",
            ReelStyle::Dramatic => "dramatic",
            ReelStyle::Educational => "educational",
        }
    }

    pub fn guide(&self) -> &'static str {
        match self {
            ReelStyle::Viral => "High energy, quick cuts, text overlays, trending effects, engaging hooks",
            ReelStyle::Fun => "Playful edits, upbeat music sync, bouncy text, energetic transitions",
            ReelStyle::Cinematic => "Slow pacing, dramatic effects, color grading, smooth transitions",
            ReelStyle::Dramatic => "Dark effects, intense music, powerful transitions, emotional pacing",
            ReelStyle::Educational => "Clear text, focused content, minimal effects, professional look",
        }
    }

    /// `count` styles starting at `self`, wrapping around.
    pub fn cycle(self, count: usize) -> Vec<ReelStyle> {
        let start = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        (0..count)
            .map(|i| Self::ALL[(start + i) % Self::ALL.len()])
            .collect()
    }

    fn max_clip_seconds(&self) -> f64 {
        match self {
            ReelStyle::Viral | ReelStyle::Fun => 3.0,
            ReelStyle::Dramatic => 4.0,
            ReelStyle::Educational => 5.0,
            ReelStyle::Cinematic => 6.0,
        }
    }

    fn transition(&self) -> (TransitionType, f64) {
        match self {
            ReelStyle::Viral => (TransitionType::ZoomIn, 0.3),
            ReelStyle::Fun => (TransitionType::SlideLeft, 0.3),
            ReelStyle::Cinematic => (TransitionType::Crossfade, 0.5),
            ReelStyle::Dramatic => (TransitionType::Fade, 0.5),
            ReelStyle::Educational => (TransitionType::Dissolve, 0.4),
        }
    }

    fn effects(&self) -> &'static [(EffectType, f64)] {
        match self {
            ReelStyle::Viral => &[(EffectType::Contrast, 0.3), (EffectType::Saturation, 0.2)],
            ReelStyle::Fun => &[(EffectType::Saturation, 0.3), (EffectType::Warm, 0.5)],
            ReelStyle::Cinematic => &[(EffectType::Cinema, 0.5), (EffectType::Vignette, 0.4)],
            ReelStyle::Dramatic => &[(EffectType::Dramatic, 0.6), (EffectType::Grain, 0.3)],
            ReelStyle::Educational => &[(EffectType::Sharpen, 0.3)],
        }
    }

    fn hook(&self) -> (&'static str, TextAnimation) {
        match self {
            ReelStyle::Viral => ("Wait for it...", TextAnimation::Bounce),
            ReelStyle::Fun => ("Let's go!", TextAnimation::Bounce),
            ReelStyle::Cinematic => ("", TextAnimation::FadeIn),
            ReelStyle::Dramatic => ("Watch this", TextAnimation::FadeIn),
            ReelStyle::Educational => ("Here's how", TextAnimation::SlideUp),
        }
    }
}

/// Everything a generator needs to propose one plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub clips: Vec<MediaReference>,
    pub audio: Option<MediaReference>,
    pub analysis: Option<AudioAnalysis>,
    pub prompt: Option<String>,
    pub target_duration: f64,
    pub style: ReelStyle,
    pub aspect_ratio: AspectRatio,
}

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &PlanRequest) -> Result<Value, PlanGeneratorError>;

    async fn refine(
        &self,
        plan: &Value,
        feedback: &str,
        analysis: Option<&AudioAnalysis>,
    ) -> Result<Value, PlanGeneratorError>;
}

/// Chat-completions planner against OpenRouter.
pub struct OpenRouterPlanner {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl OpenRouterPlanner {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        if api_key.is_some() {
            tracing::info!("OpenRouter planner initialized with API key");
        } else {
            tracing::warn!("OpenRouter planner created without API key");
        }

        Self {
            client: Client::new(),
            api_key,
            model: model.into(),
            endpoint: OPENROUTER_ENDPOINT.to_string(),
        }
    }

    /// Point at a compatible proxy
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, user_message: String) -> Result<Value, PlanGeneratorError> {
        let auth_header = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k))
            .ok_or_else(|| PlanGeneratorError::NotConfigured("OPENROUTER_API_KEY".to_string()))?;

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_message }
            ],
            "response_format": { "type": "json_object" },
            "max_tokens": MAX_TOKENS
        });

        tracing::debug!("[OpenRouter] Sending plan request: model={}", self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PlanGeneratorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlanGeneratorError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| PlanGeneratorError::InvalidResponse(e.to_string()))?;

        parse_completion(&json)
    }
}

#[async_trait]
impl PlanGenerator for OpenRouterPlanner {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn generate(&self, request: &PlanRequest) -> Result<Value, PlanGeneratorError> {
        self.complete(user_message(request)).await
    }

    async fn refine(
        &self,
        plan: &Value,
        feedback: &str,
        analysis: Option<&AudioAnalysis>,
    ) -> Result<Value, PlanGeneratorError> {
        self.complete(refine_message(plan, feedback, analysis)).await
    }
}

/// Pull the plan out of a chat-completions response. Anything that is not a
/// JSON object or array is rejected before parsing.
pub fn parse_completion(json: &Value) -> Result<Value, PlanGeneratorError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .unwrap_or("");

    if content.is_empty() {
        return Err(PlanGeneratorError::InvalidResponse(
            "empty completion".to_string(),
        ));
    }
    if !content.starts_with('{') && !content.starts_with('[') {
        let preview: String = content.chars().take(100).collect();
        return Err(PlanGeneratorError::InvalidResponse(format!(
            "expected JSON, got: {}...",
            preview
        )));
    }

    serde_json::from_str(content).map_err(|e| PlanGeneratorError::InvalidResponse(e.to_string()))
}

pub fn user_message(request: &PlanRequest) -> String {
    let media = request
        .clips
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Clip {}: \"{}\" - {}s ({:?})", i, c.name, c.duration, c.kind))
        .collect::<Vec<_>>()
        .join("\n");

    let mut message = format!(
        "Create a reel.\n\nTarget Duration: {} seconds\nTarget Style: {}\nAspect Ratio: {}\n\nAvailable Media (use sourceIndex):\n{}\n",
        request.target_duration,
        request.style.as_str(),
        request.aspect_ratio.as_str(),
        media
    );

    if let Some(audio) = &request.audio {
        message.push_str(&format!(
            "\nBackground Audio: \"{}\" - {}s\n",
            audio.name, audio.duration
        ));
        if let Some(analysis) = &request.analysis {
            message.push_str(&analysis_context(analysis));
        }
    }
    if let Some(prompt) = request.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        message.push_str(&format!("\nUser Request: \"{}\"\n", prompt));
    }
    message.push_str(&format!("\n{}\n", request.style.guide()));
    message
}

pub fn refine_message(plan: &Value, feedback: &str, analysis: Option<&AudioAnalysis>) -> String {
    let rendered = serde_json::to_string_pretty(plan).unwrap_or_else(|_| plan.to_string());
    let mut message = format!(
        "Current Editing Plan:\n{}\n\nUser Feedback: \"{}\"\n",
        rendered, feedback
    );
    if let Some(analysis) = analysis {
        message.push_str(&analysis_context(analysis));
    }
    message.push_str("\nRefine the editing plan based on the feedback. Keep the same structure.");
    message
}

fn analysis_context(analysis: &AudioAnalysis) -> String {
    let beats = analysis
        .beats
        .iter()
        .take(PROMPT_BEATS)
        .map(|b| format!("{:.2}", b))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "- BPM: {}\n- Beats: {}\n- Mood: {}\n- Energy: {:?}\n",
        analysis.bpm,
        beats,
        analysis.mood.as_str(),
        analysis.energy
    )
}

/// Local planner: style-driven pacing with cuts snapped to beats.
#[derive(Debug, Default, Clone)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn plan(&self, request: &PlanRequest) -> Value {
        let style = request.style;
        let beats = request
            .analysis
            .as_ref()
            .map(|a| a.beats.as_slice())
            .unwrap_or(&[]);

        let sources: Vec<(usize, &MediaReference)> = request
            .clips
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind != MediaKind::Audio && c.duration > 0.0)
            .collect();
        let share = (request.target_duration / sources.len().max(1) as f64)
            .min(style.max_clip_seconds())
            .max(MIN_CLIP_SECS);

        let mut timeline = 0.0;
        let clips: Vec<Value> = sources
            .iter()
            .map(|(index, media)| {
                let mut length = share.min(media.duration);
                if !beats.is_empty() {
                    let snapped = nearest_beat(beats, timeline + length) - timeline;
                    if snapped >= MIN_CLIP_SECS && snapped <= media.duration {
                        length = snapped;
                    }
                }
                timeline += length;
                json!({
                    "sourceIndex": index,
                    "trimStart": 0,
                    "trimEnd": round2(length),
                    "speed": 1
                })
            })
            .collect();

        let (kind, duration) = style.transition();
        let transitions: Vec<Value> = (1..clips.len())
            .map(|i| json!({ "fromClip": i - 1, "toClip": i, "type": kind.as_str(), "duration": duration }))
            .collect();

        let effects: Vec<Value> = style
            .effects()
            .iter()
            .map(|(kind, intensity)| json!({ "type": kind.as_str(), "intensity": intensity }))
            .collect();

        let (default_hook, animation) = style.hook();
        let hook = request
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.chars().take(40).collect::<String>())
            .unwrap_or_else(|| default_hook.to_string());
        let text_overlays: Vec<Value> = if hook.is_empty() || timeline <= 0.0 {
            Vec::new()
        } else {
            vec![json!({
                "text": hook,
                "startTime": 0,
                "endTime": round2(timeline.min(2.5)),
                "position": "center",
                "animation": animation.as_str()
            })]
        };

        json!({
            "clips": clips,
            "transitions": transitions,
            "effects": effects,
            "textOverlays": text_overlays,
            "audio": { "volume": 0.3, "fadeIn": 0.5, "fadeOut": 0.5 },
            "targetDuration": request.target_duration,
            "aspectRatio": request.aspect_ratio.as_str()
        })
    }
}

#[async_trait]
impl PlanGenerator for HeuristicPlanner {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn generate(&self, request: &PlanRequest) -> Result<Value, PlanGeneratorError> {
        Ok(self.plan(request))
    }

    /// No model to ask; the plan comes back unchanged.
    async fn refine(
        &self,
        plan: &Value,
        feedback: &str,
        _analysis: Option<&AudioAnalysis>,
    ) -> Result<Value, PlanGeneratorError> {
        tracing::info!("Heuristic planner ignoring feedback: {}", feedback);
        Ok(plan.clone())
    }
}

/// Catalog of everything a plan may reference.
pub fn editing_tools() -> Value {
    let transitions: Vec<Value> = TransitionType::ALL
        .iter()
        .map(|t| json!({ "name": t.as_str(), "defaultDuration": t.default_duration() }))
        .collect();
    let effects: Vec<Value> = EffectType::ALL
        .iter()
        .map(|e| {
            let (min, max) = e.intensity_range().unwrap_or((0.0, 1.0));
            json!({ "name": e.as_str(), "intensity": { "min": min, "max": max } })
        })
        .collect();

    json!({
        "transitions": transitions,
        "effects": effects,
        "textAnimations": TextAnimation::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
        "styles": ReelStyle::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "aspectRatios": [
            AspectRatio::Portrait.as_str(),
            AspectRatio::Landscape.as_str(),
            AspectRatio::Square.as_str()
        ],
        "durations": [15, 30, 60]
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::services::beat_analysis::{Energy, Mood};

    fn media(n: usize, seconds: f64) -> Vec<MediaReference> {
        (0..n)
            .map(|i| MediaReference {
                id: format!("m{}", i),
                name: format!("clip{}.mp4", i),
                path: PathBuf::from(format!("/media/m{}.mp4", i)),
                duration: seconds,
                kind: MediaKind::Video,
            })
            .collect()
    }

    fn request(clips: Vec<MediaReference>, style: ReelStyle) -> PlanRequest {
        PlanRequest {
            clips,
            audio: None,
            analysis: None,
            prompt: None,
            target_duration: 15.0,
            style,
            aspect_ratio: AspectRatio::Portrait,
        }
    }

    #[test]
    fn styles_cycle_from_the_requested_one() {
        assert_eq!(
            ReelStyle::Dramatic.cycle(3),
            vec![ReelStyle::Dramatic, ReelStyle::Educational, ReelStyle::Viral]
        );
        assert_eq!(ReelStyle::Viral.cycle(1), vec![ReelStyle::Viral]);
    }

    #[test]
    fn completion_must_be_json() {
        let ok = json!({ "choices": [{ "message": { "content": " {\"clips\": []} " } }] });
        assert_eq!(parse_completion(&ok).unwrap(), json!({ "clips": [] }));

        let prose = json!({ "choices": [{ "message": { "content": "I can't help with that." } }] });
        assert!(matches!(
            parse_completion(&prose),
            Err(PlanGeneratorError::InvalidResponse(msg)) if msg.contains("I can't help")
        ));

        let empty = json!({ "choices": [] });
        assert!(parse_completion(&empty).is_err());

        let broken = json!({ "choices": [{ "message": { "content": "{\"clips\": [" } }] });
        assert!(parse_completion(&broken).is_err());
    }

    #[test]
    fn user_message_carries_media_and_beats() {
        let mut req = request(media(2, 4.0), ReelStyle::Fun);
        req.prompt = Some("beach day".to_string());
        req.audio = Some(MediaReference {
            id: "song".to_string(),
            name: "song.mp3".to_string(),
            path: PathBuf::from("/media/song.mp3"),
            duration: 30.0,
            kind: MediaKind::Audio,
        });
        req.analysis = Some(AudioAnalysis {
            duration: 30.0,
            sample_rate: 44_100,
            channels: 2,
            bpm: 120.0,
            beats: vec![0.0, 0.5],
            energy: Energy::High,
            mood: Mood::Upbeat,
        });

        let message = user_message(&req);
        assert!(message.contains("Clip 1: \"clip1.mp4\" - 4s"));
        assert!(message.contains("Target Style: fun"));
        assert!(message.contains("- Beats: 0.00, 0.50"));
        assert!(message.contains("User Request: \"beach day\""));
    }

    #[tokio::test]
    async fn unconfigured_planner_refuses() {
        let planner = OpenRouterPlanner::new(None, DEFAULT_MODEL);
        let err = planner.generate(&request(media(1, 3.0), ReelStyle::Viral)).await;
        assert!(matches!(err, Err(PlanGeneratorError::NotConfigured(_))));
    }

    #[test]
    fn heuristic_plan_follows_style() {
        let plan = HeuristicPlanner.plan(&request(media(3, 10.0), ReelStyle::Viral));

        let clips = plan["clips"].as_array().unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(clips[2]["sourceIndex"], 2);
        assert_eq!(clips[0]["trimEnd"], 3.0);
        assert_eq!(plan["transitions"].as_array().unwrap().len(), 2);
        assert_eq!(plan["transitions"][1]["type"], "zoom_in");
        assert_eq!(plan["effects"][0]["type"], "contrast");
        assert_eq!(plan["textOverlays"][0]["text"], "Wait for it...");
        assert_eq!(plan["textOverlays"][0]["endTime"], 2.5);
    }

    #[test]
    fn heuristic_cuts_snap_to_beats() {
        let mut req = request(media(2, 10.0), ReelStyle::Viral);
        req.analysis = Some(AudioAnalysis {
            duration: 20.0,
            sample_rate: 44_100,
            channels: 2,
            bpm: 75.0,
            beats: (0..25).map(|i| i as f64 * 0.8).collect(),
            energy: Energy::Medium,
            mood: Mood::Dramatic,
        });

        let plan = HeuristicPlanner.plan(&req);
        // 3s share → nearest beat 3.2, then 6.4 on the timeline
        assert_eq!(plan["clips"][0]["trimEnd"], 3.2);
        assert_eq!(plan["clips"][1]["trimEnd"], 3.2);
    }

    #[test]
    fn short_clips_and_audio_sources_are_respected() {
        let mut clips = media(2, 1.2);
        clips[1].kind = MediaKind::Audio;
        let mut req = request(clips, ReelStyle::Cinematic);
        req.prompt = Some("  ".to_string());

        let plan = HeuristicPlanner.plan(&req);
        assert_eq!(plan["clips"].as_array().unwrap().len(), 1);
        assert_eq!(plan["clips"][0]["trimEnd"], 1.2);
        assert!(plan["textOverlays"].as_array().unwrap().is_empty());
    }

    #[test]
    fn catalog_lists_every_tool() {
        let tools = editing_tools();
        assert_eq!(
            tools["transitions"].as_array().unwrap().len(),
            TransitionType::ALL.len()
        );
        assert_eq!(tools["effects"].as_array().unwrap().len(), EffectType::ALL.len());
        assert_eq!(tools["styles"].as_array().unwrap().len(), 5);
        assert_eq!(tools["aspectRatios"][0], "9:16");
    }
}
