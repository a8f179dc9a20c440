//! Plan builder: loosely-typed plan JSON (AI output or user input) →
//! [`EditingPlan`]s.
//!
//! Every field is treated as untrusted. Missing fields get defaults; malformed
//! ones are either rejected (`Strict`, for user plans) or dropped with a
//! warning (`Lenient`, for model output).

use std::path::PathBuf;

use serde_json::{Map, Value};

use super::{
    AspectRatio, AudioConfig, ClipSpec, EditingPlan, EffectSpec, EffectType, MediaKind,
    MediaReference, ReelError, ReelResult, TextAnimation, TextOverlaySpec, TimeWindow,
    TransitionSpec, TransitionType, VideoConfig,
};

const DEFAULT_OVERLAY_SECONDS: f64 = 3.0;
const DEFAULT_FONT_SIZE: u32 = 48;
const DEFAULT_COLOR: &str = "white";
const DEFAULT_EFFECT_INTENSITY: f64 = 0.3;
const CODECS: [&str; 4] = ["libx264", "libx265", "libvpx-vp9", "mpeg4"];
const FORMATS: [&str; 4] = ["mp4", "mov", "webm", "mkv"];
const PRESETS: [&str; 9] = [
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Malformed entries are errors.
    Strict,
    /// Malformed entries are dropped.
    Lenient,
}

/// Request-side facts the plan is resolved against.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    pub clips: &'a [MediaReference],
    pub music: Option<&'a MediaReference>,
    /// Request-level ratio; wins over whatever the plan says.
    pub aspect_ratio: Option<AspectRatio>,
}

pub struct PlanBuilder<'a> {
    ctx: PlanContext<'a>,
    mode: BuildMode,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(ctx: PlanContext<'a>, mode: BuildMode) -> Self {
        Self { ctx, mode }
    }

    /// An object yields one plan, an array one plan per element.
    pub fn build_all(&self, raw: &Value) -> ReelResult<Vec<EditingPlan>> {
        match raw {
            Value::Object(obj) => Ok(vec![self.build(obj)?]),
            Value::Array(items) => {
                let mut plans = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_object() {
                        Some(obj) => match self.build(obj) {
                            Ok(plan) => plans.push(plan),
                            Err(e) if self.mode == BuildMode::Lenient => {
                                tracing::warn!("Dropping plan {}: {}", i, e);
                            }
                            Err(e) => return Err(e),
                        },
                        None => self.reject(format!("plan {} is not an object", i))?,
                    }
                }
                if plans.is_empty() {
                    return Err(ReelError::InvalidPlan("Plan list is empty".to_string()));
                }
                Ok(plans)
            }
            _ => Err(ReelError::InvalidPlan(
                "Plan must be a JSON object or array".to_string(),
            )),
        }
    }

    pub fn build(&self, obj: &Map<String, Value>) -> ReelResult<EditingPlan> {
        let (clips, clip_effects) = self.clips(obj.get("clips"))?;

        let mut effects = clip_effects;
        if let Some(list) = obj.get("effects") {
            for (i, raw) in self.array(list, "effects")?.iter().enumerate() {
                if let Some(effect) = self.effect(raw, None, &format!("effect {}", i))? {
                    effects.push(effect);
                }
            }
        }

        let transitions = match obj.get("transitions") {
            Some(list) => self.transitions(list, clips.len())?,
            None => Vec::new(),
        };

        let mut text_overlays = Vec::new();
        if let Some(list) = obj.get("textOverlays") {
            for (i, raw) in self.array(list, "textOverlays")?.iter().enumerate() {
                if let Some(overlay) = self.overlay(raw, i)? {
                    text_overlays.push(overlay);
                }
            }
        }

        let plan = EditingPlan {
            clips,
            transitions,
            effects,
            text_overlays,
            video: self.video(obj),
            audio: self.audio(obj.get("audio")),
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Every request clip in order, no decoration.
    pub fn default_plan(&self) -> ReelResult<EditingPlan> {
        self.build(&Map::new())
    }

    fn reject(&self, message: String) -> ReelResult<()> {
        match self.mode {
            BuildMode::Strict => Err(ReelError::InvalidPlan(message)),
            BuildMode::Lenient => {
                tracing::warn!("Ignoring malformed plan entry: {}", message);
                Ok(())
            }
        }
    }

    fn array<'v>(&self, value: &'v Value, field: &str) -> ReelResult<&'v [Value]> {
        match value {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(&[]),
            _ => {
                self.reject(format!("{} must be an array", field))?;
                Ok(&[])
            }
        }
    }

    fn clips(&self, raw: Option<&Value>) -> ReelResult<(Vec<ClipSpec>, Vec<EffectSpec>)> {
        let entries: Vec<Value> = match raw {
            Some(value) => self.array(value, "clips")?.to_vec(),
            None => Vec::new(),
        };

        let mut clips = Vec::new();
        let mut effects = Vec::new();
        let mut timeline = 0.0;

        if entries.is_empty() {
            for (i, media) in self.ctx.clips.iter().enumerate() {
                if let Some(clip) = self.clip(&Map::new(), Some(media), i, timeline)? {
                    timeline = clip.end_time;
                    clips.push(clip);
                }
            }
            return Ok((clips, effects));
        }

        for (i, entry) in entries.iter().enumerate() {
            let Some(obj) = entry.as_object() else {
                self.reject(format!("clip {} is not an object", i))?;
                continue;
            };

            let media = match obj.get("inputPath").and_then(Value::as_str) {
                Some(_) => None,
                None => {
                    let source = number(obj.get("sourceIndex")).unwrap_or(i as f64);
                    let found = (source >= 0.0 && source.fract() == 0.0)
                        .then(|| self.ctx.clips.get(source as usize))
                        .flatten();
                    if found.is_none() {
                        self.reject(format!("clip {}: sourceIndex {} out of range", i, source))?;
                        continue;
                    }
                    found
                }
            };

            let Some(clip) = self.clip(obj, media, i, timeline)? else {
                continue;
            };
            let out_index = clips.len();
            timeline = clip.end_time;
            clips.push(clip);

            if let Some(list) = obj.get("effects") {
                for (j, raw) in self.array(list, "clip effects")?.iter().enumerate() {
                    let label = format!("clip {} effect {}", i, j);
                    if let Some(effect) = self.effect(raw, Some(out_index), &label)? {
                        effects.push(effect);
                    }
                }
            }
        }

        Ok((clips, effects))
    }

    fn clip(
        &self,
        obj: &Map<String, Value>,
        media: Option<&MediaReference>,
        index: usize,
        timeline: f64,
    ) -> ReelResult<Option<ClipSpec>> {
        let (id, input_path, kind, media_duration) = match media {
            Some(m) => (m.id.clone(), m.path.clone(), m.kind, Some(m.duration)),
            None => {
                let path = obj
                    .get("inputPath")
                    .and_then(Value::as_str)
                    .map(PathBuf::from)
                    .unwrap_or_default();
                let kind = match obj.get("kind").and_then(Value::as_str) {
                    Some("image") => MediaKind::Image,
                    _ => MediaKind::Video,
                };
                let id = text(obj.get("id")).unwrap_or_else(|| format!("clip-{}", index));
                (id, path, kind, None)
            }
        };

        if kind == MediaKind::Audio {
            self.reject(format!("clip {}: audio files cannot be used as clips", index))?;
            return Ok(None);
        }

        let mut trim_start = number(obj.get("trimStart")).unwrap_or(0.0);
        let requested_end = number(obj.get("trimEnd"));
        let mut trim_end = match (requested_end, media_duration) {
            (Some(end), _) => end,
            (None, Some(duration)) => duration,
            (None, None) => {
                self.reject(format!("clip {}: trimEnd is required with inputPath", index))?;
                return Ok(None);
            }
        };

        if let Some(duration) = media_duration {
            trim_start = trim_start.clamp(0.0, duration);
            trim_end = trim_end.clamp(0.0, duration);
        }
        if trim_start < 0.0 || trim_end <= trim_start {
            self.reject(format!(
                "clip {}: trimEnd ({}) must be greater than trimStart ({})",
                index, trim_end, trim_start
            ))?;
            match media_duration {
                Some(duration) => {
                    trim_start = 0.0;
                    trim_end = duration;
                }
                None => return Ok(None),
            }
        }

        let mut speed = number(obj.get("speed")).unwrap_or(1.0);
        if speed <= 0.0 {
            self.reject(format!("clip {}: speed must be > 0", index))?;
            speed = 1.0;
        }

        let volume = number(obj.get("volume")).unwrap_or(1.0).max(0.0);
        let reverse = obj.get("reverse").and_then(Value::as_bool).unwrap_or(false);
        let end_time = timeline + (trim_end - trim_start) / speed;

        Ok(Some(ClipSpec {
            id,
            input_path,
            start_time: timeline,
            end_time,
            trim_start,
            trim_end,
            volume,
            speed,
            reverse,
            kind,
        }))
    }

    fn effect(
        &self,
        raw: &Value,
        clip: Option<usize>,
        label: &str,
    ) -> ReelResult<Option<EffectSpec>> {
        let Some(obj) = raw.as_object() else {
            self.reject(format!("{} is not an object", label))?;
            return Ok(None);
        };

        let kind = match obj.get("type").and_then(Value::as_str) {
            None => EffectType::Contrast,
            Some(name) => match EffectType::parse(name) {
                Some(kind) => kind,
                None => {
                    self.reject(format!("{}: unknown effect type '{}'", label, name))?;
                    return Ok(None);
                }
            },
        };

        let intensity = number(obj.get("intensity")).unwrap_or(DEFAULT_EFFECT_INTENSITY);
        let window = match (number(obj.get("startTime")), number(obj.get("endTime"))) {
            (Some(start), Some(end)) if end > start && start >= 0.0 => {
                Some(TimeWindow { start, end })
            }
            (Some(_), Some(_)) => {
                self.reject(format!("{}: endTime must be greater than startTime", label))?;
                None
            }
            _ => None,
        };

        Ok(Some(EffectSpec {
            kind,
            intensity,
            window,
            clip,
        }))
    }

    /// Boundary-indexed list. `fromClip` picks the boundary, otherwise the
    /// entry's position does.
    fn transitions(&self, raw: &Value, clip_count: usize) -> ReelResult<Vec<TransitionSpec>> {
        let boundaries = clip_count.saturating_sub(1);
        let mut slots = vec![TransitionSpec::cut(); boundaries];

        for (i, entry) in self.array(raw, "transitions")?.iter().enumerate() {
            let Some(obj) = entry.as_object() else {
                self.reject(format!("transition {} is not an object", i))?;
                continue;
            };

            let kind = match obj.get("type").and_then(Value::as_str) {
                None => TransitionType::Crossfade,
                Some(name) => match TransitionType::parse(name) {
                    Some(kind) => kind,
                    None => {
                        self.reject(format!("transition {}: unknown type '{}'", i, name))?;
                        TransitionType::Crossfade
                    }
                },
            };

            let mut duration = number(obj.get("duration")).unwrap_or(kind.default_duration());
            if duration < 0.0 {
                self.reject(format!("transition {}: duration must be >= 0", i))?;
                duration = kind.default_duration();
            }

            let slot = number(obj.get("fromClip"))
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .map(|n| n as usize)
                .unwrap_or(i);
            match slots.get_mut(slot) {
                Some(target) => *target = TransitionSpec { kind, duration },
                None => tracing::warn!(
                    "Transition {} targets boundary {} but the plan has {}; ignored",
                    i,
                    slot,
                    boundaries
                ),
            }
        }

        Ok(slots)
    }

    fn overlay(&self, raw: &Value, index: usize) -> ReelResult<Option<TextOverlaySpec>> {
        let Some(obj) = raw.as_object() else {
            self.reject(format!("text overlay {} is not an object", index))?;
            return Ok(None);
        };

        let content = text(obj.get("text")).filter(|t| !t.trim().is_empty());
        let Some(content) = content else {
            self.reject(format!("text overlay {}: text is required", index))?;
            return Ok(None);
        };

        let start_time = number(obj.get("startTime")).unwrap_or(0.0).max(0.0);
        let mut end_time = number(obj.get("endTime")).unwrap_or(start_time + DEFAULT_OVERLAY_SECONDS);
        if end_time <= start_time {
            self.reject(format!(
                "text overlay {}: endTime must be greater than startTime",
                index
            ))?;
            end_time = start_time + DEFAULT_OVERLAY_SECONDS;
        }

        let font_size = match number(obj.get("fontSize")) {
            None => DEFAULT_FONT_SIZE,
            Some(size) if size >= 1.0 => size.round() as u32,
            Some(_) => {
                self.reject(format!("text overlay {}: fontSize must be > 0", index))?;
                DEFAULT_FONT_SIZE
            }
        };

        let animation = match obj.get("animation").and_then(Value::as_str) {
            None => TextAnimation::None,
            Some(name) => TextAnimation::parse(name).unwrap_or_else(|| {
                tracing::warn!("Unknown text animation '{}', using none", name);
                TextAnimation::None
            }),
        };

        let position = obj.get("position").and_then(Value::as_str);
        let (default_x, default_y) = position_exprs(position);
        let x = text(obj.get("x")).unwrap_or_else(|| default_x.to_string());
        let y = text(obj.get("y")).unwrap_or_else(|| default_y.to_string());

        Ok(Some(TextOverlaySpec {
            text: content,
            start_time,
            end_time,
            x,
            y,
            font_size,
            font_family: text(obj.get("fontFamily"))
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            color: text(obj.get("color")).unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            background_color: text(obj.get("backgroundColor")),
            animation,
        }))
    }

    fn video(&self, obj: &Map<String, Value>) -> VideoConfig {
        let ratio = self
            .ctx
            .aspect_ratio
            .or_else(|| {
                obj.get("aspectRatio")
                    .and_then(Value::as_str)
                    .and_then(AspectRatio::parse)
            })
            .unwrap_or_default();
        let mut video = VideoConfig::for_aspect(ratio);

        let Some(overrides) = obj.get("video").and_then(Value::as_object) else {
            return video;
        };

        let dimension = |key: &str| {
            number(overrides.get(key))
                .filter(|v| (16.0..=4096.0).contains(v))
                .map(|v| (v as u32) & !1)
        };
        if let (Some(w), Some(h)) = (dimension("width"), dimension("height")) {
            video.width = w;
            video.height = h;
        }
        if let Some(fps) = number(overrides.get("fps")).filter(|v| (1.0..=120.0).contains(v)) {
            video.fps = fps.round() as u32;
        }
        if let Some(bitrate) = text(overrides.get("bitrate")).filter(|b| is_bitrate(b)) {
            video.bitrate = bitrate;
        }
        if let Some(codec) = text(overrides.get("codec")).filter(|c| CODECS.contains(&c.as_str())) {
            video.codec = codec;
        }
        if let Some(format) = text(overrides.get("format")).filter(|f| FORMATS.contains(&f.as_str())) {
            video.format = format;
        }
        if let Some(preset) = text(overrides.get("preset")).filter(|p| PRESETS.contains(&p.as_str())) {
            video.preset = preset;
        }
        video
    }

    fn audio(&self, raw: Option<&Value>) -> AudioConfig {
        let defaults = AudioConfig::default();
        let obj = raw.and_then(Value::as_object);
        let field = |keys: &[&str]| {
            obj.and_then(|o| keys.iter().find_map(|k| number(o.get(*k))))
        };

        AudioConfig {
            background_music_path: self.ctx.music.map(|m| m.path.clone()),
            music_volume: field(&["volume", "musicVolume"])
                .unwrap_or(defaults.music_volume)
                .clamp(0.0, 1.0),
            original_volume: field(&["originalVolume"])
                .unwrap_or(defaults.original_volume)
                .clamp(0.0, 1.0),
            fade_in: field(&["fadeIn"]).unwrap_or(defaults.fade_in).max(0.0),
            fade_out: field(&["fadeOut"]).unwrap_or(defaults.fade_out).max(0.0),
        }
    }
}

/// Named positions → drawtext x/y expressions.
pub fn position_exprs(position: Option<&str>) -> (&'static str, &'static str) {
    match position {
        Some("top") => ("(w-text_w)/2", "50"),
        Some("bottom") => ("(w-text_w)/2", "(h-text_h-50)"),
        _ => ("(w-text_w)/2", "(h-text_h)/2"),
    }
}

/// Shallow structural check of an arbitrary plan, for surfacing problems to
/// a caller without building anything.
pub fn lint_plan(raw: &Value) -> Vec<String> {
    let Some(obj) = raw.as_object() else {
        return vec!["Plan must be an object".to_string()];
    };

    let mut errors = Vec::new();
    match obj.get("clips") {
        Some(Value::Array(clips)) => {
            for (i, clip) in clips.iter().enumerate() {
                if number(clip.get("sourceIndex")).is_some_and(|s| s < 0.0) {
                    errors.push(format!("Clip {}: sourceIndex must be >= 0", i));
                }
                if let (Some(start), Some(end)) =
                    (number(clip.get("startTime")), number(clip.get("endTime")))
                {
                    if end <= start {
                        errors.push(format!("Clip {}: endTime must be greater than startTime", i));
                    }
                }
                if number(clip.get("speed")).is_some_and(|s| s <= 0.0) {
                    errors.push(format!("Clip {}: speed must be > 0", i));
                }
            }
        }
        _ => errors.push("Missing or invalid clips array".to_string()),
    }

    match obj.get("textOverlays") {
        None | Some(Value::Null) => {}
        Some(Value::Array(overlays)) => {
            for (i, overlay) in overlays.iter().enumerate() {
                if text(overlay.get("text")).is_none_or(|t| t.trim().is_empty()) {
                    errors.push(format!("Text overlay {}: text is required", i));
                }
                if let (Some(start), Some(end)) =
                    (number(overlay.get("startTime")), number(overlay.get("endTime")))
                {
                    if end <= start {
                        errors.push(format!(
                            "Text overlay {}: endTime must be greater than startTime",
                            i
                        ));
                    }
                }
            }
        }
        Some(_) => errors.push("textOverlays must be an array".to_string()),
    }

    if let Some(Value::Array(transitions)) = obj.get("transitions") {
        for (i, t) in transitions.iter().enumerate() {
            if let Some(name) = t.get("type").and_then(Value::as_str) {
                if TransitionType::parse(name).is_none() {
                    errors.push(format!("Transition {}: unknown type '{}'", i, name));
                }
            }
        }
    }

    errors
}

/// Finite number, accepting numeric strings models like to emit.
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('s').parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_bitrate(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M']);
    !digits.is_empty()
        && digits.len() + 1 >= value.len()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}
