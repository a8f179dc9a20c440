//! Filter-graph compiler: [`EditingPlan`] → ordered ffmpeg invocations.
//!
//! Everything here is pure. The compiler never touches the filesystem, so a
//! missing input only shows up when the engine runs.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{
    ClipSpec, EditingPlan, EffectSpec, MediaKind, ReelError, ReelResult, TextAnimation,
    TextOverlaySpec, VideoConfig, clamp_transition, num,
};

const TYPEWRITER_MAX_STEPS: usize = 30;
const ANIMATION_SECONDS: f64 = 0.5;
const SLIDE_DISTANCE_PX: u32 = 80;
const BOUNCE_HEIGHT_PX: u32 = 25;
const DEFAULT_X: &str = "(w-text_w)/2";
const DEFAULT_Y: &str = "(h-text_h)/2";

/// Where a compiled plan writes its files.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPaths {
    /// Final video-only artifact of the compiled plan.
    pub output: PathBuf,
    /// Job-scoped directory for intermediates.
    pub scratch_dir: PathBuf,
}

impl RenderPaths {
    pub fn new(output: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn intermediate(&self, clip_index: usize, format: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("clip_{:03}.{}", clip_index, format))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum InvocationStage {
    /// Whole plan in one pass (one clip).
    Single,
    /// One clip normalized into an intermediate.
    Normalize { clip_index: usize },
    /// Normalized intermediates joined, decorated and encoded.
    Assemble,
    /// Background music laid under the finished video.
    Mix,
}

/// One run of the engine: argument list plus the files it reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInvocation {
    pub stage: InvocationStage,
    pub inputs: Vec<PathBuf>,
    pub args: Vec<String>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub invocations: Vec<EngineInvocation>,
    pub warnings: Vec<String>,
}

impl Compilation {
    pub fn normalize_steps(&self) -> Vec<EngineInvocation> {
        self.invocations
            .iter()
            .filter(|inv| matches!(inv.stage, InvocationStage::Normalize { .. }))
            .cloned()
            .collect()
    }

    /// The invocation producing the plan's final video.
    pub fn final_step(&self) -> Option<&EngineInvocation> {
        self.invocations.last()
    }
}

/// Normalized clip ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblySegment {
    pub clip_index: usize,
    pub path: PathBuf,
}

pub fn compile(plan: &EditingPlan, paths: &RenderPaths) -> ReelResult<Compilation> {
    if plan.clips.is_empty() {
        return Err(ReelError::InvalidPlan("No clips provided".to_string()));
    }

    let mut warnings = Vec::new();
    let boundaries = plan.clips.len() - 1;
    let extra = plan
        .transitions
        .iter()
        .skip(boundaries)
        .filter(|t| !t.is_cut())
        .count();
    if extra > 0 {
        warnings.push(format!(
            "{} transition(s) declared beyond the {} clip boundaries were ignored",
            extra, boundaries
        ));
    }

    if plan.clips.len() == 1 {
        return Ok(Compilation {
            invocations: vec![single_invocation(plan, paths)],
            warnings,
        });
    }

    let mut invocations: Vec<EngineInvocation> = plan
        .clips
        .iter()
        .enumerate()
        .map(|(i, clip)| normalize_invocation(plan, i, clip, paths))
        .collect();

    let segments: Vec<AssemblySegment> = invocations
        .iter()
        .enumerate()
        .map(|(i, inv)| AssemblySegment {
            clip_index: i,
            path: inv.output.clone(),
        })
        .collect();

    let (assemble, assembly_warnings) = compile_assembly(plan, &segments, paths)?;
    warnings.extend(assembly_warnings);
    invocations.push(assemble);

    Ok(Compilation {
        invocations,
        warnings,
    })
}

/// Join normalized clips (in the given order) and apply global effects and
/// overlays. Transitions only apply between segments that were adjacent in
/// the plan; a gap left by a dropped clip becomes a hard cut.
pub fn compile_assembly(
    plan: &EditingPlan,
    segments: &[AssemblySegment],
    paths: &RenderPaths,
) -> ReelResult<(EngineInvocation, Vec<String>)> {
    if segments.is_empty() {
        return Err(ReelError::InvalidPlan(
            "No clips left to assemble".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    let mut args = base_args();
    for segment in segments {
        args.push("-i".to_string());
        args.push(path_arg(&segment.path));
    }

    let durations = segment_durations(plan, segments);
    let transitions: Vec<Option<(&'static str, f64)>> = boundaries(plan, segments, &durations)
        .into_iter()
        .map(|boundary| {
            let boundary = boundary?;
            if boundary.effective + 1e-9 < boundary.declared {
                warnings.push(format!(
                    "Transition {} ({}) of {}s exceeds half the shorter adjacent clip; clamped to {}s",
                    boundary.index,
                    boundary.kind,
                    num(boundary.declared),
                    num(boundary.effective)
                ));
            }
            (boundary.effective > 0.0).then_some((boundary.name, boundary.effective))
        })
        .collect();

    let mut graph = Vec::new();
    let base = if segments.len() == 1 {
        "[0:v]".to_string()
    } else if transitions.iter().all(Option::is_none) {
        let labels: String = (0..segments.len()).map(|i| format!("[{}:v]", i)).collect();
        graph.push(format!(
            "{}concat=n={}:v=1:a=0[joined]",
            labels,
            segments.len()
        ));
        "[joined]".to_string()
    } else {
        chain_boundaries(&mut graph, &durations, &transitions)
    };

    let post = post_filters(plan);
    let tail = if post.is_empty() {
        "null".to_string()
    } else {
        post.join(",")
    };
    graph.push(format!("{}{}[outv]", base, tail));

    args.push("-filter_complex".to_string());
    args.push(graph.join(";"));
    args.extend(output_args(&plan.video, &paths.output));

    Ok((
        EngineInvocation {
            stage: InvocationStage::Assemble,
            inputs: segments.iter().map(|s| s.path.clone()).collect(),
            args,
            output: paths.output.clone(),
        },
        warnings,
    ))
}

/// Length of the video assembled from `segments`: their output durations
/// minus the transition overlaps actually applied between them.
pub fn assembled_duration(plan: &EditingPlan, segments: &[AssemblySegment]) -> f64 {
    let durations = segment_durations(plan, segments);
    let overlap: f64 = boundaries(plan, segments, &durations)
        .iter()
        .flatten()
        .map(|b| b.effective.max(0.0))
        .sum();
    durations.iter().sum::<f64>() - overlap
}

fn segment_durations(plan: &EditingPlan, segments: &[AssemblySegment]) -> Vec<f64> {
    segments
        .iter()
        .map(|s| {
            plan.clips
                .get(s.clip_index)
                .map(ClipSpec::output_duration)
                .unwrap_or(0.0)
        })
        .collect()
}

struct Boundary {
    /// Plan boundary index (the left clip).
    index: usize,
    kind: &'static str,
    name: &'static str,
    declared: f64,
    effective: f64,
}

/// Transition between each pair of consecutive segments, if any. Segments
/// that were not adjacent in the plan always meet with a hard cut.
fn boundaries(
    plan: &EditingPlan,
    segments: &[AssemblySegment],
    durations: &[f64],
) -> Vec<Option<Boundary>> {
    segments
        .windows(2)
        .enumerate()
        .map(|(pos, pair)| {
            if pair[1].clip_index != pair[0].clip_index + 1 {
                return None;
            }
            let spec = plan.transition_at(pair[0].clip_index)?;
            let name = spec.kind.xfade_name()?;
            Some(Boundary {
                index: pair[0].clip_index,
                kind: spec.kind.as_str(),
                name,
                declared: spec.duration,
                effective: clamp_transition(spec.duration, durations[pos], durations[pos + 1]),
            })
        })
        .collect()
}

/// Pairwise join: `xfade` where a transition is declared, a two-input
/// `concat` elsewhere. Returns the label of the joined stream.
fn chain_boundaries(
    graph: &mut Vec<String>,
    durations: &[f64],
    transitions: &[Option<(&'static str, f64)>],
) -> String {
    let mut label = "[0:v]".to_string();
    let mut running = durations[0];

    for (i, transition) in transitions.iter().enumerate() {
        let next = i + 1;
        let out = format!("[j{}]", next);
        match transition {
            Some((name, duration)) => {
                let offset = (running - duration).max(0.0);
                graph.push(format!(
                    "{}[{}:v]xfade=transition={}:duration={}:offset={}{}",
                    label,
                    next,
                    name,
                    num(*duration),
                    num(offset),
                    out
                ));
                running += durations[next] - duration;
            }
            None => {
                graph.push(format!("{}[{}:v]concat=n=2:v=1:a=0{}", label, next, out));
                running += durations[next];
            }
        }
        label = out;
    }

    label
}

fn single_invocation(plan: &EditingPlan, paths: &RenderPaths) -> EngineInvocation {
    let clip = &plan.clips[0];
    let mut chain = clip_chain(plan, 0, clip);
    chain.extend(post_filters(plan));

    let mut args = base_args();
    args.extend(input_args(clip, &plan.video));
    args.push("-filter_complex".to_string());
    args.push(format!("[0:v]{}[outv]", chain.join(",")));
    args.extend(output_args(&plan.video, &paths.output));

    EngineInvocation {
        stage: InvocationStage::Single,
        inputs: vec![clip.input_path.clone()],
        args,
        output: paths.output.clone(),
    }
}

fn normalize_invocation(
    plan: &EditingPlan,
    index: usize,
    clip: &ClipSpec,
    paths: &RenderPaths,
) -> EngineInvocation {
    let output = paths.intermediate(index, &plan.video.format);
    let chain = clip_chain(plan, index, clip);

    let mut args = base_args();
    args.extend(input_args(clip, &plan.video));
    args.push("-filter_complex".to_string());
    args.push(format!("[0:v]{}[outv]", chain.join(",")));
    args.extend(output_args(&plan.video, &output));

    EngineInvocation {
        stage: InvocationStage::Normalize { clip_index: index },
        inputs: vec![clip.input_path.clone()],
        args,
        output,
    }
}

pub(crate) fn base_args() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn input_args(clip: &ClipSpec, video: &VideoConfig) -> Vec<String> {
    let mut args = Vec::new();
    if clip.kind == MediaKind::Image {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            video.fps.to_string(),
            "-t".to_string(),
            num(clip.trim_end),
        ]);
    }
    args.push("-i".to_string());
    args.push(path_arg(&clip.input_path));
    args
}

/// Trim → reverse → speed → scale/pad → fps → clip effects.
fn clip_chain(plan: &EditingPlan, index: usize, clip: &ClipSpec) -> Vec<String> {
    let video = &plan.video;
    let mut filters = vec![
        format!(
            "trim=start={}:end={}",
            num(clip.trim_start),
            num(clip.trim_end)
        ),
        "setpts=PTS-STARTPTS".to_string(),
    ];

    if clip.reverse {
        filters.push("reverse".to_string());
    }
    if (clip.speed - 1.0).abs() > f64::EPSILON {
        filters.push(format!("setpts=PTS/{}", num(clip.speed)));
    }

    filters.push(format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease",
        w = video.width,
        h = video.height
    ));
    filters.push(format!(
        "pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black",
        w = video.width,
        h = video.height
    ));
    filters.push("setsar=1".to_string());
    filters.push(format!("fps={}", video.fps));

    for effect in plan.effects.iter().filter(|e| e.clip == Some(index)) {
        filters.extend(effect_filters(effect));
    }

    filters
}

/// Global effects followed by text overlays, in declaration order.
fn post_filters(plan: &EditingPlan) -> Vec<String> {
    let mut filters: Vec<String> = plan
        .effects
        .iter()
        .filter(|e| e.clip.is_none())
        .flat_map(effect_filters)
        .collect();

    for overlay in &plan.text_overlays {
        filters.extend(overlay_filters(overlay));
    }

    filters
}

fn effect_filters(effect: &EffectSpec) -> Vec<String> {
    let filters = effect.kind.filters(effect.intensity);
    match effect.window {
        Some(w) => filters
            .into_iter()
            .map(|f| {
                format!(
                    "{}:enable='between(t,{},{})'",
                    f,
                    num(w.start),
                    num(w.end)
                )
            })
            .collect(),
        None => filters,
    }
}

fn overlay_filters(overlay: &TextOverlaySpec) -> Vec<String> {
    let start = overlay.start_time;
    let end = overlay.end_time;
    let y = safe_expr(&overlay.y, DEFAULT_Y);
    let ramp = ANIMATION_SECONDS.min((end - start) / 2.0).max(0.01);
    let between = format!("between(t,{},{})", num(start), num(end));

    match overlay.animation {
        TextAnimation::None => vec![drawtext(overlay, &overlay.text, &y, None, &between)],
        TextAnimation::FadeIn => {
            let alpha = format!(
                "if(lt(t,{s}+{r}),max(0,(t-{s})/{r}),1)",
                s = num(start),
                r = num(ramp)
            );
            vec![drawtext(overlay, &overlay.text, &y, Some(&alpha), &between)]
        }
        TextAnimation::SlideUp => {
            let y = format!(
                "({y})+{px}*max(0,1-(t-{s})/{r})",
                y = y,
                px = SLIDE_DISTANCE_PX,
                s = num(start),
                r = num(ramp)
            );
            vec![drawtext(overlay, &overlay.text, &y, None, &between)]
        }
        TextAnimation::Bounce => {
            let y = format!(
                "({y})-{px}*abs(sin((t-{s})*3*PI))",
                y = y,
                px = BOUNCE_HEIGHT_PX,
                s = num(start)
            );
            vec![drawtext(overlay, &overlay.text, &y, None, &between)]
        }
        TextAnimation::Typewriter => typewriter(overlay, &y),
    }
}

/// Reveal the text over the first half of the window as a series of
/// growing prefixes, then hold the full text until the end.
fn typewriter(overlay: &TextOverlaySpec, y: &str) -> Vec<String> {
    let chars: Vec<char> = overlay.text.chars().collect();
    let steps = chars.len().clamp(1, TYPEWRITER_MAX_STEPS);
    let start = overlay.start_time;
    let end = overlay.end_time;
    let step = (end - start) / 2.0 / steps as f64;

    (1..=steps)
        .map(|j| {
            let count = (j * chars.len()).div_ceil(steps);
            let prefix: String = chars[..count].iter().collect();
            let from = start + step * (j - 1) as f64;
            let enable = if j == steps {
                format!("between(t,{},{})", num(from), num(end))
            } else {
                format!("gte(t,{})*lt(t,{})", num(from), num(from + step))
            };
            drawtext(overlay, &prefix, y, None, &enable)
        })
        .collect()
}

fn drawtext(
    overlay: &TextOverlaySpec,
    text: &str,
    y: &str,
    alpha: Option<&str>,
    enable: &str,
) -> String {
    let mut opts = vec![
        format!("text={}", escape_drawtext(text)),
        "expansion=none".to_string(),
    ];
    if let Some(font) = overlay.font_family.as_deref() {
        opts.push(format!("font={}", escape_drawtext(font)));
    }
    opts.push(format!("fontsize={}", overlay.font_size));
    opts.push(format!("fontcolor={}", safe_color(&overlay.color)));
    opts.push(format!("x='{}'", safe_expr(&overlay.x, DEFAULT_X)));
    opts.push(format!("y='{}'", y));
    if let Some(bg) = &overlay.background_color {
        opts.push("box=1".to_string());
        opts.push(format!("boxcolor={}", safe_color(bg)));
        opts.push("boxborderw=10".to_string());
    }
    if let Some(alpha) = alpha {
        opts.push(format!("alpha='{}'", alpha));
    }
    opts.push(format!("enable='{}'", enable));

    format!("drawtext={}", opts.join(":"))
}

/// Escape a literal for a filter option embedded in a filtergraph.
///
/// ffmpeg unescapes twice: once when splitting the graph (`\ ' [ ] , ;`)
/// and once when splitting the filter's options (`\ ' :`). The inner level
/// is applied first.
pub fn escape_drawtext(text: &str) -> String {
    let mut option_level = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if matches!(ch, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(ch);
    }

    let mut graph_level = String::with_capacity(option_level.len() + 8);
    for ch in option_level.chars() {
        if matches!(ch, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(ch);
    }
    graph_level
}

/// Position expressions come from untrusted plans; anything outside the
/// expression alphabet falls back to `default`.
fn safe_expr(expr: &str, default: &str) -> String {
    let expr = expr.trim();
    let ok = !expr.is_empty()
        && expr.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '*' | '/' | '(' | ')' | '.' | ',' | ' ')
        });
    if ok {
        expr.to_string()
    } else {
        default.to_string()
    }
}

fn safe_color(color: &str) -> String {
    let color = color.trim();
    let ok = !color.is_empty()
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '.' | '_'));
    if ok {
        color.to_string()
    } else {
        "white".to_string()
    }
}

fn output_args(video: &VideoConfig, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-map".to_string(),
        "[outv]".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        video.codec.clone(),
    ];
    if video.supports_preset() {
        args.push("-preset".to_string());
        args.push(video.preset.clone());
    }
    args.extend([
        "-b:v".to_string(),
        video.bitrate.clone(),
        "-r".to_string(),
        video.fps.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    if matches!(video.format.as_str(), "mp4" | "mov") {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
    args.push(path_arg(output));
    args
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reel::fixtures::{clip, overlay, plan};
    use crate::services::reel::{
        AspectRatio, EffectType, TextAnimation, TimeWindow, TransitionSpec, TransitionType,
    };

    fn paths() -> RenderPaths {
        RenderPaths::new("/out/job.mp4", "/tmp/job")
    }

    fn graph_of(inv: &EngineInvocation) -> &str {
        let pos = inv
            .args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("filter_complex present");
        &inv.args[pos + 1]
    }

    fn fade(duration: f64) -> TransitionSpec {
        TransitionSpec {
            kind: TransitionType::Fade,
            duration,
        }
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = compile(&plan(vec![]), &paths()).unwrap_err();
        assert!(matches!(err, ReelError::InvalidPlan(_)));
    }

    #[test]
    fn single_clip_compiles_to_one_invocation_at_target_resolution() {
        let p = plan(vec![clip("a", 10.0)]);
        let compiled = compile(&p, &paths()).unwrap();

        assert_eq!(compiled.invocations.len(), 1);
        let inv = &compiled.invocations[0];
        assert_eq!(inv.stage, InvocationStage::Single);
        assert_eq!(inv.output, PathBuf::from("/out/job.mp4"));
        assert_eq!(inv.args.last().map(String::as_str), Some("/out/job.mp4"));

        let graph = graph_of(inv);
        assert!(graph.starts_with("[0:v]trim=start=0:end=10,setpts=PTS-STARTPTS"));
        assert!(graph.contains("scale=1080:1920:force_original_aspect_ratio=decrease"));
        assert!(graph.contains("pad=1080:1920:(ow-iw)/2:(oh-ih)/2"));
        assert!(graph.ends_with("[outv]"));
        assert!(inv.args.windows(2).any(|w| w == ["-r", "30"]));
        assert!(inv.args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(inv.args.contains(&"-an".to_string()));
    }

    #[test]
    fn speed_and_reverse_follow_trim() {
        let mut c = clip("a", 8.0);
        c.trim_start = 2.0;
        c.trim_end = 6.0;
        c.speed = 2.0;
        c.reverse = true;
        let compiled = compile(&plan(vec![c]), &paths()).unwrap();
        let graph = graph_of(&compiled.invocations[0]);

        let trim = graph.find("trim=start=2:end=6").unwrap();
        let reverse = graph.find("reverse").unwrap();
        let speed = graph.find("setpts=PTS/2").unwrap();
        let scale = graph.find("scale=").unwrap();
        assert!(trim < reverse && reverse < speed && speed < scale);
    }

    #[test]
    fn multi_clip_normalizes_each_then_concatenates_in_order() {
        let p = plan(vec![clip("a", 2.0), clip("b", 3.0), clip("c", 4.0)]);
        let compiled = compile(&p, &paths()).unwrap();

        assert_eq!(compiled.invocations.len(), 4);
        for (i, inv) in compiled.invocations[..3].iter().enumerate() {
            assert_eq!(inv.stage, InvocationStage::Normalize { clip_index: i });
            assert_eq!(inv.output, paths().intermediate(i, "mp4"));
        }

        let assemble = compiled.final_step().unwrap();
        assert_eq!(assemble.stage, InvocationStage::Assemble);
        assert_eq!(
            assemble.inputs,
            (0..3).map(|i| paths().intermediate(i, "mp4")).collect::<Vec<_>>()
        );
        assert_eq!(
            graph_of(assemble),
            "[0:v][1:v][2:v]concat=n=3:v=1:a=0[joined];[joined]null[outv]"
        );
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn transitions_apply_only_to_their_own_boundary() {
        let mut p = plan(vec![clip("a", 4.0), clip("b", 4.0), clip("c", 4.0)]);
        p.transitions = vec![fade(0.5), TransitionSpec::cut()];
        let compiled = compile(&p, &paths()).unwrap();
        let graph = graph_of(compiled.final_step().unwrap());

        assert!(graph.contains("[0:v][1:v]xfade=transition=fade:duration=0.5:offset=3.5[j1]"));
        assert!(graph.contains("[j1][2:v]concat=n=2:v=1:a=0[j2]"));
        assert_eq!(graph.matches("xfade").count(), 1);
    }

    #[test]
    fn xfade_offsets_accumulate_across_boundaries() {
        let mut p = plan(vec![clip("a", 3.0), clip("b", 2.0), clip("c", 5.0)]);
        p.transitions = vec![
            fade(0.5),
            TransitionSpec {
                kind: TransitionType::WipeLeft,
                duration: 0.4,
            },
        ];
        let compiled = compile(&p, &paths()).unwrap();
        let graph = graph_of(compiled.final_step().unwrap());

        // 3 - 0.5 = 2.5; then running 4.5 - 0.4 = 4.1
        assert!(graph.contains("xfade=transition=fade:duration=0.5:offset=2.5[j1]"));
        assert!(graph.contains("[j1][2:v]xfade=transition=wipeleft:duration=0.4:offset=4.1[j2]"));
        assert!((p.total_duration() - 9.1).abs() < 1e-9);
    }

    #[test]
    fn overlong_transition_is_clamped_and_flagged() {
        let mut p = plan(vec![clip("a", 1.0), clip("b", 3.0)]);
        p.transitions = vec![fade(2.0)];
        let compiled = compile(&p, &paths()).unwrap();

        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].contains("clamped to 0.5s"));
        let graph = graph_of(compiled.final_step().unwrap());
        assert!(graph.contains("duration=0.5:offset=0.5"));
    }

    #[test]
    fn extra_transitions_are_ignored_with_warning() {
        let mut p = plan(vec![clip("a", 2.0), clip("b", 2.0)]);
        p.transitions = vec![fade(0.5), fade(0.5), fade(0.5)];
        let compiled = compile(&p, &paths()).unwrap();
        assert!(compiled.warnings.iter().any(|w| w.contains("2 transition(s)")));
        assert_eq!(graph_of(compiled.final_step().unwrap()).matches("xfade").count(), 1);
    }

    #[test]
    fn n_unit_clips_declare_n_seconds() {
        for n in 1..=6 {
            let clips = (0..n).map(|i| clip(&format!("c{}", i), 1.0)).collect();
            let p = plan(clips);
            assert!((p.total_duration() - n as f64).abs() < 1.0 / 30.0);
            let compiled = compile(&p, &paths()).unwrap();
            let expected = if n == 1 { 1 } else { n + 1 };
            assert_eq!(compiled.invocations.len(), expected);
        }
    }

    #[test]
    fn assembled_duration_counts_only_surviving_segments() {
        let mut p = plan(vec![clip("a", 4.0), clip("b", 4.0), clip("c", 4.0)]);
        p.transitions = vec![fade(0.5), fade(0.5)];
        let seg = |i: usize| AssemblySegment {
            clip_index: i,
            path: PathBuf::from(format!("/tmp/job/clip_{:03}.mp4", i)),
        };

        let all = [seg(0), seg(1), seg(2)];
        assert_eq!(assembled_duration(&p, &all), 11.0);
        assert_eq!(assembled_duration(&p, &all), p.total_duration());

        // clip b dropped: a and c meet with a hard cut
        assert_eq!(assembled_duration(&p, &[seg(0), seg(2)]), 8.0);
        assert_eq!(assembled_duration(&p, &[seg(1), seg(2)]), 7.5);
    }

    #[test]
    fn compiling_twice_is_identical() {
        let mut p = plan(vec![clip("a", 3.0), clip("b", 3.0)]);
        p.transitions = vec![fade(0.5)];
        p.text_overlays = vec![overlay("Hook!", 0.0, 2.0)];
        p.effects = vec![EffectSpec {
            kind: EffectType::Vignette,
            intensity: 0.4,
            window: None,
            clip: None,
        }];
        assert_eq!(compile(&p, &paths()).unwrap(), compile(&p, &paths()).unwrap());
    }

    #[test]
    fn drawtext_payload_is_escaped_for_both_levels() {
        assert_eq!(escape_drawtext("It's 5:00"), r"It\\\'s 5\\:00");
        assert_eq!(escape_drawtext("a,b;[c]"), r"a\,b\;\[c\]");
        assert_eq!(escape_drawtext(r"back\slash"), r"back\\\\slash");
    }

    #[test]
    fn overlays_are_layered_in_list_order_with_time_gates() {
        let mut p = plan(vec![clip("a", 6.0)]);
        p.text_overlays = vec![overlay("first", 0.0, 2.0), overlay("second", 1.0, 4.0)];
        let compiled = compile(&p, &paths()).unwrap();
        let graph = graph_of(&compiled.invocations[0]);

        let first = graph.find("text=first").unwrap();
        let second = graph.find("text=second").unwrap();
        assert!(first < second);
        assert!(graph.contains("enable='between(t,0,2)'"));
        assert!(graph.contains("enable='between(t,1,4)'"));
        assert!(graph.contains("expansion=none"));
    }

    #[test]
    fn hostile_position_and_color_fall_back_to_defaults() {
        let mut o = overlay("hi", 0.0, 1.0);
        o.x = "10:enable=0".to_string();
        o.color = "red';rm".to_string();
        let mut p = plan(vec![clip("a", 2.0)]);
        p.text_overlays = vec![o];
        let graph = graph_of(&compile(&p, &paths()).unwrap().invocations[0]).to_string();
        assert!(graph.contains("x='(w-text_w)/2'"));
        assert!(graph.contains("fontcolor=white"));
    }

    #[test]
    fn font_is_only_named_when_the_plan_sets_one() {
        let mut o = overlay("hi", 0.0, 1.0);
        assert!(!overlay_filters(&o)[0].contains("font="));

        o.font_family = Some("Inter".to_string());
        assert!(overlay_filters(&o)[0].contains(":font=Inter:"));
    }

    #[test]
    fn typewriter_reveals_prefixes_with_bounded_steps() {
        let mut o = overlay("abc", 0.0, 3.0);
        o.animation = TextAnimation::Typewriter;
        let filters = overlay_filters(&o);
        assert_eq!(filters.len(), 3);
        assert!(filters[0].contains("text=a:"));
        assert!(filters[1].contains("text=ab:"));
        assert!(filters[2].contains("text=abc:"));
        assert!(filters[2].contains("enable='between(t,1,3)'"));

        o.text = "x".repeat(100);
        assert_eq!(overlay_filters(&o).len(), TYPEWRITER_MAX_STEPS);
    }

    #[test]
    fn animations_shape_alpha_or_position() {
        let mut o = overlay("hi", 1.0, 4.0);
        o.animation = TextAnimation::FadeIn;
        assert!(overlay_filters(&o)[0].contains("alpha='if(lt(t,1+0.5),max(0,(t-1)/0.5),1)'"));

        o.animation = TextAnimation::SlideUp;
        assert!(overlay_filters(&o)[0].contains("y='((h-text_h)/2)+80*max(0,1-(t-1)/0.5)'"));

        o.animation = TextAnimation::Bounce;
        assert!(overlay_filters(&o)[0].contains("abs(sin((t-1)*3*PI))"));
    }

    #[test]
    fn clip_effects_stay_in_their_chain_and_global_effects_follow_assembly() {
        let mut p = plan(vec![clip("a", 2.0), clip("b", 2.0)]);
        p.effects = vec![
            EffectSpec {
                kind: EffectType::Warm,
                intensity: 0.0,
                window: None,
                clip: Some(1),
            },
            EffectSpec {
                kind: EffectType::Contrast,
                intensity: 0.3,
                window: Some(TimeWindow { start: 0.5, end: 1.5 }),
                clip: None,
            },
        ];
        let compiled = compile(&p, &paths()).unwrap();

        assert!(!graph_of(&compiled.invocations[0]).contains("gamma_r"));
        assert!(graph_of(&compiled.invocations[1]).contains("gamma_r=1.1"));
        let assemble = graph_of(compiled.final_step().unwrap());
        assert!(assemble.contains("[joined]eq=contrast=1.3:enable='between(t,0.5,1.5)'[outv]"));
    }

    #[test]
    fn image_inputs_loop_for_their_duration() {
        let mut c = clip("still", 3.0);
        c.kind = MediaKind::Image;
        let compiled = compile(&plan(vec![c]), &paths()).unwrap();
        let args = &compiled.invocations[0].args;
        let loop_pos = args.iter().position(|a| a == "-loop").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(loop_pos < input_pos);
        assert!(args.windows(2).any(|w| w == ["-t", "3"]));
    }

    #[test]
    fn surviving_subset_drops_transitions_across_gaps() {
        let mut p = plan(vec![clip("a", 3.0), clip("b", 3.0), clip("c", 3.0)]);
        p.transitions = vec![fade(0.5), fade(0.5)];
        let segments = vec![
            AssemblySegment {
                clip_index: 0,
                path: paths().intermediate(0, "mp4"),
            },
            AssemblySegment {
                clip_index: 2,
                path: paths().intermediate(2, "mp4"),
            },
        ];
        let (inv, warnings) = compile_assembly(&p, &segments, &paths()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(
            graph_of(&inv),
            "[0:v][1:v]concat=n=2:v=1:a=0[joined];[joined]null[outv]"
        );
    }

    #[test]
    fn output_follows_video_config() {
        let mut p = plan(vec![clip("a", 2.0)]);
        p.video = VideoConfig::for_aspect(AspectRatio::Square);
        p.video.codec = "libvpx-vp9".to_string();
        p.video.format = "webm".to_string();
        let inv = compile(&p, &RenderPaths::new("/out/x.webm", "/tmp/x"))
            .unwrap()
            .invocations
            .remove(0);
        assert!(graph_of(&inv).contains("scale=1080:1080"));
        assert!(!inv.args.contains(&"-preset".to_string()));
        assert!(!inv.args.contains(&"-movflags".to_string()));
        assert!(inv.args.windows(2).any(|w| w == ["-c:v", "libvpx-vp9"]));
    }
}
