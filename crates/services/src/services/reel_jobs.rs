//! Reel job manager: an in-memory registry of render jobs, each driven by its
//! own background task through analyze → generate → render.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    beat_analysis::{AudioAnalysis, AudioAnalyzer},
    plan_generator::{HeuristicPlanner, PlanGenerator, PlanRequest, ReelStyle},
    reel::{
        AspectRatio, EditingPlan, JobError, JobErrorKind, MediaReference, ReelError, ReelResult,
        compiler::{RenderPaths, assembled_duration, compile, compile_assembly},
        mixer::{MixOutcome, mix},
        plan_builder::{BuildMode, PlanBuilder, PlanContext},
        preprocess::{ClipFailurePolicy, normalize_clips},
        render::RenderEngine,
    },
};

pub const DEFAULT_TARGET_DURATION: f64 = 15.0;
const OUTPUT_URL_PREFIX: &str = "/output";

#[derive(Debug, Error)]
pub enum ReelJobError {
    #[error(transparent)]
    Reel(#[from] ReelError),
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),
    #[error("Job {0} has already finished")]
    AlreadyFinished(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Generating,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Generating => "generating",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedOutput {
    pub path: PathBuf,
    pub url: String,
    /// Declared timeline length of the plan that produced it.
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_message: String,
    pub outputs: Vec<RenderedOutput>,
    /// Append-only; a completed job may still carry warnings.
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RenderJob {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: "Queued".to_string(),
            outputs: Vec::new(),
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn output_urls(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.url.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReelRequest {
    #[serde(default)]
    pub clips: Vec<MediaReference>,
    #[serde(default)]
    pub audio: Option<MediaReference>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub target_duration: Option<f64>,
    #[serde(default)]
    pub target_style: Option<ReelStyle>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default)]
    pub generate_variations: Option<usize>,
    /// Caller-authored plan; skips generation when present.
    #[serde(default)]
    pub plan: Option<Value>,
    #[serde(default)]
    pub clip_failure_policy: ClipFailurePolicy,
}

impl ReelRequest {
    pub fn new(clips: Vec<MediaReference>) -> Self {
        Self {
            clips,
            audio: None,
            prompt: None,
            target_duration: None,
            target_style: None,
            aspect_ratio: None,
            generate_variations: None,
            plan: None,
            clip_failure_policy: ClipFailurePolicy::default(),
        }
    }

    fn plan_context(&self) -> PlanContext<'_> {
        PlanContext {
            clips: &self.clips,
            music: self.audio.as_ref(),
            aspect_ratio: self.aspect_ratio,
        }
    }

    fn plan_request(&self, style: ReelStyle, analysis: Option<&AudioAnalysis>) -> PlanRequest {
        PlanRequest {
            clips: self.clips.clone(),
            audio: self.audio.clone(),
            analysis: analysis.cloned(),
            prompt: self.prompt.clone(),
            target_duration: self
                .target_duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(DEFAULT_TARGET_DURATION),
            style,
            aspect_ratio: self.aspect_ratio.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReelJobConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub clip_concurrency: usize,
    pub max_variations: usize,
}

/// Jobs plus the cancellation handle of every job still running.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, RenderJob>,
    cancels: DashMap<Uuid, CancellationToken>,
}

impl JobRegistry {
    pub fn get(&self, id: Uuid) -> Option<RenderJob> {
        self.jobs.get(&id).map(|job| job.value().clone())
    }

    /// Newest first.
    pub fn list(&self) -> Vec<RenderJob> {
        let mut jobs: Vec<RenderJob> = self
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn insert(&self, job: RenderJob, cancel: CancellationToken) {
        self.cancels.insert(job.id, cancel);
        self.jobs.insert(job.id, job);
    }

    /// Mutate one job in place; a deleted job is silently skipped.
    fn update(&self, id: Uuid, f: impl FnOnce(&mut RenderJob)) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            f(&mut job);
        }
    }

    fn remove(&self, id: Uuid) -> bool {
        if let Some((_, cancel)) = self.cancels.remove(&id) {
            cancel.cancel();
        }
        self.jobs.remove(&id).is_some()
    }
}

#[derive(Clone)]
pub struct ReelJobService {
    inner: Arc<ReelJobInner>,
}

struct ReelJobInner {
    config: ReelJobConfig,
    registry: JobRegistry,
    engine: Arc<dyn RenderEngine>,
    analyzer: Arc<dyn AudioAnalyzer>,
    planner: Arc<dyn PlanGenerator>,
}

impl ReelJobService {
    pub fn new(
        config: ReelJobConfig,
        engine: Arc<dyn RenderEngine>,
        analyzer: Arc<dyn AudioAnalyzer>,
        planner: Arc<dyn PlanGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(ReelJobInner {
                config,
                registry: JobRegistry::default(),
                engine,
                analyzer,
                planner,
            }),
        }
    }

    pub fn config(&self) -> &ReelJobConfig {
        &self.inner.config
    }

    pub fn planner(&self) -> Arc<dyn PlanGenerator> {
        self.inner.planner.clone()
    }

    pub fn analyzer(&self) -> Arc<dyn AudioAnalyzer> {
        self.inner.analyzer.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<RenderJob> {
        self.inner.registry.get(id)
    }

    pub fn list(&self) -> Vec<RenderJob> {
        self.inner.registry.list()
    }

    pub fn job_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Drop the registry entry and stop any work still running for it.
    /// Rendered files stay on disk.
    pub fn delete(&self, id: Uuid) -> bool {
        self.inner.registry.remove(id)
    }

    pub fn cancel(&self, id: Uuid) -> Result<(), ReelJobError> {
        let job = self.get(id).ok_or(ReelJobError::JobNotFound(id))?;
        if job.status.is_terminal() {
            return Err(ReelJobError::AlreadyFinished(id));
        }
        if let Some(token) = self.inner.registry.cancels.get(&id) {
            tracing::info!("Cancelling reel job {}", id);
            token.cancel();
        }
        Ok(())
    }

    /// Validate, register and start a job. Returns as soon as the job is in
    /// the registry; rendering happens on a background task.
    pub fn submit(&self, request: ReelRequest) -> ReelResult<Uuid> {
        if request.clips.is_empty() {
            return Err(ReelError::InvalidPlan("No clips provided".to_string()));
        }
        for (i, media) in request.clips.iter().chain(request.audio.iter()).enumerate() {
            if !(media.duration.is_finite() && media.duration > 0.0) {
                return Err(ReelError::InvalidPlan(format!(
                    "media {} ('{}'): duration must be > 0",
                    i, media.id
                )));
            }
        }

        let supplied = match &request.plan {
            Some(raw) => {
                let builder = PlanBuilder::new(request.plan_context(), BuildMode::Strict);
                Some(builder.build_all(raw)?)
            }
            None => None,
        };

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.inner.registry.insert(RenderJob::new(id), cancel.clone());
        tracing::info!("Reel job {} queued with {} clip(s)", id, request.clips.len());

        self.spawn_supervised(id, request, supplied, cancel);
        Ok(id)
    }

    /// Whatever the worker does (finish, fail, panic) the job ends up terminal.
    fn spawn_supervised(
        &self,
        id: Uuid,
        request: ReelRequest,
        supplied: Option<Vec<EditingPlan>>,
        cancel: CancellationToken,
    ) {
        let worker = {
            let service = self.clone();
            tokio::spawn(async move { service.process(id, request, supplied, cancel).await })
        };

        let service = self.clone();
        tokio::spawn(async move {
            let failure = match worker.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(JobError::from(&err)),
                Err(join_err) => Some(JobError::new(
                    JobErrorKind::Internal,
                    format!("Render task aborted: {}", join_err),
                )),
            };

            if let Some(error) = failure {
                tracing::error!("Reel job {} failed: {}", id, error.message);
                service.inner.registry.update(id, |job| {
                    job.status = JobStatus::Failed;
                    job.progress_message = format!("Error: {}", error.message);
                    job.errors.push(error);
                    job.completed_at = Some(Utc::now());
                });
            }
            service.inner.registry.cancels.remove(&id);
        });
    }

    fn advance(&self, id: Uuid, status: JobStatus, progress: u8, message: impl Into<String>) {
        let message = message.into();
        self.inner.registry.update(id, |job| {
            job.status = status;
            job.progress = job.progress.max(progress);
            job.progress_message = message;
        });
    }

    fn warn(&self, id: Uuid, error: JobError) {
        tracing::warn!("Reel job {}: {}", id, error.message);
        self.inner.registry.update(id, |job| job.errors.push(error));
    }

    async fn process(
        &self,
        id: Uuid,
        request: ReelRequest,
        supplied: Option<Vec<EditingPlan>>,
        cancel: CancellationToken,
    ) -> ReelResult<()> {
        let config = &self.inner.config;
        tokio::fs::create_dir_all(&config.output_dir).await?;
        tokio::fs::create_dir_all(&config.temp_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("reel-{}-", id))
            .tempdir_in(&config.temp_dir)?;

        let analysis = match &request.audio {
            Some(audio) => {
                self.advance(id, JobStatus::Analyzing, 10, "Analyzing audio...");
                let analysis = self.analyze(audio, &cancel).await?;
                self.advance(id, JobStatus::Analyzing, 30, "Audio analyzed");
                analysis
            }
            None => None,
        };

        self.advance(id, JobStatus::Generating, 40, "Generating editing plan...");
        let mut plans = match supplied {
            Some(plans) => plans,
            None => self.generate(id, &request, analysis.as_ref(), &cancel).await?,
        };
        if plans.len() > config.max_variations {
            self.warn(
                id,
                JobError::new(
                    JobErrorKind::PlanWarning,
                    format!(
                        "{} plans supplied; only the first {} are rendered",
                        plans.len(),
                        config.max_variations
                    ),
                ),
            );
            plans.truncate(config.max_variations);
        }

        let total = plans.len();
        self.advance(
            id,
            JobStatus::Processing,
            60,
            format!("Rendering {} variation(s)...", total),
        );

        for (i, plan) in plans.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ReelError::Cancelled);
            }

            let file_name = if total > 1 {
                format!("{}_v{}.{}", id, i + 1, plan.video.format)
            } else {
                format!("{}.{}", id, plan.video.format)
            };
            let output = config.output_dir.join(&file_name);
            let scratch_dir = scratch.path().join(format!("v{}", i + 1));

            match self
                .render_variation(plan, &scratch_dir, &output, request.clip_failure_policy, &cancel)
                .await
            {
                Ok((warnings, duration)) => {
                    let rendered = RenderedOutput {
                        path: output.clone(),
                        url: format!("{}/{}", OUTPUT_URL_PREFIX, file_name),
                        duration,
                    };
                    self.inner.registry.update(id, |job| {
                        job.errors.extend(warnings);
                        job.outputs.push(rendered);
                    });
                }
                Err(err) => {
                    if output.exists() {
                        let _ = tokio::fs::remove_file(&output).await;
                    }
                    if matches!(err, ReelError::Cancelled) {
                        return Err(err);
                    }
                    let error = if total > 1 {
                        ReelError::VariationFailure {
                            index: i + 1,
                            message: err.to_string(),
                        }
                    } else {
                        err
                    };
                    self.warn(id, JobError::from(&error));
                }
            }

            let progress = 60 + ((i + 1) * 40 / total) as u8;
            self.advance(
                id,
                JobStatus::Processing,
                progress,
                format!("Rendered variation {}/{}", i + 1, total),
            );
        }

        if let Err(e) = scratch.close() {
            tracing::warn!("Failed to remove scratch space for job {}: {}", id, e);
        }

        self.inner.registry.update(id, |job| {
            job.completed_at = Some(Utc::now());
            job.progress = 100;
            if job.outputs.is_empty() {
                job.status = JobStatus::Failed;
                job.progress_message = "All variations failed".to_string();
            } else {
                job.status = JobStatus::Completed;
                job.progress_message =
                    format!("Complete! Generated {} reel(s)", job.outputs.len());
            }
        });
        tracing::info!("Reel job {} finished", id);
        Ok(())
    }

    /// Analysis only enriches the plan; a failure degrades to no beats.
    async fn analyze(
        &self,
        audio: &MediaReference,
        cancel: &CancellationToken,
    ) -> ReelResult<Option<AudioAnalysis>> {
        let result = tokio::select! {
            result = self.inner.analyzer.analyze(&audio.path) => result,
            _ = cancel.cancelled() => return Err(ReelError::Cancelled),
        };
        match result {
            Ok(analysis) => Ok(Some(analysis)),
            Err(err) => {
                tracing::warn!("Audio analysis failed for {}: {}", audio.path.display(), err);
                Ok(None)
            }
        }
    }

    /// One plan per variation style. A generator failure or an unusable
    /// plan falls back to the local heuristic for that style.
    async fn generate(
        &self,
        id: Uuid,
        request: &ReelRequest,
        analysis: Option<&AudioAnalysis>,
        cancel: &CancellationToken,
    ) -> ReelResult<Vec<EditingPlan>> {
        let config = &self.inner.config;
        let count = request
            .generate_variations
            .unwrap_or(1)
            .clamp(1, config.max_variations.max(1));
        let styles = request.target_style.unwrap_or_default().cycle(count);
        let builder = PlanBuilder::new(request.plan_context(), BuildMode::Lenient);

        let mut plans = Vec::with_capacity(count);
        for style in styles {
            let plan_request = request.plan_request(style, analysis);
            let generated = tokio::select! {
                result = self.inner.planner.generate(&plan_request) => result,
                _ = cancel.cancelled() => return Err(ReelError::Cancelled),
            };

            let built = generated
                .map_err(|e| ReelError::PlanGeneration(e.to_string()))
                .and_then(|raw| builder.build_all(&raw))
                .map(|mut built| built.swap_remove(0));

            let plan = match built {
                Ok(plan) => plan,
                Err(err) => {
                    self.warn(
                        id,
                        JobError::new(
                            JobErrorKind::PlanGeneration,
                            format!(
                                "{} plan for '{}' unusable, using heuristic: {}",
                                self.inner.planner.name(),
                                style.as_str(),
                                err
                            ),
                        ),
                    );
                    let fallback = HeuristicPlanner.plan(&plan_request);
                    match builder.build_all(&fallback) {
                        Ok(mut built) => built.swap_remove(0),
                        Err(_) => builder.default_plan()?,
                    }
                }
            };
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Compile and render one plan to `output`. Returns the warnings it
    /// collected on the way and the length of what was actually assembled.
    async fn render_variation(
        &self,
        plan: &EditingPlan,
        scratch_dir: &Path,
        output: &Path,
        policy: ClipFailurePolicy,
        cancel: &CancellationToken,
    ) -> ReelResult<(Vec<JobError>, f64)> {
        let engine = self.inner.engine.as_ref();
        let music = plan.audio.background_music_path.clone();
        let video_out = match music {
            Some(_) => scratch_dir.join(format!("video_only.{}", plan.video.format)),
            None => output.to_path_buf(),
        };
        let paths = RenderPaths::new(&video_out, scratch_dir);

        let compilation = compile(plan, &paths)?;
        let mut warnings: Vec<JobError> = compilation
            .warnings
            .iter()
            .map(|w| JobError::new(JobErrorKind::PlanWarning, w.clone()))
            .collect();

        let mut duration = plan.total_duration();
        let assemble = if plan.clips.len() == 1 {
            compilation.final_step().cloned()
        } else {
            let outcome = normalize_clips(
                engine,
                compilation.normalize_steps(),
                policy,
                self.inner.config.clip_concurrency,
                cancel,
            )
            .await?;

            if outcome.failures.is_empty() {
                compilation.final_step().cloned()
            } else {
                for failure in &outcome.failures {
                    warnings.push(JobError::new(
                        failure.error.kind(),
                        format!("Clip {} skipped: {}", failure.clip_index + 1, failure.error),
                    ));
                }
                let (invocation, subset_warnings) =
                    compile_assembly(plan, &outcome.segments, &paths)?;
                duration = assembled_duration(plan, &outcome.segments);
                warnings.extend(
                    subset_warnings
                        .into_iter()
                        .filter(|w| !compilation.warnings.contains(w))
                        .map(|w| JobError::new(JobErrorKind::PlanWarning, w)),
                );
                Some(invocation)
            }
        };

        let assemble =
            assemble.ok_or_else(|| ReelError::InvalidPlan("Nothing to render".to_string()))?;
        engine.run(&assemble, cancel).await?;

        if let Some(music) = music {
            let outcome = mix(
                engine,
                &video_out,
                &music,
                &plan.audio,
                duration,
                output,
                cancel,
            )
            .await?;
            if let MixOutcome::VideoOnly { warning, .. } = outcome {
                warnings.push(JobError::from(&warning));
            }
        }

        Ok((warnings, duration))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::services::{
        beat_analysis::{AnalysisError, Energy, Mood},
        reel::{MediaKind, compiler::InvocationStage, render::testing::RecordingEngine},
    };

    #[derive(Default)]
    struct StubAnalyzer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioAnalyzer for StubAnalyzer {
        async fn analyze(&self, path: &Path) -> Result<AudioAnalysis, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !path.exists() {
                return Err(AnalysisError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "missing",
                )));
            }
            Ok(AudioAnalysis {
                duration: 30.0,
                sample_rate: 44_100,
                channels: 2,
                bpm: 120.0,
                beats: (0..60).map(|i| i as f64 * 0.5).collect(),
                energy: Energy::High,
                mood: Mood::Energetic,
            })
        }
    }

    struct Harness {
        service: ReelJobService,
        engine: Arc<RecordingEngine>,
        analyzer: Arc<StubAnalyzer>,
        media_dir: tempfile::TempDir,
        _root: tempfile::TempDir,
    }

    impl Harness {
        fn new(engine: RecordingEngine) -> Self {
            let root = tempfile::tempdir().unwrap();
            let media_dir = tempfile::tempdir().unwrap();
            let engine = Arc::new(engine);
            let analyzer = Arc::new(StubAnalyzer::default());
            let config = ReelJobConfig {
                output_dir: root.path().join("output"),
                temp_dir: root.path().join("temp"),
                clip_concurrency: 2,
                max_variations: 5,
            };
            let service = ReelJobService::new(
                config,
                engine.clone(),
                analyzer.clone(),
                Arc::new(HeuristicPlanner),
            );
            Self {
                service,
                engine,
                analyzer,
                media_dir,
                _root: root,
            }
        }

        fn media(&self, id: &str, duration: f64, kind: MediaKind) -> MediaReference {
            let path = self.media_dir.path().join(id);
            std::fs::write(&path, b"media").unwrap();
            MediaReference {
                id: id.to_string(),
                name: id.to_string(),
                path,
                duration,
                kind,
            }
        }

        fn clips(&self, n: usize, duration: f64) -> Vec<MediaReference> {
            (0..n)
                .map(|i| self.media(&format!("clip{}.mp4", i), duration, MediaKind::Video))
                .collect()
        }

        async fn finished(&self, id: Uuid) -> RenderJob {
            for _ in 0..500 {
                if let Some(job) = self.service.get(id) {
                    if job.status.is_terminal() {
                        return job;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {} never finished", id);
        }

        async fn reaches(&self, id: Uuid, status: JobStatus) {
            for _ in 0..500 {
                if self.service.get(id).is_some_and(|job| job.status == status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("job {} never reached {:?}", id, status);
        }
    }

    fn kinds(job: &RenderJob) -> Vec<JobErrorKind> {
        job.errors.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn single_portrait_clip_completes_with_one_output() {
        let h = Harness::new(RecordingEngine::new());
        let mut request = ReelRequest::new(h.clips(1, 10.0));
        request.aspect_ratio = Some(AspectRatio::Portrait);

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.outputs.len(), 1);
        assert_eq!(job.output_urls(), vec![format!("/output/{}.mp4", id)]);
        assert!(job.outputs[0].path.exists());

        let calls = h.engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stage, InvocationStage::Single);
        assert!(calls[0].args.iter().any(|a| a.contains("scale=1080:1920")));
        assert!(calls[0].args.windows(2).any(|w| w == ["-r", "30"]));
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn three_clips_without_audio_concatenate_in_full() {
        let h = Harness::new(RecordingEngine::new());
        let mut request = ReelRequest::new(h.clips(3, 4.0));
        request.plan = Some(json!({}));

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!((job.outputs[0].duration - 12.0).abs() < 1.0 / 30.0);
        assert!(!kinds(&job).contains(&JobErrorKind::MixFailure));

        let calls = h.engine.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|c| c.stage != InvocationStage::Mix));
        let assemble = calls.last().unwrap();
        assert!(assemble.args.iter().any(|a| a.contains("concat=n=3:v=1:a=0")));
    }

    #[tokio::test]
    async fn missing_music_completes_without_audio() {
        let h = Harness::new(RecordingEngine::new());
        let mut request = ReelRequest::new(h.clips(1, 5.0));
        let mut music = h.media("song.mp3", 30.0, MediaKind::Audio);
        music.path = h.media_dir.path().join("gone.mp3");
        request.audio = Some(music);

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.outputs.len(), 1);
        assert!(job.outputs[0].path.exists());
        assert_eq!(
            kinds(&job).iter().filter(|k| **k == JobErrorKind::MixFailure).count(),
            1
        );
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_variations_do_not_sink_siblings() {
        let h = Harness::new(RecordingEngine::failing_on(&["_v1.", "_v2."]));
        let mut request = ReelRequest::new(h.clips(1, 6.0));
        request.generate_variations = Some(3);

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_urls(), vec![format!("/output/{}_v3.mp4", id)]);
        assert_eq!(
            kinds(&job),
            vec![JobErrorKind::VariationFailure, JobErrorKind::VariationFailure]
        );
    }

    #[tokio::test]
    async fn empty_clips_are_rejected_before_registration() {
        let h = Harness::new(RecordingEngine::new());
        let before = h.service.job_count();

        let err = h.service.submit(ReelRequest::new(Vec::new())).unwrap_err();

        assert!(matches!(err, ReelError::InvalidPlan(ref msg) if msg == "No clips provided"));
        assert_eq!(h.service.job_count(), before);
    }

    #[tokio::test]
    async fn malformed_user_plan_is_rejected_synchronously() {
        let h = Harness::new(RecordingEngine::new());
        let mut request = ReelRequest::new(h.clips(1, 5.0));
        request.plan = Some(json!({ "textOverlays": [{ "startTime": 2 }] }));

        assert!(matches!(h.service.submit(request), Err(ReelError::InvalidPlan(_))));
        request = ReelRequest::new(h.clips(1, 5.0));
        request.plan = Some(json!("not a plan"));
        assert!(h.service.submit(request).is_err());
        assert!(h.service.list().is_empty());
    }

    #[tokio::test]
    async fn submit_returns_before_rendering() {
        let h = Harness::new(RecordingEngine::new().with_delay(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let id = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let job = h.service.get(id).unwrap();
        assert!(!job.status.is_terminal());
        h.reaches(id, JobStatus::Processing).await;
        assert_eq!(h.finished(id).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn skipped_clip_is_reported_and_rest_rendered() {
        let h = Harness::new(RecordingEngine::new());
        let mut clips = h.clips(3, 4.0);
        clips[1].path = h.media_dir.path().join("vanished.mp4");
        let mut request = ReelRequest::new(clips);
        request.plan = Some(json!({}));

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(kinds(&job), vec![JobErrorKind::MediaUnavailable]);
        let assemble = h.engine.calls().last().cloned().unwrap();
        assert_eq!(assemble.stage, InvocationStage::Assemble);
        assert_eq!(assemble.inputs.len(), 2);
    }

    #[tokio::test]
    async fn skipped_clip_shortens_duration_and_music_fade() {
        let h = Harness::new(RecordingEngine::new());
        let mut clips = h.clips(3, 4.0);
        clips[1].path = h.media_dir.path().join("vanished.mp4");
        let mut request = ReelRequest::new(clips);
        request.plan = Some(json!({}));
        request.audio = Some(h.media("song.mp3", 30.0, MediaKind::Audio));

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(kinds(&job), vec![JobErrorKind::MediaUnavailable]);
        assert!((job.outputs[0].duration - 8.0).abs() < 1e-9);

        let calls = h.engine.calls();
        let mix = calls
            .iter()
            .find(|c| c.stage == InvocationStage::Mix)
            .unwrap();
        assert!(
            mix.args
                .iter()
                .any(|a| a.contains("afade=t=out:st=7.5:d=0.5"))
        );
    }

    #[tokio::test]
    async fn abort_policy_fails_the_job() {
        let h = Harness::new(RecordingEngine::failing_on(&["clip_002"]));
        let mut request = ReelRequest::new(h.clips(3, 4.0));
        request.plan = Some(json!({}));
        request.clip_failure_policy = ClipFailurePolicy::AbortOnAny;

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(kinds(&job), vec![JobErrorKind::EngineFailure]);
        assert!(job.outputs.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_a_running_job() {
        let h = Harness::new(RecordingEngine::new().with_delay(Duration::from_secs(30)));
        let id = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();
        h.reaches(id, JobStatus::Processing).await;

        h.service.cancel(id).unwrap();
        let job = h.finished(id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(kinds(&job), vec![JobErrorKind::Cancelled]);
        assert!(matches!(
            h.service.cancel(id),
            Err(ReelJobError::AlreadyFinished(_))
        ));
        assert!(matches!(
            h.service.cancel(Uuid::new_v4()),
            Err(ReelJobError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_removes_partial_output() {
        let h = Harness::new(RecordingEngine::new().with_delay(Duration::from_secs(30)));
        let id = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();
        h.reaches(id, JobStatus::Processing).await;

        let partial = h.service.config().output_dir.join(format!("{}.mp4", id));
        std::fs::write(&partial, b"half a video").unwrap();
        h.service.cancel(id).unwrap();
        let job = h.finished(id).await;

        assert_eq!(kinds(&job), vec![JobErrorKind::Cancelled]);
        assert!(job.outputs.is_empty());
        assert!(!partial.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_during_analysis_stops_the_analyzer_process() {
        use std::os::unix::fs::PermissionsExt;

        use crate::services::beat_analysis::FfmpegAudioAnalyzer;

        let h = Harness::new(RecordingEngine::new());
        let marker = h.media_dir.path().join("analysis_finished");
        let ffprobe = h.media_dir.path().join("ffprobe");
        std::fs::write(
            &ffprobe,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&ffprobe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let root = tempfile::tempdir().unwrap();
        let service = ReelJobService::new(
            ReelJobConfig {
                output_dir: root.path().join("output"),
                temp_dir: root.path().join("temp"),
                clip_concurrency: 1,
                max_variations: 1,
            },
            Arc::new(RecordingEngine::new()),
            Arc::new(FfmpegAudioAnalyzer::new("ffmpeg", ffprobe.clone())),
            Arc::new(HeuristicPlanner),
        );
        let mut request = ReelRequest::new(h.clips(1, 5.0));
        request.audio = Some(h.media("song.mp3", 30.0, MediaKind::Audio));
        let id = service.submit(request).unwrap();

        for _ in 0..100 {
            if service.get(id).is_some_and(|j| j.status == JobStatus::Analyzing) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        service.cancel(id).unwrap();

        let mut job = service.get(id).unwrap();
        for _ in 0..100 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            job = service.get(id).unwrap();
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(kinds(&job), vec![JobErrorKind::Cancelled]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn delete_removes_only_the_registry_entry() {
        let h = Harness::new(RecordingEngine::new());
        let id = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();
        let job = h.finished(id).await;

        assert!(h.service.delete(id));
        assert!(h.service.get(id).is_none());
        assert!(!h.service.delete(id));
        assert!(job.outputs[0].path.exists());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let h = Harness::new(RecordingEngine::new());
        let first = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = h.service.submit(ReelRequest::new(h.clips(1, 5.0))).unwrap();

        let ids: Vec<Uuid> = h.service.list().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn scratch_space_is_cleaned_up() {
        let h = Harness::new(RecordingEngine::new());
        let mut request = ReelRequest::new(h.clips(2, 3.0));
        request.audio = Some(h.media("song.mp3", 30.0, MediaKind::Audio));

        let id = h.service.submit(request).unwrap();
        let job = h.finished(id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(h.engine.calls().iter().any(|c| c.stage == InvocationStage::Mix));

        let temp = &h.service.config().temp_dir;
        let leftovers = std::fs::read_dir(temp).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(JobStatus::Completed).unwrap(), "completed");
        assert_eq!(JobStatus::Analyzing.as_str(), "analyzing");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
