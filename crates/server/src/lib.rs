pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

use std::{path::PathBuf, sync::Arc};

use services::services::{
    beat_analysis::FfmpegAudioAnalyzer,
    plan_generator::{HeuristicPlanner, OpenRouterPlanner, PlanGenerator},
    reel::render::FfmpegEngine,
    reel_jobs::ReelJobService,
};

use crate::config::ServerConfig;

/// Shared handler state: the job service plus where its outputs are served from.
#[derive(Clone)]
pub struct AppState {
    pub jobs: ReelJobService,
    pub output_dir: PathBuf,
}

impl AppState {
    pub fn new(jobs: ReelJobService, output_dir: PathBuf) -> Self {
        Self { jobs, output_dir }
    }

    /// Wire the ffmpeg-backed engine and analyzer, and pick the planner:
    /// OpenRouter when a key is configured, the offline heuristic otherwise.
    pub fn from_config(config: &ServerConfig) -> Self {
        let engine = Arc::new(FfmpegEngine::discover(config.ffmpeg_path.as_deref()));
        let analyzer = Arc::new(FfmpegAudioAnalyzer::discover(
            config.ffmpeg_path.as_deref(),
            config.ffprobe_path.as_deref(),
        ));
        let planner: Arc<dyn PlanGenerator> = match &config.openrouter_api_key {
            Some(key) => Arc::new(OpenRouterPlanner::new(
                Some(key.clone()),
                config.openrouter_model.clone(),
            )),
            None => {
                tracing::warn!("OPENROUTER_API_KEY not set, using the heuristic plan generator");
                Arc::new(HeuristicPlanner)
            }
        };
        tracing::info!("Plan generator: {}", planner.name());

        let jobs = ReelJobService::new(config.job_config(), engine, analyzer, planner);
        Self::new(jobs, config.output_dir.clone())
    }
}
