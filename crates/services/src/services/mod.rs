pub mod beat_analysis;
pub mod plan_generator;
pub mod reel;
pub mod reel_jobs;
