//! Clip pre-processor: normalize each clip into its own intermediate before
//! assembly, so one bad clip fails on its own.

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    ReelError, ReelResult,
    compiler::{AssemblySegment, EngineInvocation, InvocationStage},
    render::{RenderEngine, RenderError},
};

/// What to do when a clip fails to normalize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipFailurePolicy {
    /// Keep going with the clips that worked; fail only if none did.
    #[default]
    SkipFailed,
    /// First failure aborts the whole render.
    AbortOnAny,
}

#[derive(Debug)]
pub struct ClipFailure {
    pub clip_index: usize,
    pub error: ReelError,
}

#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    /// Successful intermediates in declared clip order.
    pub segments: Vec<AssemblySegment>,
    /// Clips that were skipped.
    pub failures: Vec<ClipFailure>,
}

/// Run `Normalize` invocations with at most `concurrency` engines at once.
///
/// Results are gathered in declared order whatever order the engines finish
/// in, and nothing is returned until every participating clip is done.
pub async fn normalize_clips(
    engine: &dyn RenderEngine,
    steps: Vec<EngineInvocation>,
    policy: ClipFailurePolicy,
    concurrency: usize,
    cancel: &CancellationToken,
) -> ReelResult<NormalizeOutcome> {
    let total = steps.len();
    let scope = cancel.child_token();

    let mut results = stream::iter(steps.into_iter().enumerate().map(|(position, step)| {
        let scope = scope.clone();
        async move {
            let clip_index = match step.stage {
                InvocationStage::Normalize { clip_index } => clip_index,
                _ => position,
            };
            let result = engine.run(&step, &scope).await;
            (clip_index, step.output, result)
        }
    }))
    .buffered(concurrency.max(1));

    let mut outcome = NormalizeOutcome::default();
    while let Some((clip_index, output, result)) = results.next().await {
        match result {
            Ok(_) => {
                tracing::debug!("Normalized clip {} → {}", clip_index, output.display());
                outcome.segments.push(AssemblySegment {
                    clip_index,
                    path: output,
                });
            }
            Err(RenderError::Cancelled) => return Err(ReelError::Cancelled),
            Err(err) => {
                let error = ReelError::from(err);
                tracing::warn!("Clip {} failed to normalize: {}", clip_index, error);
                if policy == ClipFailurePolicy::AbortOnAny {
                    scope.cancel();
                    return Err(error);
                }
                outcome.failures.push(ClipFailure { clip_index, error });
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(ReelError::Cancelled);
    }

    if outcome.segments.is_empty() {
        tracing::error!("All {} clips failed to normalize", total);
        return Err(match outcome.failures.into_iter().next() {
            Some(first) => first.error,
            None => ReelError::InvalidPlan("No clips to normalize".to_string()),
        });
    }

    Ok(outcome)
}
