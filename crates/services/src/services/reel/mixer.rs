//! Audio mixer: lay background music under a finished, silent video.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::{
    AudioConfig, ReelError, ReelResult, num,
    compiler::{EngineInvocation, InvocationStage, base_args, path_arg},
    render::{RenderEngine, RenderError},
};

const AUDIO_BITRATE: &str = "128k";

#[derive(Debug)]
pub enum MixOutcome {
    Mixed(PathBuf),
    /// Mixing failed; the silent video was moved to the final path instead.
    VideoOnly { path: PathBuf, warning: ReelError },
}

impl MixOutcome {
    pub fn path(&self) -> &Path {
        match self {
            MixOutcome::Mixed(path) => path,
            MixOutcome::VideoOnly { path, .. } => path,
        }
    }
}

/// Video stream copied untouched, music scaled and faded, shortest input
/// decides the length.
pub fn mix_invocation(
    video: &Path,
    music: &Path,
    audio: &AudioConfig,
    video_duration: f64,
    output: &Path,
) -> EngineInvocation {
    let mut chain = vec![format!("volume={}", num(audio.music_volume))];
    if audio.fade_in > 0.0 {
        chain.push(format!("afade=t=in:st=0:d={}", num(audio.fade_in)));
    }
    if audio.fade_out > 0.0 && video_duration > audio.fade_out {
        chain.push(format!(
            "afade=t=out:st={}:d={}",
            num(video_duration - audio.fade_out),
            num(audio.fade_out)
        ));
    }

    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(music),
        "-filter_complex".to_string(),
        format!("[1:a]{}[music]", chain.join(",")),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "[music]".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        AUDIO_BITRATE.to_string(),
        "-shortest".to_string(),
        path_arg(output),
    ]);

    EngineInvocation {
        stage: InvocationStage::Mix,
        inputs: vec![video.to_path_buf(), music.to_path_buf()],
        args,
        output: output.to_path_buf(),
    }
}

/// Mix `music` onto `video`, writing `output`. A failed mix degrades to the
/// silent video at `output` plus a warning; only cancellation and failing to
/// keep the video are errors.
pub async fn mix(
    engine: &dyn RenderEngine,
    video: &Path,
    music: &Path,
    audio: &AudioConfig,
    video_duration: f64,
    output: &Path,
    cancel: &CancellationToken,
) -> ReelResult<MixOutcome> {
    let invocation = mix_invocation(video, music, audio, video_duration, output);

    let failure = match engine.run(&invocation, cancel).await {
        Ok(_) => {
            tracing::info!("Mixed music {} into {}", music.display(), output.display());
            return Ok(MixOutcome::Mixed(output.to_path_buf()));
        }
        Err(RenderError::Cancelled) => return Err(ReelError::Cancelled),
        Err(err) => ReelError::from(err),
    };

    tracing::warn!("Music mix failed, keeping video-only output: {}", failure);
    if output.exists() {
        let _ = tokio::fs::remove_file(output).await;
    }
    keep_video(video, output).await?;

    Ok(MixOutcome::VideoOnly {
        path: output.to_path_buf(),
        warning: ReelError::MixFailure(failure.to_string()),
    })
}

/// Move, falling back to copy when the scratch dir is on another device.
pub async fn keep_video(video: &Path, output: &Path) -> ReelResult<()> {
    if tokio::fs::rename(video, output).await.is_err() {
        tokio::fs::copy(video, output).await?;
        let _ = tokio::fs::remove_file(video).await;
    }
    Ok(())
}
