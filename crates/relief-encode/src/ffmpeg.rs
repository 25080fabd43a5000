use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use relief_core::{ExportFormat, FrameBuffer, ReliefError, ReliefResult};

use crate::artifact::{Artifact, ArtifactMetadata, Codec};
use crate::encoder::{EncodeSettings, FrameEncoder};

/// H.264 MP4 through a system `ffmpeg`, fed raw RGBA frames on stdin.
pub struct FfmpegEncoder {
    settings: EncodeSettings,
    /// Taken by `finish`; still set when the encoder is dropped mid-stream.
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frames: u64,
}

impl FfmpegEncoder {
    /// Check if FFmpeg is available on the system.
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn new(settings: EncodeSettings) -> ReliefResult<Self> {
        if !Self::is_available() {
            return Err(ReliefError::encoding(
                "video backend 'ffmpeg' is unsupported here: ffmpeg not found in PATH",
            ));
        }
        if settings.width % 2 != 0 || settings.height % 2 != 0 {
            return Err(ReliefError::encoding(format!(
                "H.264 needs even dimensions, got {}x{}",
                settings.width, settings.height
            )));
        }
        let output = std::env::temp_dir().join(format!(
            "relief_{}_{}.mp4",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        ));

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        cmd.args([
            "-f",
            "rawvideo",
            "-pixel_format",
            "rgba",
            "-video_size",
            &format!("{}x{}", settings.width, settings.height),
            "-framerate",
            &format!("{}", settings.fps),
            "-i",
            "-",
        ]);
        cmd.args([
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-movflags",
            "+faststart",
        ]);
        cmd.arg(&output);

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReliefError::encoding(format!("failed to start ffmpeg: {}", e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReliefError::encoding("failed to open ffmpeg stdin"))?;

        Ok(Self {
            settings,
            child: Some(child),
            stdin: Some(stdin),
            output,
            frames: 0,
        })
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn push_frame(&mut self, frame: &FrameBuffer) -> ReliefResult<()> {
        self.settings.check_frame(self.frames, frame)?;
        let rgba = frame.clone().into_rgba8();
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReliefError::encoding("ffmpeg stdin already closed"))?;
        stdin.write_all(&rgba.data).map_err(|e| {
            ReliefError::encoding(format!("failed to write frame {} to ffmpeg: {}", self.frames, e))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(mut self: Box<Self>) -> ReliefResult<Artifact> {
        // closing stdin signals end of input
        drop(self.stdin.take());
        let frames = self.frames;
        let output = self.output.clone();
        let settings = self.settings.clone();
        let child = self
            .child
            .take()
            .ok_or_else(|| ReliefError::encoding("ffmpeg process already reaped"))?;
        let result = match child.wait_with_output() {
            Ok(result) => result,
            Err(e) => {
                let _ = std::fs::remove_file(&output);
                return Err(ReliefError::encoding(format!("ffmpeg process error: {}", e)));
            }
        };
        if frames == 0 {
            let _ = std::fs::remove_file(&output);
            return Err(ReliefError::encoding("no frames to encode"));
        }
        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            return Err(ReliefError::encoding(format!(
                "ffmpeg failed with status {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr)
            )));
        }
        let payload = std::fs::read(&output);
        let _ = std::fs::remove_file(&output);
        let payload = payload?;
        tracing::info!(frames, bytes = payload.len(), fps = settings.fps, "encoded H.264");
        Ok(Artifact {
            metadata: ArtifactMetadata::new(
                ExportFormat::Video,
                Codec::H264,
                settings.width,
                settings.height,
                settings.fps,
                frames,
            ),
            payload,
        })
    }
}

impl Drop for FfmpegEncoder {
    /// An unfinished encode is abandoned: stop ffmpeg and discard its output.
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        drop(self.stdin.take());
        if let Err(e) = child.kill() {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        if let Err(e) = child.wait() {
            tracing::warn!(error = %e, "failed to reap ffmpeg");
        }
        let _ = std::fs::remove_file(&self.output);
        tracing::debug!(frames = self.frames, "discarded unfinished H.264 encode");
    }
}
