//! Frame extraction for video inputs.
//!
//! Frames are decoded by an external `ffmpeg` into a scratch directory as PNG
//! files, then loaded back in order.

use crate::config::FramePolicy;
use crate::error::DetectorError;
use image::DynamicImage;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const FRAME_PREFIX: &str = "frame_";
const FRAME_PATTERN: &str = "frame_%06d.png";

/// A decoded frame and its index in the source video.
pub struct ExtractedFrame {
    pub index: u32,
    pub image: DynamicImage,
}

pub struct FrameExtractor {
    ffmpeg: PathBuf,
    policy: FramePolicy,
}

impl FrameExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>, policy: FramePolicy) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            policy,
        }
    }

    pub fn policy(&self) -> FramePolicy {
        self.policy
    }

    /// Build the ffmpeg arguments selecting every `stride`-th frame.
    pub fn build_args(&self, video: &Path, scratch: &Path) -> Vec<String> {
        let mut args = vec![
            "-nostdin".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
        ];

        if self.policy.stride > 1 {
            args.push("-vf".to_string());
            args.push(format!("select=not(mod(n\\,{}))", self.policy.stride));
        }

        args.extend([
            "-fps_mode".to_string(),
            "vfr".to_string(),
            "-frames:v".to_string(),
            self.policy.max_frames.to_string(),
            scratch.join(FRAME_PATTERN).to_string_lossy().to_string(),
        ]);

        args
    }

    /// Decode the selected frames of `video` into memory, in source order.
    pub fn extract(&self, video: &Path, scratch: &Path) -> Result<Vec<ExtractedFrame>, DetectorError> {
        let _s = common::span!("extract_frames");

        let args = self.build_args(video, scratch);
        tracing::debug!("Running {} {}", self.ffmpeg.display(), args.join(" "));

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => DetectorError::Video(format!(
                    "ffmpeg not found at {}",
                    self.ffmpeg.display()
                )),
                _ => DetectorError::Video(format!("failed to run ffmpeg: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectorError::Video(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let frames = self.load_frames(scratch)?;
        if frames.is_empty() {
            return Err(DetectorError::Video("no frames decoded".to_string()));
        }

        tracing::debug!(
            frames = frames.len(),
            stride = self.policy.stride,
            "Extracted video frames"
        );
        Ok(frames)
    }

    fn load_frames(&self, scratch: &Path) -> Result<Vec<ExtractedFrame>, DetectorError> {
        let entries = std::fs::read_dir(scratch)
            .map_err(|e| DetectorError::Video(format!("cannot read frame directory: {}", e)))?;

        let mut numbered: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let seq = frame_sequence(&path)?;
                Some((seq, path))
            })
            .collect();
        numbered.sort_by_key(|(seq, _)| *seq);

        numbered
            .into_iter()
            .take(self.policy.max_frames as usize)
            .map(|(seq, path)| -> Result<ExtractedFrame, DetectorError> {
                let image = image::open(&path)?;
                Ok(ExtractedFrame {
                    index: source_index(seq, self.policy.stride),
                    image,
                })
            })
            .collect()
    }
}

/// Sequence number ffmpeg gave an output file (1-based).
fn frame_sequence(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(FRAME_PREFIX)?.parse().ok()
}

fn source_index(seq: u32, stride: u32) -> u32 {
    seq.saturating_sub(1).saturating_mul(stride.max(1))
}
