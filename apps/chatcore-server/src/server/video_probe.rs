use std::path::Path;
use std::process::Command;

/// Narrow contract the core needs from an external video-metadata toolkit
/// (SPEC_FULL.md §10.4). Implementations shell out to a subprocess; the
/// core never links against a media library directly.
pub(crate) trait VideoProbe: Send + Sync {
    /// Decoded first frame as a flat RGB8 bitmap, plus its width/height.
    fn first_frame(&self, path: &Path) -> Result<(Vec<u8>, u32, u32), VideoProbeError>;
    fn duration_secs(&self, path: &Path) -> Result<f64, VideoProbeError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum VideoProbeError {
    #[error("subprocess failed: {0}")]
    Subprocess(String),
    #[error("unexpected subprocess output")]
    BadOutput,
}

/// Shells out to `ffmpeg`/`ffprobe` as the adapter for [`VideoProbe`]. Both
/// binaries are assumed to be on `PATH`; their absence surfaces as a
/// best-effort miss (SPEC_FULL.md §4.3), not a handler failure.
pub(crate) struct FfmpegVideoProbe;

impl VideoProbe for FfmpegVideoProbe {
    fn first_frame(&self, path: &Path) -> Result<(Vec<u8>, u32, u32), VideoProbeError> {
        let probe = Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height", "-of", "csv=s=x:p=0"])
            .arg(path)
            .output()
            .map_err(|e| VideoProbeError::Subprocess(e.to_string()))?;
        if !probe.status.success() {
            return Err(VideoProbeError::Subprocess(String::from_utf8_lossy(&probe.stderr).into_owned()));
        }
        let dims = String::from_utf8_lossy(&probe.stdout);
        let (width, height) = dims
            .trim()
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .ok_or(VideoProbeError::BadOutput)?;

        let frame = Command::new("ffmpeg")
            .args(["-y", "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .output()
            .map_err(|e| VideoProbeError::Subprocess(e.to_string()))?;
        if !frame.status.success() {
            return Err(VideoProbeError::Subprocess(String::from_utf8_lossy(&frame.stderr).into_owned()));
        }
        Ok((frame.stdout, width, height))
    }

    fn duration_secs(&self, path: &Path) -> Result<f64, VideoProbeError> {
        let probe = Command::new("ffprobe")
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(path)
            .output()
            .map_err(|e| VideoProbeError::Subprocess(e.to_string()))?;
        if !probe.status.success() {
            return Err(VideoProbeError::Subprocess(String::from_utf8_lossy(&probe.stderr).into_owned()));
        }
        String::from_utf8_lossy(&probe.stdout).trim().parse().map_err(|_| VideoProbeError::BadOutput)
    }
}

#[cfg(test)]
mod tests {
    use super::{VideoProbe, VideoProbeError};
    use std::path::Path;

    struct FakeProbe;
    impl VideoProbe for FakeProbe {
        fn first_frame(&self, _path: &Path) -> Result<(Vec<u8>, u32, u32), VideoProbeError> {
            Ok((vec![255; 4 * 4 * 3], 4, 4))
        }
        fn duration_secs(&self, _path: &Path) -> Result<f64, VideoProbeError> {
            Ok(12.5)
        }
    }

    #[test]
    fn fake_probe_satisfies_the_trait_contract() {
        let probe = FakeProbe;
        let (bitmap, w, h) = probe.first_frame(Path::new("ignored.mp4")).unwrap();
        assert_eq!(bitmap.len(), (w * h * 3) as usize);
        assert_eq!(probe.duration_secs(Path::new("ignored.mp4")).unwrap(), 12.5);
    }
}
