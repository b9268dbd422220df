//! Combining a picture track and a sound track into one playable container.
//!
//! The work is delegated to an ffmpeg subprocess: the picture track is
//! stream-copied (no re-encode, original quality, minimal CPU) and the sound
//! track is transcoded to AAC so the result plays everywhere mp4 does. The
//! call blocks until the subprocess exits and reports its captured status.

use std::path::Path;
use std::process::Command;

use crate::error::{PipelineError, PipelineResult};

/// Muxes `video_path` and `audio_path` into a single mp4 at `output_path`.
///
/// A successful return means the container was fully written. On failure the
/// output may be partial; unlinking it is the caller's responsibility.
pub fn mux(video_path: &Path, audio_path: &Path, output_path: &Path) -> PipelineResult<()> {
    let output = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-nostats")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-i")
        .arg(audio_path)
        .arg("-c:v")
        .arg("copy")
        .arg("-c:a")
        .arg("aac")
        .arg("-f")
        .arg("mp4")
        .arg(output_path)
        .output()
        .map_err(|err| PipelineError::Mux(format!("unable to launch ffmpeg: {err}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PipelineError::Mux(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr_excerpt(&output.stderr)
        )))
    }
}

/// Last non-empty stderr line, the one ffmpeg puts its actual error on.
fn stderr_excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("no diagnostics")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_excerpt_takes_last_line() {
        let stderr = b"warning: something\n\n[mp4 @ 0x1] could not write header\n";
        assert_eq!(stderr_excerpt(stderr), "[mp4 @ 0x1] could not write header");
    }

    #[test]
    fn stderr_excerpt_handles_empty_output() {
        assert_eq!(stderr_excerpt(b""), "no diagnostics");
    }
}
