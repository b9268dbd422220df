//! Elementary-stream retrieval.
//!
//! Fetching one stream is a two-step affair: the resolver tool turns a watch
//! URL into a direct media URL for the requested track kind, then the bytes
//! are streamed over HTTP into a caller-supplied file. Failures split into
//! `ItemUnavailable` (the origin denies or lacks the item) and `Transport`
//! (everything else), so callers can apply their own skip policy.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::process::Command;

use url::Url;

use crate::error::{PipelineError, PipelineResult};

/// Which elementary stream of an item to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Picture-only track.
    Video,
    /// Highest-quality sound-only track.
    Audio,
}

impl StreamKind {
    /// Resolver format selector for this track kind.
    fn format_selector(self) -> &'static str {
        match self {
            StreamKind::Video => "bestvideo[ext=mp4]/bestvideo",
            StreamKind::Audio => "bestaudio[ext=m4a]/bestaudio",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

const ORIGIN_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

/// Checks that a source URL actually points at the supported origin before
/// any network or filesystem activity happens. Invalid identifiers are the
/// caller's fault and come back as `InvalidInput`.
pub fn validate_source_url(raw: &str) -> PipelineResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput(
            "source URL must not be empty".into(),
        ));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| PipelineError::InvalidInput(format!("not a valid URL: {trimmed}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::InvalidInput(format!(
            "unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| PipelineError::InvalidInput(format!("URL has no host: {trimmed}")))?;
    if !ORIGIN_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h)) {
        return Err(PipelineError::InvalidInput(format!(
            "unrecognized origin host: {host}"
        )));
    }
    Ok(parsed)
}

/// Stderr fragments that mean the origin will never serve this item to us:
/// removed, private, terminated account, region block, age wall, or an
/// access-denied HTTP status surfaced by the resolver.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "this video is not available",
    "has been removed",
    "account associated with this video has been terminated",
    "not available in your country",
    "blocked it in your country",
    "sign in to confirm your age",
    "members-only",
    "http error 401",
    "http error 403",
    "http error 404",
    "http error 410",
    "http error 451",
];

fn classify_resolver_failure(stderr: &str) -> PipelineError {
    let lowered = stderr.to_ascii_lowercase();
    let excerpt = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("resolver produced no diagnostics")
        .to_owned();
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        PipelineError::ItemUnavailable(excerpt)
    } else {
        PipelineError::Transport(excerpt)
    }
}

/// Asks the resolver tool for the direct media URL of the requested track.
fn resolve_stream_url(source_url: &str, kind: StreamKind) -> PipelineResult<String> {
    let output = Command::new("yt-dlp")
        .arg("--get-url")
        .arg("--format")
        .arg(kind.format_selector())
        .arg("--no-playlist")
        .arg("--no-warnings")
        .arg(source_url)
        .output()
        .map_err(|err| PipelineError::Transport(format!("unable to launch resolver: {err}")))?;

    if !output.status.success() {
        return Err(classify_resolver_failure(&String::from_utf8_lossy(
            &output.stderr,
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            PipelineError::Transport(format!(
                "resolver returned no {} stream URL for {source_url}",
                kind.label()
            ))
        })
}

fn classify_http_failure(err: ureq::Error) -> PipelineError {
    match err {
        ureq::Error::Status(code @ (401 | 403 | 404 | 410 | 451), _) => {
            PipelineError::ItemUnavailable(format!("origin returned HTTP {code}"))
        }
        ureq::Error::Status(code, _) => {
            PipelineError::Transport(format!("origin returned HTTP {code}"))
        }
        ureq::Error::Transport(transport) => PipelineError::Transport(transport.to_string()),
    }
}

/// Copies a byte stream end-to-end into `dest`, creating the file.
fn copy_stream_to_file(mut reader: impl Read, dest: &Path) -> PipelineResult<u64> {
    let file = File::create(dest)
        .map_err(|err| PipelineError::Transport(format!("creating {}: {err}", dest.display())))?;
    let mut writer = BufWriter::new(file);
    let written = io::copy(&mut reader, &mut writer)
        .map_err(|err| PipelineError::Transport(format!("writing {}: {err}", dest.display())))?;
    writer
        .flush()
        .map_err(|err| PipelineError::Transport(format!("flushing {}: {err}", dest.display())))?;
    Ok(written)
}

/// Retrieves one elementary stream of `source_url` into `dest`.
///
/// Creates exactly one file at the caller-supplied path. On failure a partial
/// file may remain; unlinking it is the caller's responsibility (the item
/// workspace scrub takes care of it in the pipeline).
pub fn fetch(source_url: &str, kind: StreamKind, dest: &Path) -> PipelineResult<()> {
    let stream_url = resolve_stream_url(source_url, kind)?;
    let response = ureq::get(&stream_url).call().map_err(classify_http_failure)?;
    copy_stream_to_file(response.into_reader(), dest)?;
    Ok(())
}
