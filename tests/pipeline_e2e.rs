//! End-to-end pipeline flows driven by stubbed external tools.
//!
//! The resolver and muxer are bash stubs installed on PATH, and the origin is
//! a one-shot TCP responder, so every scenario runs hermetically: no network,
//! no real yt-dlp or ffmpeg.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use flate2::read::GzDecoder;
use serial_test::serial;
use tempfile::tempdir;
use tubedrop_tools::error::PipelineError;
use tubedrop_tools::fetch::{StreamKind, fetch};
use tubedrop_tools::mux::mux;
use tubedrop_tools::pipeline::{BatchCoordinator, MediaItem, SkipLog, process_item};
use tubedrop_tools::{archive::stream_archive, pipeline::BatchResult};

const STREAM_URL_VAR: &str = "TUBEDROP_TEST_STREAM_URL";

/// Restores PATH when dropped, mirroring how the stubs are installed.
struct PathGuard {
    original: Option<String>,
}

impl PathGuard {
    fn prepend(dir: &Path) -> Self {
        let original = env::var("PATH").ok();
        let new_path = match &original {
            Some(value) => format!("{}:{}", dir.display(), value),
            None => dir.display().to_string(),
        };
        unsafe {
            env::set_var("PATH", new_path);
        }
        Self { original }
    }

    fn replace(dir: &Path) -> Self {
        let original = env::var("PATH").ok();
        unsafe {
            env::set_var("PATH", dir.display().to_string());
        }
        Self { original }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if let Some(value) = &self.original {
            unsafe {
                env::set_var("PATH", value);
            }
        }
    }
}

struct EnvVarGuard {
    key: &'static str,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: &str) -> Self {
        unsafe {
            env::set_var(key, value);
        }
        Self { key }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        unsafe {
            env::remove_var(self.key);
        }
    }
}

/// Installs `yt-dlp` and `ffmpeg` stubs into `dir`.
///
/// The resolver stub fails with an unavailability message when the watch URL
/// contains "unavailable", otherwise it prints the stream URL from the test
/// environment. The muxer stub concatenates its two inputs into the output,
/// unless the picture input contains "poison", in which case it fails the way
/// a broken stream makes the real tool fail.
fn install_tool_stubs(dir: &Path) {
    let ytdlp = r#"#!/usr/bin/env bash
set -euo pipefail
url="${@: -1}"
if [[ "$url" == *unavailable* ]]; then
    echo "ERROR: [youtube] ${url}: Video unavailable" >&2
    exit 1
fi
echo "${TUBEDROP_TEST_STREAM_URL}"
"#;
    let ffmpeg = r#"#!/usr/bin/env bash
set -euo pipefail
inputs=()
prev=""
for arg in "$@"; do
    if [[ "$prev" == "-i" ]]; then
        inputs+=("$arg")
    fi
    prev="$arg"
done
out="${@: -1}"
if grep -q poison "${inputs[0]}"; then
    echo "Error while processing input stream" >&2
    exit 1
fi
cat "${inputs[@]}" > "$out"
"#;
    for (name, script) in [("yt-dlp", ytdlp), ("ffmpeg", ffmpeg)] {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
}

/// Serves the given responses once each, in order, then stops accepting.
fn spawn_origin(responses: Vec<(u16, &'static [u8])>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let reason = if status == 200 { "OK" } else { "Not Found" };
            let header = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        }
    });
    format!("http://{addr}/stream")
}

fn workspace_dirs(work_root: &Path) -> Vec<std::path::PathBuf> {
    if !work_root.exists() {
        return Vec::new();
    }
    fs::read_dir(work_root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect()
}

#[test]
#[serial]
fn single_item_success_scrubs_tracks_and_keeps_merged() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let origin = spawn_origin(vec![(200, b"VIDEOBYTES"), (200, b"AUDIOBYTES")]);
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, &origin);

    let work = tempdir().unwrap();
    let item = MediaItem {
        source_url: "https://www.youtube.com/watch?v=ok123".into(),
        title: "My Song".into(),
    };

    let output = process_item(&item, work.path()).unwrap();
    assert_eq!(output.archive_name, "My Song.mp4");
    assert_eq!(fs::read(&output.path).unwrap(), b"VIDEOBYTESAUDIOBYTES");

    // The two track files are gone while the merged output survives.
    let workspace = output.path.parent().unwrap().to_path_buf();
    let remaining: Vec<String> = fs::read_dir(&workspace)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining, vec!["merged.mp4".to_string()]);

    // Dropping the output reclaims the workspace entirely.
    drop(output);
    assert!(workspace_dirs(work.path()).is_empty());
}

#[test]
#[serial]
fn unavailable_item_reclaims_its_workspace() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, "http://127.0.0.1:1/unused");

    let work = tempdir().unwrap();
    let item = MediaItem {
        source_url: "https://www.youtube.com/watch?v=unavailable99".into(),
        title: "Gone".into(),
    };

    match process_item(&item, work.path()) {
        Err(PipelineError::ItemUnavailable(_)) => {}
        other => panic!("expected ItemUnavailable, got {other:?}"),
    }
    assert!(workspace_dirs(work.path()).is_empty());
}

#[test]
#[serial]
fn origin_denial_during_byte_copy_is_item_unavailable() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let origin = spawn_origin(vec![(404, b"")]);
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, &origin);

    let work = tempdir().unwrap();
    let dest = work.path().join("video.mp4");
    match fetch(
        "https://www.youtube.com/watch?v=ok123",
        StreamKind::Video,
        &dest,
    ) {
        Err(PipelineError::ItemUnavailable(_)) => {}
        other => panic!("expected ItemUnavailable, got {other:?}"),
    }
}

#[test]
#[serial]
fn mux_failure_reports_tool_diagnostics() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());

    let work = tempdir().unwrap();
    let video = work.path().join("video.mp4");
    let audio = work.path().join("audio.m4a");
    let merged = work.path().join("merged.mp4");
    fs::write(&video, b"poison").unwrap();
    fs::write(&audio, b"sound").unwrap();

    match mux(&video, &audio, &merged) {
        Err(PipelineError::Mux(message)) => {
            assert!(message.contains("Error while processing input stream"));
        }
        other => panic!("expected Mux error, got {other:?}"),
    }
}

#[test]
#[serial]
fn missing_muxer_binary_is_a_mux_error() {
    let empty = tempdir().unwrap();
    let _path = PathGuard::replace(empty.path());

    let work = tempdir().unwrap();
    let video = work.path().join("video.mp4");
    let audio = work.path().join("audio.m4a");
    fs::write(&video, b"v").unwrap();
    fs::write(&audio, b"a").unwrap();

    match mux(&video, &audio, &work.path().join("merged.mp4")) {
        Err(PipelineError::Mux(_)) => {}
        other => panic!("expected Mux error, got {other:?}"),
    }
}

#[test]
#[serial]
fn batch_with_denied_item_delivers_the_rest() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let origin = spawn_origin(vec![
        (200, b"one-video"),
        (200, b"one-audio"),
        (200, b"three-video"),
        (200, b"three-audio"),
    ]);
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, &origin);

    let work = tempdir().unwrap();
    let skip_log = Arc::new(SkipLog::default());
    let coordinator = BatchCoordinator::new(work.path().to_path_buf(), skip_log.clone());

    let items = vec![
        MediaItem {
            source_url: "https://www.youtube.com/watch?v=first".into(),
            title: "Item1Title".into(),
        },
        MediaItem {
            source_url: "https://www.youtube.com/watch?v=unavailable2".into(),
            title: "Item2Title".into(),
        },
        MediaItem {
            source_url: "https://www.youtube.com/watch?v=third".into(),
            title: "Item3Title".into(),
        },
    ];

    let BatchResult { succeeded, skipped } = coordinator.run(&items).unwrap();
    assert_eq!(succeeded.len() + skipped.len(), items.len());
    assert_eq!(skipped, vec!["Item2Title".to_string()]);
    assert_eq!(skip_log.snapshot(), skipped);

    let mut archive = Vec::new();
    stream_archive(succeeded, &mut archive).unwrap();

    let mut reader = tar::Archive::new(GzDecoder::new(archive.as_slice()));
    let names: Vec<String> = reader
        .entries()
        .unwrap()
        .map(|entry| {
            entry
                .unwrap()
                .path()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(names, vec!["Item1Title.mp4", "Item3Title.mp4"]);

    // Archival released every remaining artifact.
    assert!(workspace_dirs(work.path()).is_empty());
}

#[test]
#[serial]
fn mux_failure_in_batch_skips_only_that_item() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let origin = spawn_origin(vec![
        (200, b"v1"),
        (200, b"a1"),
        (200, b"v2"),
        (200, b"a2"),
        (200, b"poison"),
        (200, b"a3"),
        (200, b"v4"),
        (200, b"a4"),
        (200, b"v5"),
        (200, b"a5"),
    ]);
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, &origin);

    let work = tempdir().unwrap();
    let skip_log = Arc::new(SkipLog::default());
    let coordinator = BatchCoordinator::new(work.path().to_path_buf(), skip_log.clone());

    let items: Vec<MediaItem> = (1..=5)
        .map(|index| MediaItem {
            source_url: format!("https://www.youtube.com/watch?v=item{index}"),
            title: format!("Item {index}"),
        })
        .collect();

    let BatchResult { succeeded, skipped } = coordinator.run(&items).unwrap();
    assert_eq!(succeeded.len(), 4);
    assert_eq!(skipped, vec!["Item 3".to_string()]);
    assert_eq!(succeeded.len() + skipped.len(), items.len());

    // No partial or corrupt entry makes it into the archive.
    let mut archive = Vec::new();
    stream_archive(succeeded, &mut archive).unwrap();
    let mut reader = tar::Archive::new(GzDecoder::new(archive.as_slice()));
    let names: Vec<String> = reader
        .entries()
        .unwrap()
        .map(|entry| {
            entry
                .unwrap()
                .path()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(
        names,
        vec!["Item 1.mp4", "Item 2.mp4", "Item 4.mp4", "Item 5.mp4"]
    );
    assert!(workspace_dirs(work.path()).is_empty());
}

#[test]
#[serial]
fn batch_of_all_unavailable_items_skips_everything_in_order() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, "http://127.0.0.1:1/unused");

    let work = tempdir().unwrap();
    let skip_log = Arc::new(SkipLog::default());
    let coordinator = BatchCoordinator::new(work.path().to_path_buf(), skip_log.clone());

    let items: Vec<MediaItem> = (1..=3)
        .map(|index| MediaItem {
            source_url: format!("https://www.youtube.com/watch?v=unavailable{index}"),
            title: format!("Missing {index}"),
        })
        .collect();

    let BatchResult { succeeded, skipped } = coordinator.run(&items).unwrap();
    assert!(succeeded.is_empty());
    assert_eq!(skipped, vec!["Missing 1", "Missing 2", "Missing 3"]);

    // Zero outputs still produce a well-formed, zero-entry archive.
    let mut archive = Vec::new();
    stream_archive(succeeded, &mut archive).unwrap();
    let mut reader = tar::Archive::new(GzDecoder::new(archive.as_slice()));
    assert_eq!(reader.entries().unwrap().count(), 0);
}

#[test]
#[serial]
fn same_titled_items_get_distinct_archive_entries() {
    let stubs = tempdir().unwrap();
    install_tool_stubs(stubs.path());
    let _path = PathGuard::prepend(stubs.path());
    let origin = spawn_origin(vec![
        (200, b"v1"),
        (200, b"a1"),
        (200, b"v2"),
        (200, b"a2"),
    ]);
    let _stream = EnvVarGuard::set(STREAM_URL_VAR, &origin);

    let work = tempdir().unwrap();
    let coordinator =
        BatchCoordinator::new(work.path().to_path_buf(), Arc::new(SkipLog::default()));

    let items = vec![
        MediaItem {
            source_url: "https://www.youtube.com/watch?v=mixa".into(),
            title: "Mix".into(),
        },
        MediaItem {
            source_url: "https://www.youtube.com/watch?v=mixb".into(),
            title: "Mix".into(),
        },
    ];

    let BatchResult { succeeded, skipped } = coordinator.run(&items).unwrap();
    assert!(skipped.is_empty());
    let names: Vec<&str> = succeeded
        .iter()
        .map(|output| output.archive_name.as_str())
        .collect();
    assert_eq!(names, vec!["Mix.mp4", "Mix (2).mp4"]);

    // Both merged files exist independently despite the shared title.
    assert_eq!(fs::read(&succeeded[0].path).unwrap(), b"v1a1");
    assert_eq!(fs::read(&succeeded[1].path).unwrap(), b"v2a2");
}
