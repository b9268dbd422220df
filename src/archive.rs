//! Incremental packaging of merged outputs into a compressed archive.
//!
//! The archive is written entry by entry straight into the caller's sink, so
//! a batch of unbounded total size never needs to fit in memory or on disk a
//! second time. The sink is typically the write half of a duplex pipe whose
//! read half feeds the HTTP response body.

use std::fs::File;
use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::MergedOutput;

/// Download name of the batch artifact.
pub const ARCHIVE_FILE_NAME: &str = "playlist_videos.tar.gz";

/// MIME type signaled for the batch artifact.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Streams a gzip-compressed tar of `outputs` into `sink`.
///
/// Every output file is reclaimed once the transfer ends, whether it
/// succeeded or the sink went away mid-write; delivery and cleanup are
/// deliberately independent. An empty `outputs` still produces a well-formed
/// zero-entry archive.
pub fn stream_archive<W: Write>(outputs: Vec<MergedOutput>, sink: W) -> PipelineResult<()> {
    let result = write_entries(&outputs, sink);
    drop(outputs);
    result
}

fn write_entries<W: Write>(outputs: &[MergedOutput], sink: W) -> PipelineResult<()> {
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for output in outputs {
        let mut file = File::open(&output.path).map_err(|err| {
            PipelineError::Archive(format!("opening {}: {err}", output.path.display()))
        })?;
        builder
            .append_file(&output.archive_name, &mut file)
            .map_err(|err| {
                PipelineError::Archive(format!("adding {}: {err}", output.archive_name))
            })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|err| PipelineError::Archive(format!("finalizing archive: {err}")))?;
    let mut sink = encoder
        .finish()
        .map_err(|err| PipelineError::Archive(format!("finalizing compression: {err}")))?;
    sink.flush()
        .map_err(|err| PipelineError::Archive(format!("flushing archive sink: {err}")))?;
    Ok(())
}
