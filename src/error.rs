//! Error taxonomy shared by every stage of the download pipeline.
//!
//! Each variant maps to one propagation policy: `InvalidInput` is always the
//! caller's fault and surfaces before any network or filesystem activity;
//! `ItemUnavailable`, `Transport` and `Mux` are item-scoped and absorbed as
//! skips when a batch is running; `Archive` fails the whole response but
//! never the cleanup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing request data. Raised before touching the network
    /// or the disk.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The origin denies or no longer has the item (removed, private,
    /// region-blocked). Expected and common; skippable in a batch.
    #[error("item unavailable: {0}")]
    ItemUnavailable(String),

    /// Network, decode or local I/O failure mid-stream. Skippable in a batch,
    /// fatal for a single-item request.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The external muxing tool failed or could not be launched. Always fatal
    /// for the item; there is no meaningful partial mux.
    #[error("mux failure: {0}")]
    Mux(String),

    /// Failure while assembling or delivering the final archive.
    #[error("archive failure: {0}")]
    Archive(String),
}

impl PipelineError {
    /// Whether a batch may absorb this error as a per-item skip instead of
    /// aborting. Request-shape and archive errors are never item-scoped.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::ItemUnavailable(_) | Self::Transport(_) | Self::Mux(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
