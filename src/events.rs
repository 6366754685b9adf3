//! Event types forwarded from the download manager to the host runtime.
//!
//! The download bridge API names three events the host runtime consumes:
//! progress, completion, and error. They are delivered on a
//! `tokio::sync::mpsc` channel rather than via a callback, matching how
//! the rest of this crate forwards internal state transitions.

use std::path::PathBuf;

use crate::download::task::TaskId;

/// An event emitted by [`crate::download::Manager`] as a task progresses.
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    /// Fractional progress in `[0.0, 1.0]`.
    Progress {
        /// The task this event concerns.
        task_id: TaskId,
        /// Fraction of bytes transferred so far.
        progress: f32,
    },
    /// The task finished successfully.
    Complete {
        /// The task this event concerns.
        task_id: TaskId,
        /// Path to the final track file.
        file_path: PathBuf,
        /// Path to the final artwork file, if any was fetched.
        artwork_path: Option<PathBuf>,
        /// Size in bytes of the final track file.
        file_size: u64,
    },
    /// The task failed.
    Error {
        /// The task this event concerns.
        task_id: TaskId,
        /// A human-readable description of the failure.
        error: String,
    },
}
