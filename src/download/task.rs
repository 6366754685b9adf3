//! Download task records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A task's key: `provider:track_id`, also its scheduling priority key
/// (lexicographic ascending).
pub type TaskId = String;

/// The origin a download task was enqueued from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Deezer's chunk-obfuscated CDN.
    Deezer,
    /// A YouTube progressive stream, remuxed after download.
    Youtube,
}

/// A download task's lifecycle state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, waiting for a transport slot.
    Pending,
    /// A transport task is actively fetching bytes.
    Downloading,
    /// Transport finished; the post-download decrypt/remux pass is
    /// running.
    Decrypting,
    /// Finished successfully.
    Completed,
    /// Finished with an error; `TaskRecord::error` carries the message.
    Error,
}

/// Track metadata carried alongside a download task, independent of the
/// decryption pipeline itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Metadata {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Duration in seconds.
    pub duration: u32,
    /// Thumbnail URL, if any.
    pub thumbnail: Option<String>,
}

/// A single enqueued download and its current state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    /// This task's key and scheduling priority.
    pub task_id: TaskId,
    /// The origin's encrypted/progressive URL.
    pub url: String,
    /// The track identifier.
    pub track_id: String,
    /// The download's origin.
    pub provider: Provider,
    /// Requested output format (e.g. `"flac"`, `"mp3"`, `"m4a"`).
    pub format: String,
    /// Artwork URL, if any.
    pub artwork_url: Option<String>,
    /// Track metadata.
    pub metadata: Metadata,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Final track file path, set once `status == Completed`.
    pub file_path: Option<PathBuf>,
    /// Final artwork file path, if artwork was fetched.
    pub artwork_path: Option<PathBuf>,
    /// Final track file size in bytes, set once `status == Completed`.
    pub file_size: Option<u64>,
    /// Error message, set once `status == Error`.
    pub error: Option<String>,
}

impl TaskRecord {
    /// Builds a new task record in `Pending` state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        url: String,
        track_id: String,
        provider: Provider,
        format: String,
        artwork_url: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            task_id,
            url,
            track_id,
            provider,
            format,
            artwork_url,
            metadata,
            status: TaskStatus::Pending,
            file_path: None,
            artwork_path: None,
            file_size: None,
            error: None,
        }
    }
}
