//! Persistent, slot-limited download manager.
//!
//! Mutations to the task map happen under a single async mutex standing
//! in for the scheme's serial worker queue; the whole map is
//! re-serialized to the manifest on every mutation. At most
//! [`Config::max_concurrent_downloads`] transport tasks run at once;
//! additional pending tasks start only as a slot frees, in lexicographic
//! `task_id` order.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use exponential_backoff::Backoff;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::config::Config;
use crate::decrypt::StreamCodec;
use crate::download::remux::{remux_with_fallback, NoRemuxer, Remuxer};
use crate::download::store::Store;
use crate::download::task::{Metadata, Provider, TaskId, TaskRecord, TaskStatus};
use crate::error::{Error, ErrorKind, Result};
use crate::events::DownloadEvent;
use crate::fetch::RangeFetcher;
use crate::track::TrackKey;

/// Attempt budget for a single task's transport retries.
const BACKOFF_ATTEMPTS: u32 = 5;
/// Minimum delay before the first retry.
const MIN_BACKOFF: std::time::Duration = std::time::Duration::from_millis(200);
/// Maximum delay between retries.
const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(10);

/// A persistent, slot-limited background download engine.
pub struct Manager {
    config: Config,
    tasks: Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
    store: Store,
    fetcher: Arc<dyn RangeFetcher>,
    remuxer: Arc<dyn Remuxer>,
    semaphore: Arc<Semaphore>,
    events: mpsc::Sender<DownloadEvent>,
    cancelled: Arc<std::sync::Mutex<std::collections::HashSet<TaskId>>>,
}

impl Manager {
    /// Creates a manager, loading any persisted manifest and reconciling
    /// orphaned `downloading` tasks back to `pending` (see
    /// `DESIGN.md`'s Open Question decision on relaunch resume).
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read.
    pub async fn new(
        config: Config,
        fetcher: Arc<dyn RangeFetcher>,
    ) -> Result<(Self, mpsc::Receiver<DownloadEvent>)> {
        let store = Store::new(config.manifest_path.clone());
        let mut tasks = store.load()?;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Downloading {
                task.status = TaskStatus::Pending;
            }
        }
        store.save(&tasks)?;

        let (events_tx, events_rx) = mpsc::channel(32);
        let manager = Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            tasks: Arc::new(Mutex::new(tasks)),
            store,
            fetcher,
            remuxer: Arc::new(NoRemuxer),
            events: events_tx,
            cancelled: Arc::new(std::sync::Mutex::new(std::collections::HashSet::new())),
            config,
        };
        Ok((manager, events_rx))
    }

    /// Replaces the default [`NoRemuxer`] with a real collaborator.
    pub fn set_remuxer(&mut self, remuxer: Arc<dyn Remuxer>) {
        self.remuxer = remuxer;
    }

    /// Enqueues a single task and schedules it if a slot is free.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be persisted.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        task_id: TaskId,
        url: String,
        track_id: String,
        provider: Provider,
        format: String,
        artwork_url: Option<String>,
        metadata: Metadata,
    ) -> Result<()> {
        let record = TaskRecord::new(task_id.clone(), url, track_id, provider, format, artwork_url, metadata);
        {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(task_id, record);
            self.store.save(&tasks)?;
        }
        self.schedule();
        Ok(())
    }

    /// Enqueues many tasks in one manifest write.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be persisted.
    pub async fn enqueue_batch(&self, records: Vec<TaskRecord>) -> Result<()> {
        {
            let mut tasks = self.tasks.lock().await;
            for record in records {
                tasks.insert(record.task_id.clone(), record);
            }
            self.store.save(&tasks)?;
        }
        self.schedule();
        Ok(())
    }

    /// Aborts `task_id`'s transport (if running) and removes its record.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be persisted.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        self.cancelled.lock()?.insert(task_id.to_owned());
        let mut tasks = self.tasks.lock().await;
        tasks.remove(task_id);
        self.store.save(&tasks)
    }

    /// Aborts all tasks and clears all state.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be persisted.
    pub async fn cancel_all(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        {
            let mut cancelled = self.cancelled.lock()?;
            cancelled.extend(tasks.keys().cloned());
        }
        tasks.clear();
        self.store.save(&tasks)
    }

    /// Removes a failed task's record so it may be re-enqueued.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is not in the `Error` state, or if
    /// the manifest cannot be persisted.
    pub async fn clear_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(task_id) {
            Some(task) if task.status == TaskStatus::Error => {
                tasks.remove(task_id);
                self.store.save(&tasks)
            }
            Some(_) => Err(Error::failed_precondition(format!(
                "task {task_id} is not in the error state"
            ))),
            None => Err(Error::not_found(format!("task {task_id} not found"))),
        }
    }

    /// Returns a snapshot of all task records.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub async fn get_downloads(&self) -> Vec<TaskRecord> {
        self.tasks.lock().await.values().cloned().collect()
    }

    /// Schedules as many pending tasks as there are free slots, in
    /// lexicographic `task_id` order. Each dispatched task re-invokes
    /// this same dispatch loop when it finishes, so a slot freed by
    /// completion (not just by the next `enqueue`) picks up the next
    /// pending task.
    fn schedule(&self) {
        schedule_tasks(
            Arc::clone(&self.tasks),
            Arc::clone(&self.semaphore),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.remuxer),
            self.store.path().to_path_buf(),
            self.config.clone(),
            self.events.clone(),
            Arc::clone(&self.cancelled),
        );
    }
}

/// Acquires as many free semaphore permits as there are pending tasks and
/// dispatches one `run_task` per permit. `run_task` calls this function
/// again after it finishes and releases its permit, so the loop
/// self-sustains across completions rather than needing a fresh
/// `enqueue`/`enqueue_batch` call to notice a freed slot.
#[allow(clippy::too_many_arguments)]
fn schedule_tasks(
    tasks: Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
    semaphore: Arc<Semaphore>,
    fetcher: Arc<dyn RangeFetcher>,
    remuxer: Arc<dyn Remuxer>,
    store_path: PathBuf,
    config: Config,
    events: mpsc::Sender<DownloadEvent>,
    cancelled: Arc<std::sync::Mutex<std::collections::HashSet<TaskId>>>,
) {
    tokio::spawn(async move {
        loop {
            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                return;
            };

            let next = {
                let mut tasks = tasks.lock().await;
                let candidate = tasks
                    .iter()
                    .filter(|(_, t)| t.status == TaskStatus::Pending)
                    .map(|(id, _)| id.clone())
                    .min();
                if let Some(id) = candidate.clone() {
                    if let Some(task) = tasks.get_mut(&id) {
                        task.status = TaskStatus::Downloading;
                    }
                    let _ = Store::new(store_path.clone()).save(&tasks);
                }
                candidate
            };

            let Some(task_id) = next else {
                drop(permit);
                return;
            };

            tokio::spawn(run_task(
                task_id,
                Arc::clone(&tasks),
                Arc::clone(&semaphore),
                permit,
                Arc::clone(&fetcher),
                Arc::clone(&remuxer),
                store_path.clone(),
                config.clone(),
                events.clone(),
                Arc::clone(&cancelled),
            ));
        }
    });
}

/// Runs one task to completion, then releases its slot and re-drives
/// [`schedule_tasks`] so a pending task waiting on a slot limit starts
/// immediately rather than waiting for the next `enqueue`.
#[allow(clippy::too_many_arguments)]
async fn run_task(
    task_id: TaskId,
    tasks: Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
    semaphore: Arc<Semaphore>,
    permit: tokio::sync::OwnedSemaphorePermit,
    fetcher: Arc<dyn RangeFetcher>,
    remuxer: Arc<dyn Remuxer>,
    store_path: PathBuf,
    config: Config,
    events: mpsc::Sender<DownloadEvent>,
    cancelled: Arc<std::sync::Mutex<std::collections::HashSet<TaskId>>>,
) {
    run_task_inner(
        &task_id,
        &tasks,
        &fetcher,
        &remuxer,
        &store_path,
        &config,
        &events,
        &cancelled,
    )
    .await;

    drop(permit);
    schedule_tasks(tasks, semaphore, fetcher, remuxer, store_path, config, events, cancelled);
}

#[allow(clippy::too_many_arguments)]
async fn run_task_inner(
    task_id: &TaskId,
    tasks: &Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
    fetcher: &Arc<dyn RangeFetcher>,
    remuxer: &Arc<dyn Remuxer>,
    store_path: &PathBuf,
    config: &Config,
    events: &mpsc::Sender<DownloadEvent>,
    cancelled: &Arc<std::sync::Mutex<std::collections::HashSet<TaskId>>>,
) {
    let record = {
        let tasks = tasks.lock().await;
        let Some(record) = tasks.get(task_id) else {
            return;
        };
        record.clone()
    };

    let mut last_err: Option<Error> = None;
    let mut temp_path = None;
    for delay in Backoff::new(BACKOFF_ATTEMPTS, MIN_BACKOFF, MAX_BACKOFF) {
        if cancelled.lock().map(|c| c.contains(task_id)).unwrap_or(false) {
            return;
        }

        match download_to_temp(&record, fetcher.as_ref(), events).await {
            Ok(path) => {
                temp_path = Some(path);
                last_err = None;
                break;
            }
            Err(err) => {
                let retryable = err.kind == ErrorKind::Unavailable;
                last_err = Some(err);
                match delay.filter(|_| retryable) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break,
                }
            }
        }
    }

    let Some(temp_path) = temp_path else {
        let err = last_err.unwrap_or_else(|| Error::unknown("download failed"));
        fail_task(tasks, store_path, task_id, err.to_string(), events).await;
        return;
    };

    {
        let mut tasks = tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = TaskStatus::Decrypting;
        }
        let _ = Store::new(store_path.clone()).save(&tasks);
    }

    let result = finish_task(&record, &temp_path, config, remuxer.as_ref(), fetcher.as_ref()).await;
    match result {
        Ok((file_path, artwork_path, file_size)) => {
            let mut tasks = tasks.lock().await;
            if let Some(task) = tasks.get_mut(task_id) {
                task.status = TaskStatus::Completed;
                task.file_path = Some(file_path.clone());
                task.artwork_path = artwork_path.clone();
                task.file_size = Some(file_size);
            }
            let _ = Store::new(store_path.clone()).save(&tasks);
            let _ = events
                .send(DownloadEvent::Complete {
                    task_id: task_id.clone(),
                    file_path,
                    artwork_path,
                    file_size,
                })
                .await;
        }
        Err(err) => {
            fail_task(tasks, store_path, task_id, err.to_string(), events).await;
        }
    }
}

async fn fail_task(
    tasks: &Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
    store_path: &PathBuf,
    task_id: &str,
    message: String,
    events: &mpsc::Sender<DownloadEvent>,
) {
    let mut tasks = tasks.lock().await;
    if let Some(task) = tasks.get_mut(task_id) {
        task.status = TaskStatus::Error;
        task.error = Some(message.clone());
    }
    let _ = Store::new(store_path.clone()).save(&tasks);
    let _ = events
        .send(DownloadEvent::Error {
            task_id: task_id.to_owned(),
            error: message,
        })
        .await;
}

async fn download_to_temp(
    record: &TaskRecord,
    fetcher: &dyn RangeFetcher,
    events: &mpsc::Sender<DownloadEvent>,
) -> Result<PathBuf> {
    let url = url::Url::parse(&record.url)?;
    let mut stream = fetcher.fetch(&url).await?;

    let temp = tempfile::NamedTempFile::new()?;
    let (mut file, path) = temp.keep().map_err(|e| Error::internal(e.to_string()))?;

    let mut reported = 0u8;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        use std::io::Write;
        file.write_all(&chunk)?;

        // Content length isn't known up front for a progressive fetch, so
        // progress is reported as a single mid-transfer tick rather than a
        // precise fraction.
        if reported == 0 {
            reported = 1;
            let _ = events
                .send(DownloadEvent::Progress {
                    task_id: record.task_id.clone(),
                    progress: 0.5,
                })
                .await;
        }
    }

    Ok(path)
}

async fn finish_task(
    record: &TaskRecord,
    temp_path: &PathBuf,
    config: &Config,
    remuxer: &dyn Remuxer,
    fetcher: &dyn RangeFetcher,
) -> Result<(PathBuf, Option<PathBuf>, u64)> {
    std::fs::create_dir_all(&config.downloads_dir)?;

    let extension = record.format.as_str();
    let file_path = config
        .downloads_dir
        .join(format!("{:?}_{}", record.provider, record.track_id).to_lowercase())
        .with_extension(extension);

    match record.provider {
        Provider::Deezer => {
            let key = TrackKey::derive(&record.track_id, &config.bf_secret);
            let mut codec = StreamCodec::new(key);
            let ciphertext = std::fs::read(temp_path)?;
            let mut cleartext = codec.feed(&ciphertext)?;
            cleartext.extend(codec.flush());
            std::fs::write(&file_path, &cleartext)?;
            std::fs::remove_file(temp_path)?;
        }
        Provider::Youtube => {
            remux_with_fallback(remuxer, temp_path, &file_path)?;
        }
    }

    let artwork_path = match record.artwork_url {
        Some(ref artwork_url) => fetch_artwork(artwork_url, record, config, fetcher).await,
        None => None,
    };

    let file_size = std::fs::metadata(&file_path)?.len();
    Ok((file_path, artwork_path, file_size))
}

/// Fetches `artwork_url` and writes it alongside the track, best-effort:
/// any failure along the way is logged and yields `None` rather than
/// failing the surrounding task.
async fn fetch_artwork(
    artwork_url: &str,
    record: &TaskRecord,
    config: &Config,
    fetcher: &dyn RangeFetcher,
) -> Option<PathBuf> {
    let url = match url::Url::parse(artwork_url) {
        Ok(url) => url,
        Err(err) => {
            log::warn!("task {}: invalid artwork URL: {err}", record.task_id);
            return None;
        }
    };

    let bytes = match fetch_all(fetcher, &url).await {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("task {}: artwork fetch failed: {err}", record.task_id);
            return None;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&config.artwork_dir) {
        log::warn!("task {}: could not create artwork dir: {err}", record.task_id);
        return None;
    }

    let path = config
        .artwork_dir
        .join(format!("{:?}_{}", record.provider, record.track_id).to_lowercase())
        .with_extension("jpg");

    match std::fs::write(&path, &bytes) {
        Ok(()) => Some(path),
        Err(err) => {
            log::warn!("task {}: could not write artwork: {err}", record.task_id);
            None
        }
    }
}

/// Drains a [`RangeFetcher`] stream into a single buffer.
async fn fetch_all(fetcher: &dyn RangeFetcher, url: &url::Url) -> Result<Vec<u8>> {
    let mut stream = fetcher.fetch(url).await?;
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ByteStream;
    use std::pin::Pin;

    struct EmptyFetcher;

    impl RangeFetcher for EmptyFetcher {
        fn fetch<'a>(
            &'a self,
            _url: &'a url::Url,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<ByteStream>> + Send + 'a>> {
            Box::pin(async move { Ok(Box::pin(futures_util::stream::empty()) as ByteStream) })
        }

        fn fetch_range<'a>(
            &'a self,
            url: &'a url::Url,
            _start: u64,
            _end: u64,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<ByteStream>> + Send + 'a>> {
            self.fetch(url)
        }
    }

    #[tokio::test]
    async fn enqueue_then_clear_after_manual_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new().unwrap();
        config.manifest_path = dir.path().join("manifest.json");
        config.downloads_dir = dir.path().join("tracks");
        config.artwork_dir = dir.path().join("artwork");

        let fetcher: Arc<dyn RangeFetcher> = Arc::new(EmptyFetcher);
        let (manager, _events) = Manager::new(config, fetcher).await.unwrap();

        manager
            .enqueue(
                "deezer:42".to_owned(),
                "https://cdn.example/42".to_owned(),
                "42".to_owned(),
                Provider::Deezer,
                "flac".to_owned(),
                None,
                Metadata::default(),
            )
            .await
            .unwrap();

        let downloads = manager.get_downloads().await;
        assert_eq!(downloads.len(), 1);
    }
}
