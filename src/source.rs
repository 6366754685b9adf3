//! Push-pull streaming input source.
//!
//! A producer task pulls the encrypted origin, decrypts it through the
//! stream-mode chunk codec, and appends cleartext to a temp file. A
//! synchronous, blocking reader serves `read`/`seek`/`length` against
//! that temp file, waiting on a condition variable for bytes it does not
//! yet have. This is the core contribution of the crate: everything else
//! is bookkeeping around this pipeline.
//!
//! # Examples
//!
//! ```no_run
//! use deezer_enc::source::StreamingSource;
//! use deezer_enc::track::TrackDescriptor;
//! use deezer_enc::fetch::HttpFetcher;
//! use std::sync::Arc;
//!
//! # fn example(descriptor: TrackDescriptor, secret: [u8; 16]) -> deezer_enc::error::Result<()> {
//! let fetcher = Arc::new(HttpFetcher::new("deezer-enc/0.1")?);
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let mut source = StreamingSource::new(descriptor, secret, fetcher, runtime.handle().clone());
//! source.open()?;
//! let mut buf = [0u8; 4096];
//! let n = source.read(&mut buf)?;
//! source.close();
//! # Ok(())
//! # }
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::runtime::Handle;

use crate::decrypt::StreamCodec;
use crate::error::{Error, Result};
use crate::fetch::RangeFetcher;
use crate::track::{RawSecret, TrackDescriptor};

/// Upper bound on a single blocking wait, per the scheme's documented
/// discipline: waits must be bounded so cancellation stays responsive
/// without spinning.
const WAIT_QUANTUM: Duration = Duration::from_millis(100);

/// Shared state guarded by a single mutex, paired with a condvar signaled
/// on every cleartext commit, on fetcher termination, and on cancel.
struct State {
    bytes_downloaded: u64,
    bytes_written: u64,
    read_offset: u64,
    download_complete: bool,
    download_failed: Option<Error>,
    cancelled: bool,
    open: bool,
}

impl State {
    fn new() -> Self {
        Self {
            bytes_downloaded: 0,
            bytes_written: 0,
            read_offset: 0,
            download_complete: false,
            download_failed: None,
            cancelled: false,
            open: false,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A synchronous, blocking, seekable streaming input source over an
/// encrypted origin.
pub struct StreamingSource {
    descriptor: TrackDescriptor,
    secret: RawSecret,
    fetcher: Arc<dyn RangeFetcher>,
    runtime: Handle,
    shared: Arc<Shared>,
    temp_path: Option<PathBuf>,
    read_handle: Option<File>,
    cancel_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl StreamingSource {
    /// Creates a new, unopened source for `descriptor`.
    #[must_use]
    pub fn new(
        descriptor: TrackDescriptor,
        secret: RawSecret,
        fetcher: Arc<dyn RangeFetcher>,
        runtime: Handle,
    ) -> Self {
        Self {
            descriptor,
            secret,
            fetcher,
            runtime,
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                condvar: Condvar::new(),
            }),
            temp_path: None,
            read_handle: None,
            cancel_tx: None,
        }
    }

    /// Allocates a temp file and spawns the fetcher task. Idempotent if
    /// already open.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be created.
    pub fn open(&mut self) -> Result<()> {
        {
            let state = self.shared.state.lock()?;
            if state.open {
                return Ok(());
            }
        }

        let temp_file = tempfile::NamedTempFile::new().map_err(Error::from)?;
        let (file, path) = temp_file.keep().map_err(|e| Error::internal(e.to_string()))?;
        self.read_handle = Some(File::open(&path)?);
        self.temp_path = Some(path.clone());

        {
            let mut state = self.shared.state.lock()?;
            state.open = true;
        }

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        let shared = Arc::clone(&self.shared);
        let fetcher = Arc::clone(&self.fetcher);
        let url = self.descriptor.url().clone();
        let key = self.descriptor.key(&self.secret);

        self.runtime.spawn(async move {
            run_producer(shared, fetcher, url, key, file, cancel_rx).await;
        });

        Ok(())
    }

    /// Fills up to `buf.len()` bytes starting at the current read
    /// offset. Returns the number of bytes read; short (including zero)
    /// reads only happen at EOF.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error once any buffered cleartext has been
    /// exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let offset = {
            let state = self.shared.state.lock()?;
            state.read_offset
        };

        // A read returns short only at true EOF (or on cancellation/
        // failure): block for the full request, capped at the declared
        // length, rather than for a single byte past the current offset.
        let remaining = self.descriptor.content_length().saturating_sub(offset);
        let want = (buf.len() as u64).min(remaining);
        if want == 0 {
            return Ok(0);
        }

        let available = self.wait_until_available(offset + want)?;
        if available <= offset {
            return Ok(0);
        }

        let read_handle = self
            .read_handle
            .as_mut()
            .ok_or_else(|| Error::failed_precondition("source is not open"))?;
        read_handle.seek(SeekFrom::Start(offset))?;

        let to_read = (available.saturating_sub(offset) as usize).min(buf.len());
        let n = read_handle.read(&mut buf[..to_read])?;

        let mut state = self.shared.state.lock()?;
        state.read_offset += n as u64;
        Ok(n)
    }

    /// Blocks until `bytes_written >= offset` or the fetch terminates,
    /// then repositions the read cursor. Seeking past the declared
    /// length is allowed and simply positions at EOF on the next read.
    ///
    /// # Errors
    ///
    /// Propagates a fetcher failure if one occurred before the target
    /// offset became available.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.wait_until_available(offset)?;
        let mut state = self.shared.state.lock()?;
        state.read_offset = offset;
        Ok(())
    }

    /// The declared ciphertext/cleartext length.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.descriptor.content_length()
    }

    /// The current read offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn offset(&self) -> Result<u64> {
        Ok(self.shared.state.lock()?.read_offset)
    }

    /// Always `true`: this source supports arbitrary seeking, bounded by
    /// how much of the stream has been committed.
    #[must_use]
    pub fn supports_seeking(&self) -> bool {
        true
    }

    /// Cancels the fetcher, releases handles, and deletes the temp file.
    /// Safe to call multiple times or from a final owner's destructor.
    pub fn close(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.cancelled = true;
            state.open = false;
        }
        self.shared.condvar.notify_all();

        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        self.read_handle = None;
        if let Some(path) = self.temp_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Blocks in `WAIT_QUANTUM` increments until `bytes_written >=
    /// target`, the fetch completes, or cancellation/failure occurs.
    /// Returns the `bytes_written` snapshot actually reached. Never
    /// holds the state lock while sleeping.
    fn wait_until_available(&self, target: u64) -> Result<u64> {
        loop {
            let state = self.shared.state.lock()?;

            if state.cancelled {
                return Ok(state.bytes_written);
            }
            if state.bytes_written >= target
                || state.download_complete
                || state.download_failed.is_some()
            {
                let bytes_written = state.bytes_written;
                if let Some(ref err) = state.download_failed {
                    if bytes_written <= state.read_offset {
                        return Err(Error::new(err.kind, err.error.to_string()));
                    }
                }
                return Ok(bytes_written);
            }

            let (_state, timeout) = self
                .shared
                .condvar
                .wait_timeout(state, WAIT_QUANTUM)
                .map_err(|_| Error::internal("streaming source lock poisoned"))?;
            let _ = timeout;
        }
    }
}

async fn run_producer(
    shared: Arc<Shared>,
    fetcher: Arc<dyn RangeFetcher>,
    url: url::Url,
    key: crate::track::TrackKey,
    mut file: File,
    mut cancel_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut codec = StreamCodec::new(key);

    let stream = match fetcher.fetch(&url).await {
        Ok(stream) => stream,
        Err(err) => {
            fail(&shared, err);
            return;
        }
    };
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                return;
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        if let Ok(mut state) = shared.state.lock() {
                            state.bytes_downloaded += bytes.len() as u64;
                        }
                        match codec.feed(&bytes) {
                            Ok(cleartext) => {
                                if !commit(&shared, &mut file, &cleartext) {
                                    return;
                                }
                            }
                            Err(err) => {
                                fail(&shared, err);
                                return;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        fail(&shared, err);
                        return;
                    }
                    None => {
                        let tail = codec.flush();
                        let _ = commit(&shared, &mut file, &tail);
                        if let Ok(mut state) = shared.state.lock() {
                            state.download_complete = true;
                        }
                        shared.condvar.notify_all();
                        return;
                    }
                }
            }
        }
    }
}

fn commit(shared: &Arc<Shared>, file: &mut File, cleartext: &[u8]) -> bool {
    if cleartext.is_empty() {
        return true;
    }
    if file.write_all(cleartext).is_err() {
        fail(shared, Error::internal("temp file write failed"));
        return false;
    }
    if let Ok(mut state) = shared.state.lock() {
        state.bytes_written += cleartext.len() as u64;
    }
    shared.condvar.notify_all();
    true
}

fn fail(shared: &Arc<Shared>, err: Error) {
    if let Ok(mut state) = shared.state.lock() {
        state.download_failed = Some(err);
    }
    shared.condvar.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::media::ContentType;
    use std::pin::Pin;
    use std::time::Duration as StdDuration;

    use futures_util::stream;

    struct PacedFetcher {
        chunk: Vec<u8>,
        delay: StdDuration,
    }

    impl RangeFetcher for PacedFetcher {
        fn fetch<'a>(
            &'a self,
            _url: &'a url::Url,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<crate::fetch::ByteStream>> + Send + 'a>>
        {
            Box::pin(async move {
                let chunk = self.chunk.clone();
                let delay = self.delay;
                let s = stream::unfold(0usize, move |sent| {
                    let chunk = chunk.clone();
                    async move {
                        if sent >= 100 {
                            return None;
                        }
                        tokio::time::sleep(delay).await;
                        Some((Ok(chunk.clone()), sent + 1))
                    }
                });
                Ok(Box::pin(s) as crate::fetch::ByteStream)
            })
        }

        fn fetch_range<'a>(
            &'a self,
            url: &'a url::Url,
            _start: u64,
            _end: u64,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<crate::fetch::ByteStream>> + Send + 'a>>
        {
            self.fetch(url)
        }
    }

    #[tokio::test]
    async fn blocking_seek_then_read_returns_expected_bytes() {
        // 100 KiB stream delivered at 1 KiB per 10ms; seek past the
        // midpoint and expect the read to block until the bytes commit.
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(PacedFetcher {
            chunk: vec![0xAB; 1024],
            delay: StdDuration::from_millis(10),
        });

        let url = url::Url::parse("https://cdn.example/track.bin").unwrap();
        let descriptor = TrackDescriptor::new("42", url, 100 * 1024, ContentType::Mpeg);
        let handle = Handle::current();

        let mut source = StreamingSource::new(descriptor, *b"g4el58wc0zvf9na1", fetcher, handle);
        source.open().unwrap();

        let join = tokio::task::spawn_blocking(move || {
            source.seek(50_000).unwrap();
            let mut buf = [0u8; 4096];
            let n = source.read(&mut buf).unwrap();
            source.close();
            (n, buf)
        });

        let (n, _buf) = join.await.unwrap();
        // Well short of EOF, so the full request must be satisfied rather
        // than returning as soon as a single byte past the seek target
        // has committed.
        assert_eq!(n, 4096);
    }

    #[tokio::test]
    async fn read_near_eof_returns_only_what_remains() {
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(PacedFetcher {
            chunk: vec![0xCD; 1024],
            delay: StdDuration::from_millis(5),
        });

        let total_length = 100 * 1024;
        let url = url::Url::parse("https://cdn.example/track.bin").unwrap();
        let descriptor = TrackDescriptor::new("42", url, total_length, ContentType::Mpeg);
        let handle = Handle::current();

        let mut source = StreamingSource::new(descriptor, *b"g4el58wc0zvf9na1", fetcher, handle);
        source.open().unwrap();

        let join = tokio::task::spawn_blocking(move || {
            source.seek(total_length - 512).unwrap();
            let mut buf = [0u8; 4096];
            let n = source.read(&mut buf).unwrap();
            let eof = source.read(&mut buf).unwrap();
            source.close();
            (n, eof)
        });

        let (n, eof) = join.await.unwrap();
        assert_eq!(n, 512);
        assert_eq!(eof, 0);
    }
}
