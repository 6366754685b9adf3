//! Range resource loader.
//!
//! Serves arbitrary byte-range requests against an encrypted origin: each
//! request computes its chunk-aligned prefetch window, issues an HTTP
//! range fetch, and drives an independent [`RangeCodec`] to completion.
//! Multiple requests may be in flight concurrently; there is no ordering
//! guarantee across them, only within each one.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Mutex;
use url::Url;

use crate::decrypt::RangeCodec;
use crate::error::Result;
use crate::fetch::RangeFetcher;
use crate::protocol::media::ContentType;
use crate::track::{RawSecret, TrackDescriptor};
use crate::util::{ceil_to_chunk, chunk_index_of, floor_to_chunk};

/// Monotonically assigned identifier for an in-flight data request.
pub type RequestId = u64;

/// The chunk-aligned prefetch plan for a single data request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestPlan {
    /// The caller's requested offset, unaligned.
    pub requested_offset: u64,
    /// The caller's requested length.
    pub requested_length: u64,
    /// Start of the aligned fetch window.
    pub aligned_start: u64,
    /// End (exclusive) of the aligned fetch window, clamped to the
    /// descriptor's declared content length.
    pub aligned_end: u64,
    /// Grid index of the chunk containing `aligned_start`.
    pub chunk_index: u64,
    /// Bytes to discard from the first decrypted chunk.
    pub drop_bytes: u64,
}

/// Computes the aligned prefetch plan for `(offset, length)` against a
/// resource of declared length `total_len`. `aligned_end` is clamped to
/// `total_len` per the scheme's documented open question resolution.
#[must_use]
pub fn plan_request(offset: u64, length: u64, total_len: u64) -> RequestPlan {
    let aligned_start = floor_to_chunk(offset);
    let aligned_end = ceil_to_chunk(offset + length).min(total_len);
    RequestPlan {
        requested_offset: offset,
        requested_length: length,
        aligned_start,
        aligned_end,
        chunk_index: chunk_index_of(aligned_start),
        drop_bytes: offset - aligned_start,
    }
}

/// Content-info response for [`RangeLoader::fill_content_info`].
#[derive(Clone, Copy, Debug)]
pub struct ContentInfo {
    /// Declared total resource length.
    pub content_length: u64,
    /// Always `true`: every descriptor supports byte-range requests.
    pub byte_range_supported: bool,
    /// Content-type hint from the track descriptor.
    pub content_type: ContentType,
}

struct InFlight {
    codec: RangeCodec,
    cancel: tokio::sync::watch::Sender<bool>,
}

/// Serves byte-range requests against a single track's encrypted origin.
pub struct RangeLoader {
    descriptor: TrackDescriptor,
    secret: RawSecret,
    fetcher: Arc<dyn RangeFetcher>,
    requests: Arc<Mutex<HashMap<RequestId, InFlight>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl RangeLoader {
    /// Creates a loader for `descriptor`.
    #[must_use]
    pub fn new(descriptor: TrackDescriptor, secret: RawSecret, fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self {
            descriptor,
            secret,
            fetcher,
            requests: Arc::new(Mutex::new(HashMap::new())),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Reports content length, range support, and content-type hint.
    #[must_use]
    pub fn fill_content_info(&self) -> ContentInfo {
        ContentInfo {
            content_length: self.descriptor.content_length(),
            byte_range_supported: true,
            content_type: self.descriptor.content_type(),
        }
    }

    /// Begins servicing a data request, returning its [`RequestId`] and a
    /// channel of length-truncated, drop-bytes-applied cleartext chunks
    /// delivered strictly in increasing-offset order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying fetch cannot be started;
    /// once started, transport errors are delivered on the returned
    /// channel instead.
    pub async fn begin_data_request(
        &self,
        offset: u64,
        length: u64,
    ) -> Result<(RequestId, tokio::sync::mpsc::Receiver<Result<Vec<u8>>>)> {
        let plan = plan_request(offset, length, self.descriptor.content_length());
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let key = self.descriptor.key(&self.secret);
        let codec = RangeCodec::new(key, plan.chunk_index, plan.drop_bytes, plan.requested_length);
        let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

        {
            let mut requests = self.requests.lock().await;
            requests.insert(
                id,
                InFlight {
                    codec,
                    cancel: cancel_tx,
                },
            );
        }

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let fetcher = Arc::clone(&self.fetcher);
        let url = self.descriptor.url().clone();
        let requests = Arc::clone(&self.requests);

        tokio::spawn(async move {
            let stream = match fetcher.fetch_range(&url, plan.aligned_start, plan.aligned_end).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    requests.lock().await.remove(&id);
                    return;
                }
            };
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        return;
                    }
                    chunk = stream.next() => {
                        let mut requests = requests.lock().await;
                        if !requests.contains_key(&id) {
                            // Late callback after cancellation: no-op.
                            return;
                        }

                        match chunk {
                            Some(Ok(bytes)) => {
                                let in_flight = requests.get_mut(&id).expect("checked above");
                                match in_flight.codec.feed(&bytes) {
                                    Ok(cleartext) => {
                                        let complete = in_flight.codec.is_complete();
                                        if complete {
                                            requests.remove(&id);
                                        }
                                        drop(requests);
                                        if !cleartext.is_empty() && tx.send(Ok(cleartext)).await.is_err() {
                                            return;
                                        }
                                        if complete {
                                            return;
                                        }
                                    }
                                    Err(err) => {
                                        requests.remove(&id);
                                        drop(requests);
                                        let _ = tx.send(Err(err)).await;
                                        return;
                                    }
                                }
                            }
                            Some(Err(err)) => {
                                requests.remove(&id);
                                drop(requests);
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                            None => {
                                let in_flight = requests.get_mut(&id).expect("checked above");
                                let tail = in_flight.codec.flush();
                                requests.remove(&id);
                                drop(requests);
                                if !tail.is_empty() {
                                    let _ = tx.send(Ok(tail)).await;
                                }
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok((id, rx))
    }

    /// Aborts the underlying fetch task and discards state for `id`.
    pub async fn cancel_data_request(&self, id: RequestId) {
        let mut requests = self.requests.lock().await;
        if let Some(in_flight) = requests.remove(&id) {
            let _ = in_flight.cancel.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_aligns_offset_and_drops_prefix() {
        // N=10000, offset=1000, length=3000 -> range bytes=0-4095, drop 1000.
        let plan = plan_request(1000, 3000, 10_000);
        assert_eq!(plan.aligned_start, 0);
        assert_eq!(plan.aligned_end, 4096);
        assert_eq!(plan.chunk_index, 0);
        assert_eq!(plan.drop_bytes, 1000);
    }

    #[test]
    fn plan_clamps_aligned_end_to_total_length() {
        let plan = plan_request(9000, 5000, 10_000);
        assert_eq!(plan.aligned_end, 10_000);
    }

    #[test]
    fn plan_on_chunk_boundary_has_zero_drop_bytes() {
        let plan = plan_request(4096, 100, 10_000);
        assert_eq!(plan.aligned_start, 4096);
        assert_eq!(plan.drop_bytes, 0);
    }
}
