mod http;

pub use http::{GetResponse, HeadResponse, HttpBackend, UreqBackend};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, instrument, warn};
use url::Url;

use vellum_core::{ByteSource, DocumentSource, RangeChunk, TransportError, TransportPolicy};

/// Cooperative cancellation shared between a viewer and its in-flight
/// fetches. Once triggered it stays triggered.
#[derive(Default)]
pub struct AbortFlag {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub async fn aborted(&self) {
        // Register before checking so a trigger racing this call is not lost.
        let notified = self.notify.notified();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RangeProbe {
    pub length: u64,
    pub supports_range: bool,
}

pub struct DocumentTransport {
    backend: Arc<dyn HttpBackend>,
    policy: TransportPolicy,
}

impl DocumentTransport {
    pub fn new(backend: Arc<dyn HttpBackend>, policy: TransportPolicy) -> Self {
        Self { backend, policy }
    }

    /// Asks the server whether ranged reads are workable. A probe never fails
    /// the load; anything short of a usable answer downgrades the document to
    /// a whole-file fetch.
    pub async fn probe(&self, url: &Url) -> RangeProbe {
        match self.backend.head(url).await {
            Ok(head) if (200..300).contains(&head.status) => RangeProbe {
                length: head.content_length.unwrap_or(0),
                supports_range: head.accept_ranges && head.content_length.is_some(),
            },
            Ok(head) => {
                debug!(%url, status = head.status, "probe rejected");
                RangeProbe {
                    length: 0,
                    supports_range: false,
                }
            }
            Err(err) => {
                debug!(%url, error = %err, "probe failed");
                RangeProbe {
                    length: 0,
                    supports_range: false,
                }
            }
        }
    }

    /// Documents below the whole-file threshold, and servers that cannot
    /// serve ranges, are fetched in one request. Everything else becomes a
    /// lazy chunked source.
    #[instrument(skip(self, abort))]
    pub async fn open(
        &self,
        url: &Url,
        abort: Arc<AbortFlag>,
    ) -> Result<DocumentSource, TransportError> {
        let probe = self.probe(url).await;
        if probe.supports_range && probe.length >= self.policy.whole_file_threshold {
            debug!(%url, length = probe.length, "opening ranged source");
            return Ok(DocumentSource::Ranged(Arc::new(HttpRangeSource {
                backend: self.backend.clone(),
                url: url.clone(),
                length: probe.length,
                policy: self.policy.clone(),
                abort,
            })));
        }
        debug!(%url, length = probe.length, "fetching whole document");
        let response =
            fetch_with_retry(self.backend.as_ref(), url, None, &self.policy, &abort).await?;
        Ok(DocumentSource::Whole(response.body))
    }
}

/// Runs a GET with bounded retries. Range requests must come back as
/// 206 Partial Content; a server that answers 200 has ignored the range
/// header and its body cannot be trusted at chunk offsets.
async fn fetch_with_retry(
    backend: &dyn HttpBackend,
    url: &Url,
    range: Option<(u64, u64)>,
    policy: &TransportPolicy,
    abort: &AbortFlag,
) -> Result<GetResponse, TransportError> {
    let attempts = policy.attempts.max(1);
    let mut last_error = TransportError::Network {
        url: url.to_string(),
        message: "no fetch attempts made".into(),
    };

    for attempt in 1..=attempts {
        if abort.is_aborted() {
            return Err(TransportError::Aborted);
        }
        let outcome = tokio::select! {
            _ = abort.aborted() => return Err(TransportError::Aborted),
            outcome = backend.get(url, range) => outcome,
        };
        match outcome {
            Ok(response) if status_ok(response.status, range.is_some()) => return Ok(response),
            Ok(response) => {
                last_error = TransportError::Status {
                    url: url.to_string(),
                    status: response.status,
                };
            }
            Err(TransportError::Aborted) => return Err(TransportError::Aborted),
            Err(err) => last_error = err,
        }
        if attempt < attempts {
            warn!(%url, attempt, error = %last_error, "fetch attempt failed, retrying");
            tokio::select! {
                _ = abort.aborted() => return Err(TransportError::Aborted),
                _ = tokio::time::sleep(policy.retry_delay) => {}
            }
        }
    }

    Err(last_error)
}

fn status_ok(status: u16, ranged: bool) -> bool {
    if ranged {
        status == 206
    } else {
        (200..300).contains(&status)
    }
}

struct HttpRangeSource {
    backend: Arc<dyn HttpBackend>,
    url: Url,
    length: u64,
    policy: TransportPolicy,
    abort: Arc<AbortFlag>,
}

#[async_trait::async_trait]
impl ByteSource for HttpRangeSource {
    fn length(&self) -> u64 {
        self.length
    }

    fn chunk_size(&self) -> usize {
        self.policy.chunk_size
    }

    async fn read_range(&self, begin: u64, end: u64) -> Result<RangeChunk, TransportError> {
        if self.abort.is_aborted() {
            return Err(TransportError::Aborted);
        }
        let end = end.min(self.length);
        let is_final = end >= self.length;
        if begin >= end {
            return Ok(RangeChunk {
                bytes: bytes::Bytes::new(),
                begin,
                end,
                is_final,
            });
        }
        let response = fetch_with_retry(
            self.backend.as_ref(),
            &self.url,
            Some((begin, end)),
            &self.policy,
            &self.abort,
        )
        .await?;
        Ok(RangeChunk {
            bytes: response.body,
            begin,
            end,
            is_final,
        })
    }

    fn abort(&self) {
        self.abort.trigger();
    }
}
