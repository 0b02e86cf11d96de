//! Origin access.
//!
//! The acquisition engine only knows that a [`Fetcher`] turns a document ID
//! into raw bytes. What the bytes are (an HTML page, for InfoLEG) is of no
//! concern to the pipeline.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use norma_cache::DocumentId;
use reqwest::{Client, Url};
use std::sync::Arc;
use tracing::{debug, instrument};

pub type FetcherHandle = Arc<dyn Fetcher>;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name of the origin (used for logging only).
    fn name(&self) -> &str;

    /// Retrieve the raw content of one document.
    ///
    /// Implementations must not retry; callers apply their own timeout.
    async fn fetch(&self, id: DocumentId) -> Result<Vec<u8>>;
}

/// Fetches norm pages over HTTP by appending `id=<n>` to a base URL.
///
/// ```
/// use norma_pipeline::fetch::HttpFetcher;
/// let fetcher = HttpFetcher::new(
///     "https://servicios.infoleg.gob.ar/infolegInternet/verNorma.do",
///     "norma/0.1",
/// ).unwrap();
/// assert_eq!(
///     fetcher.url_for(183532u64.try_into().unwrap()).as_str(),
///     "https://servicios.infoleg.gob.ar/infolegInternet/verNorma.do?id=183532"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).or_raise(|| ErrorKind::Origin(format!("bad base url {base_url:?}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::Origin(format!("unsupported scheme {:?}", base_url.scheme())));
        }
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .or_raise(|| ErrorKind::Origin("could not build HTTP client".to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, id: DocumentId) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("id", &id.to_string());
        url
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        self.base_url.host_str().unwrap_or("origin")
    }

    #[instrument(level = "debug", skip(self), fields(infoleg_id = %id))]
    async fn fetch(&self, id: DocumentId) -> Result<Vec<u8>> {
        let url = self.url_for(id);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .or_raise(|| ErrorKind::Fetch(format!("request to {url} failed")))?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Fetch(format!("HTTP {status} from {url}")));
        }
        let body = response
            .bytes()
            .await
            .or_raise(|| ErrorKind::Fetch(format!("could not read body from {url}")))?;
        if body.is_empty() {
            exn::bail!(ErrorKind::Fetch(format!("empty body from {url}")));
        }
        debug!(size = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockFetcher;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fetcher answering from a fixed table.
    ///
    /// IDs without a body fail with [`ErrorKind::Fetch`]. Individual IDs can
    /// be made to fail or to hang for a while, and every call is counted.
    #[derive(Default)]
    pub struct MockFetcher {
        bodies: Mutex<HashMap<u64, Vec<u8>>>,
        failing: Mutex<HashSet<u64>>,
        delay: Mutex<Option<Duration>>,
        calls: AtomicUsize,
        called: Mutex<Vec<u64>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every ID in `ids` with a body derived from the ID.
        pub fn serving(ids: impl IntoIterator<Item = u64>) -> Self {
            let fetcher = Self::new();
            for id in ids {
                fetcher.set_body(id, format!("<html>norma {id}</html>"));
            }
            fetcher
        }

        pub fn set_body(&self, id: u64, body: impl Into<Vec<u8>>) {
            if let Ok(mut bodies) = self.bodies.lock() {
                bodies.insert(id, body.into());
            }
        }

        pub fn fail(&self, id: u64) {
            if let Ok(mut failing) = self.failing.lock() {
                failing.insert(id);
            }
        }

        /// Sleep this long before answering any request.
        pub fn delay(&self, delay: Duration) {
            if let Ok(mut slot) = self.delay.lock() {
                *slot = Some(delay);
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// IDs requested so far, in call order.
        pub fn called(&self) -> Vec<u64> {
            self.called.lock().map(|called| called.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch(&self, id: DocumentId) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut called) = self.called.lock() {
                called.push(id.get());
            }
            let delay = self.delay.lock().ok().and_then(|slot| *slot);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let failing = self.failing.lock().is_ok_and(|failing| failing.contains(&id.get()));
            let body = self.bodies.lock().ok().and_then(|bodies| bodies.get(&id.get()).cloned());
            match body {
                Some(body) if !failing => Ok(body),
                _ => exn::bail!(ErrorKind::Fetch(format!("HTTP 404 for {id}"))),
            }
        }
    }
}
