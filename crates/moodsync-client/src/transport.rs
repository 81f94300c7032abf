//! HTTP calls to the sync server.

use std::future::Future;
use std::time::Duration;

use moodsync_shared::protocol::{
    ErrorBody, IdentityRequest, MeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    ME_PATH, PULL_PATH, PUSH_PATH,
};
use moodsync_shared::types::Entry;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by server")]
    RateLimited,

    #[error("Identity no longer exists on the server")]
    Gone,

    #[error("Server error: HTTP {0}")]
    Server(u16),

    #[error("Request rejected: HTTP {status} ({code:?})")]
    Rejected { status: u16, code: Option<String> },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("No identity payload available")]
    MissingIdentity,
}

impl TransportError {
    /// Worth retrying later with the same payload.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::RateLimited
                | TransportError::Server(_)
                | TransportError::Decode(_)
                | TransportError::MissingIdentity
        )
    }
}

/// The three calls the sync client makes.
pub trait SyncTransport: Send + Sync + 'static {
    fn pull(
        &self,
        init_data: &str,
        since: Option<&str>,
    ) -> impl Future<Output = Result<PullResponse, TransportError>> + Send;

    fn push(
        &self,
        init_data: &str,
        entries: &[Entry],
    ) -> impl Future<Output = Result<PushResponse, TransportError>> + Send;

    fn me(&self, init_data: &str) -> impl Future<Output = Result<MeResponse, TransportError>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("moodsync-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client, base })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("bad url: {e}")))?;

        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<R>()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()));
        }

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
            StatusCode::GONE => TransportError::Gone,
            s if s.is_server_error() => TransportError::Server(s.as_u16()),
            s => {
                let code = resp
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .map(|body| body.error.to_string());
                TransportError::Rejected {
                    status: s.as_u16(),
                    code,
                }
            }
        })
    }
}

impl SyncTransport for HttpTransport {
    async fn pull(&self, init_data: &str, since: Option<&str>) -> Result<PullResponse, TransportError> {
        let body = PullRequest {
            init_data: Some(init_data.to_string()),
            since: since.map(str::to_string),
        };
        self.post(PULL_PATH, &body).await
    }

    async fn push(&self, init_data: &str, entries: &[Entry]) -> Result<PushResponse, TransportError> {
        let body = PushRequest {
            init_data: Some(init_data.to_string()),
            entries: entries.to_vec(),
        };
        self.post(PUSH_PATH, &body).await
    }

    async fn me(&self, init_data: &str) -> Result<MeResponse, TransportError> {
        let body = IdentityRequest {
            init_data: Some(init_data.to_string()),
        };
        self.post(ME_PATH, &body).await
    }
}

/// Scriptable in-process server shared by every clone.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex, MutexGuard};

    use moodsync_shared::types::UserId;
    use tokio::sync::Notify;

    use super::*;

    pub const SERVER_TIME: &str = "2025-06-01T12:00:00.000Z";

    #[derive(Default)]
    struct Inner {
        entries: BTreeMap<String, Entry>,
        username: Option<String>,
        gone: bool,
        pull_errors: VecDeque<TransportError>,
        push_errors: VecDeque<TransportError>,
        pushes: Vec<Vec<Entry>>,
        pull_cursors: Vec<Option<String>>,
        me_calls: usize,
        pull_gate: Option<Arc<Notify>>,
    }

    #[derive(Clone, Default)]
    pub struct FakeTransport {
        inner: Arc<Mutex<Inner>>,
    }

    impl FakeTransport {
        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap()
        }

        pub fn set_username(&self, name: Option<&str>) {
            self.lock().username = name.map(str::to_string);
        }

        pub fn set_gone(&self, gone: bool) {
            self.lock().gone = gone;
        }

        pub fn fail_next_pull(&self, err: TransportError) {
            self.lock().pull_errors.push_back(err);
        }

        pub fn fail_next_push(&self, err: TransportError) {
            self.lock().push_errors.push_back(err);
        }

        /// Make every later pull wait for one `notify_one` on the returned gate.
        pub fn hold_pulls(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.lock().pull_gate = Some(Arc::clone(&gate));
            gate
        }

        pub fn seed(&self, entry: Entry) {
            self.lock().entries.insert(entry.date.clone(), entry);
        }

        pub fn remote_entries(&self) -> Vec<Entry> {
            self.lock().entries.values().cloned().collect()
        }

        pub fn pushes(&self) -> Vec<Vec<Entry>> {
            self.lock().pushes.clone()
        }

        pub fn pull_cursors(&self) -> Vec<Option<String>> {
            self.lock().pull_cursors.clone()
        }

        pub fn me_calls(&self) -> usize {
            self.lock().me_calls
        }
    }

    impl SyncTransport for FakeTransport {
        async fn pull(&self, _init_data: &str, since: Option<&str>) -> Result<PullResponse, TransportError> {
            let gate = self.lock().pull_gate.clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let mut inner = self.lock();
            inner.pull_cursors.push(since.map(str::to_string));
            if inner.gone {
                return Err(TransportError::Gone);
            }
            if let Some(err) = inner.pull_errors.pop_front() {
                return Err(err);
            }
            Ok(PullResponse {
                ok: true,
                entries: inner.entries.values().cloned().collect(),
                username: inner.username.clone(),
                server_time: Some(SERVER_TIME.to_string()),
            })
        }

        async fn push(&self, _init_data: &str, entries: &[Entry]) -> Result<PushResponse, TransportError> {
            let mut inner = self.lock();
            inner.pushes.push(entries.to_vec());
            if inner.gone {
                return Err(TransportError::Gone);
            }
            if let Some(err) = inner.push_errors.pop_front() {
                return Err(err);
            }
            let mut written = 0;
            for entry in entries {
                let newer = inner
                    .entries
                    .get(&entry.date)
                    .map_or(true, |stored| entry.updated_at > stored.updated_at);
                if newer {
                    inner.entries.insert(entry.date.clone(), entry.clone());
                    written += 1;
                }
            }
            Ok(PushResponse {
                ok: true,
                received: entries.len(),
                written,
                skipped: entries.len() - written,
            })
        }

        async fn me(&self, _init_data: &str) -> Result<MeResponse, TransportError> {
            let mut inner = self.lock();
            inner.me_calls += 1;
            if inner.gone {
                return Err(TransportError::Gone);
            }
            Ok(MeResponse {
                ok: true,
                id: UserId(1),
                username: inner.username.clone(),
            })
        }
    }
}
