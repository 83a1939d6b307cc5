//! Place to put utilities that are only used by tests.

use crate::llm::{BackendError, Completion, CompletionBackend, CompletionRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Returns a new temporary directory. Unlike the defaults in the `tempdir` and `tempfile` crates,
/// this directory is not world-accessible by default.
pub fn tempdir() -> std::io::Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o700));
    }
    builder.tempdir()
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<Completion, BackendError> + Send + Sync>;

/// A completion backend that can be programmed to have many different behaviors, for testing code
/// that talks to an LLM.
///
/// Scripted responses are consumed in order. Once the script runs out, the responder is called.
///
/// # Example
/// ```
/// use ats_core::test_util::MockBackend;
/// let backend = MockBackend::new()
///     .then_ok("first answer", 10, 2)
///     .respond(|_| Ok(Default::default()));
/// ```
pub struct MockBackend {
    script: Mutex<VecDeque<Result<Completion, BackendError>>>,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a MockBackend that answers "OK" to everything.
    pub fn new() -> MockBackend {
        MockBackend {
            script: Mutex::new(VecDeque::new()),
            responder: Box::new(|_| {
                Ok(Completion {
                    content: "OK".into(),
                    tokens_in: 1,
                    tokens_out: 1,
                })
            }),
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Queues a successful completion.
    pub fn then_ok(self, content: &str, tokens_in: u64, tokens_out: u64) -> MockBackend {
        self.push(Ok(Completion {
            content: content.into(),
            tokens_in,
            tokens_out,
        }))
    }

    /// Queues a failed attempt.
    pub fn then_err(self, error: BackendError) -> MockBackend {
        self.push(Err(error))
    }

    /// Sets the closure used once the scripted responses are exhausted.
    pub fn respond<F>(mut self, f: F) -> MockBackend
    where
        F: Fn(&CompletionRequest) -> Result<Completion, BackendError> + Send + Sync + 'static,
    {
        self.responder = Box::new(f);
        self
    }

    /// Makes every call sleep before answering.
    pub fn delay(mut self, delay: Duration) -> MockBackend {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(self, result: Result<Completion, BackendError>) -> MockBackend {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(result) => result,
            None => (self.responder)(request),
        }
    }
}
