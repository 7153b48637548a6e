//! Content transfer against [`FakePlatforms`]

use crate::platforms::FakePlatforms;
use async_trait::async_trait;
use mig_client::{ErrorKind, NormalizedError, SessionContext, System};
use mig_core::{ContentTransfer, TransferReport, TransferRequest};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Copies source refs onto the destination repository in memory
#[derive(Debug, Clone)]
pub struct FakeTransfer {
    platforms: FakePlatforms,
    calls: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<String>>>,
    failing_sources: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<TransferRequest>>>,
}

impl FakeTransfer {
    pub fn new(platforms: &FakePlatforms) -> Self {
        Self {
            platforms: platforms.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
            failure: Arc::new(Mutex::new(None)),
            failing_sources: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every transfer with `message` until cleared
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Fail transfers whose source URL path contains `fragment`
    pub fn fail_source(&self, fragment: &str) {
        self.failing_sources.lock().push(fragment.to_string());
    }

    pub fn clear_failures(&self) {
        *self.failure.lock() = None;
        self.failing_sources.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ContentTransfer for FakeTransfer {
    async fn transfer(&self, session: &Arc<SessionContext>, request: &TransferRequest) -> Result<TransferReport, NormalizedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        // Same credential requirement as the real transport.
        session.transport_header(System::Source)?;
        session.transport_header(System::Destination)?;

        if let Some(message) = self.failure.lock().clone() {
            return Err(NormalizedError::new(System::Transport, "git push", ErrorKind::ContentTransfer, message));
        }
        let source_path = request.source_url.path();
        if self.failing_sources.lock().iter().any(|f| source_path.contains(f.as_str())) {
            return Err(NormalizedError::new(
                System::Transport,
                "git push",
                ErrorKind::ContentTransfer,
                format!("push rejected for {source_path}"),
            ));
        }

        let (branches, tags) = self
            .platforms
            .push_content(&request.source_url, &request.destination_url)
            .map_err(|message| NormalizedError::new(System::Transport, "git clone", ErrorKind::ContentTransfer, message))?;
        Ok(TransferReport {
            refs_pushed: branches.len() + tags.len(),
            branches,
            tags,
            lfs_objects_pushed: request.lfs,
        })
    }
}
