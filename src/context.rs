//! Per-invocation context
//!
//! A [`Context`] is created by the dispatcher for each lifecycle phase. It
//! injects the client factory, caches built clients for the invocation,
//! carries the phase deadline and the cancellation signal, and holds the
//! resource's error classifier.

use crate::error::{Classifier, Error, Result};
use crate::otc::{ClientFactory, Service, ServiceClient};
use crate::waiter::{RetrySpec, StateWait};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fallback when no phase deadline is set
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Cloneable cancellation signal
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling; never resolves
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

type ClientKey = (Service, String, Option<String>);

#[derive(Clone)]
pub struct Context {
    invocation_id: Uuid,
    factory: Arc<ClientFactory>,
    clients: Arc<Mutex<HashMap<ClientKey, ServiceClient>>>,
    cancel: CancelToken,
    classifier: Classifier,
    deadline: Option<Instant>,
    poll_interval: Duration,
}

impl Context {
    pub fn new(factory: Arc<ClientFactory>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            factory,
            clients: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancelToken::new(),
            classifier: Classifier::default(),
            deadline: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Context for one lifecycle phase: the resource's classifier and a
    /// deadline no later than the current one. The client cache is shared.
    pub fn scoped(&self, classifier: Classifier, timeout: Duration) -> Self {
        Self {
            classifier,
            deadline: Some(self.deadline_after(timeout)),
            ..self.clone()
        }
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    pub fn factory(&self) -> &Arc<ClientFactory> {
        &self.factory
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn classifier(&self) -> Classifier {
        self.classifier
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Deadline for an operation of `timeout`, clamped to the phase deadline
    pub fn deadline_after(&self, timeout: Duration) -> Instant {
        let now = Instant::now();
        let wanted = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        self.deadline.map_or(wanted, |d| d.min(wanted))
    }

    /// Time left before the phase deadline
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map_or(DEFAULT_OPERATION_TIMEOUT, |d| d.saturating_duration_since(Instant::now()))
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Client for `service` in the default region and project
    pub async fn client(&self, service: Service) -> Result<ServiceClient> {
        self.client_for(service, None, None).await
    }

    /// Client for `service` in `region`/`project`, built once per invocation
    pub async fn client_for(
        &self,
        service: Service,
        region: Option<&str>,
        project: Option<&str>,
    ) -> Result<ServiceClient> {
        self.check_cancelled()?;

        let region = region.unwrap_or_else(|| self.factory.default_region()).to_string();
        let key = (service, region, project.map(str::to_string));

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self
            .factory
            .client_for(service, Some(&key.1), project, self.cancel.clone())
            .await?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Retry spec bounded by the phase deadline
    pub fn retry(&self) -> RetrySpec {
        RetrySpec {
            timeout: self.remaining(),
            poll_interval: self.poll_interval,
            classifier: self.classifier,
        }
    }

    /// Wait spec bounded by the phase deadline
    pub fn state_wait(&self, what: impl Into<String>, pending: &[&str], target: &[&str]) -> StateWait {
        StateWait::new(what, pending, target, self.remaining()).with_poll_interval(self.poll_interval)
    }
}
