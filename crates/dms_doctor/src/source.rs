//! Telemetry source abstraction
//!
//! The engine does no network I/O against the migration service itself.
//! Callers inject data sources (CloudWatch metric queries, paginated task
//! log fetches, `DescribeReplicationTasks`, endpoint settings) behind this
//! trait. Each fetch is bounded by a timeout; a timeout or failure becomes
//! an `unavailable` payload so the session degrades instead of failing.
//!
//! `FakeTelemetrySource` returns pre-configured payloads for tests.

use crate::collector::{RawPayload, SignalKind};
use crate::session::DiagnosticRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of one data-source fetch. Never escapes the collector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("request throttled")]
    Throttled,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// An injected provider of raw telemetry for one signal kind
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Name used as payload origin (e.g. "cloudwatch")
    fn name(&self) -> &str;

    /// Signal kind this source provides
    fn signal(&self) -> SignalKind;

    /// Fetch payloads for the request's task and window
    async fn fetch(&self, request: &DiagnosticRequest) -> Result<Vec<RawPayload>, FetchError>;
}

/// Fetch all sources concurrently, each bounded by `timeout`.
///
/// Output is ordered by source position, independent of completion order.
pub async fn gather(
    sources: &[Arc<dyn TelemetrySource>],
    request: &DiagnosticRequest,
    timeout: Duration,
) -> Vec<RawPayload> {
    let handles: Vec<_> = sources
        .iter()
        .map(|source| {
            let source = Arc::clone(source);
            let request = request.clone();
            tokio::spawn(async move { fetch_one(source.as_ref(), &request, timeout).await })
        })
        .collect();

    let mut payloads = Vec::new();
    for (source, handle) in sources.iter().zip(handles) {
        match handle.await {
            Ok(mut fetched) => payloads.append(&mut fetched),
            Err(err) => {
                warn!(source = source.name(), error = %err, "source task aborted");
                payloads.push(RawPayload::unavailable(
                    source.name(),
                    unavailable_at(request),
                    source.signal(),
                    format!("fetch task aborted: {}", err),
                ));
            }
        }
    }
    payloads
}

async fn fetch_one(source: &dyn TelemetrySource, request: &DiagnosticRequest, timeout: Duration) -> Vec<RawPayload> {
    let name = source.name().to_string();
    let signal = source.signal();
    match tokio::time::timeout(timeout, source.fetch(request)).await {
        Ok(Ok(payloads)) => {
            debug!(source = %name, payloads = payloads.len(), "source fetched");
            payloads
        }
        Ok(Err(err)) => {
            warn!(source = %name, error = %err, "source fetch failed");
            vec![RawPayload::unavailable(name, unavailable_at(request), signal, err.to_string())]
        }
        Err(_) => {
            warn!(source = %name, timeout_ms = timeout.as_millis() as u64, "source fetch timed out");
            vec![RawPayload::unavailable(
                name,
                unavailable_at(request),
                signal,
                format!("timed out after {}ms", timeout.as_millis()),
            )]
        }
    }
}

fn unavailable_at(request: &DiagnosticRequest) -> DateTime<Utc> {
    request.window.map(|w| w.end).unwrap_or_else(Utc::now)
}

// ============================================================================
// Fake source (testing)
// ============================================================================

#[derive(Debug, Clone)]
enum FakeBehavior {
    Payloads(Vec<RawPayload>),
    Fail(FetchError),
    Delay(Duration, Vec<RawPayload>),
}

/// Source with canned behavior and a call counter
#[derive(Debug, Clone)]
pub struct FakeTelemetrySource {
    name: String,
    signal: SignalKind,
    behavior: FakeBehavior,
    calls: Arc<AtomicUsize>,
}

impl FakeTelemetrySource {
    /// Returns the given payloads immediately
    pub fn ok(name: &str, signal: SignalKind, payloads: Vec<RawPayload>) -> Self {
        Self::with_behavior(name, signal, FakeBehavior::Payloads(payloads))
    }

    /// Always fails with `error`
    pub fn failing(name: &str, signal: SignalKind, error: FetchError) -> Self {
        Self::with_behavior(name, signal, FakeBehavior::Fail(error))
    }

    /// Sleeps for `delay` before returning the payloads
    pub fn slow(name: &str, signal: SignalKind, delay: Duration, payloads: Vec<RawPayload>) -> Self {
        Self::with_behavior(name, signal, FakeBehavior::Delay(delay, payloads))
    }

    fn with_behavior(name: &str, signal: SignalKind, behavior: FakeBehavior) -> Self {
        Self {
            name: name.to_string(),
            signal,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_shared(self) -> Arc<dyn TelemetrySource> {
        Arc::new(self)
    }
}

#[async_trait]
impl TelemetrySource for FakeTelemetrySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn signal(&self) -> SignalKind {
        self.signal
    }

    async fn fetch(&self, _request: &DiagnosticRequest) -> Result<Vec<RawPayload>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            FakeBehavior::Payloads(payloads) => Ok(payloads.clone()),
            FakeBehavior::Fail(err) => Err(err.clone()),
            FakeBehavior::Delay(delay, payloads) => {
                tokio::time::sleep(*delay).await;
                Ok(payloads.clone())
            }
        }
    }
}
