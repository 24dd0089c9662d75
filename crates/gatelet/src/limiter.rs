//! Per-client admission control backed by the shared counter store.
//!
//! Every process serving a client shares two records: a string holding the
//! centrally overridable concurrency limit, and a hash of in-flight request
//! ids keyed to their issue timestamps. Admission is a count check followed
//! by a ticket registration; release deletes the ticket. A periodic flush
//! reconciles the locally cached limit with the store and reaps tickets
//! whose release was lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LimiterSettings;
use crate::store::{CounterStore, StoreError};

/// Request id handed out by a disabled limiter. Never registered, never
/// released.
pub const UNLIMITED_REQUEST_ID: &str = "unlimited_request_id";

/// One registered admission, as stored in the per-client hash.
///
/// The wire format for the hash field value is the issue time as epoch
/// seconds in decimal, fractional part included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionTicket {
    pub request_id: String,
    pub issued_at: DateTime<Utc>,
}

impl AdmissionTicket {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            issued_at: Utc::now(),
        }
    }

    /// Parse a hash field back into a ticket. None means the stored
    /// timestamp is unreadable.
    pub fn parse(request_id: &str, raw: &str) -> Option<Self> {
        let seconds = raw.trim().parse::<f64>().ok()?;
        let issued_at = DateTime::from_timestamp_micros((seconds * 1e6) as i64)?;
        Some(Self {
            request_id: request_id.to_string(),
            issued_at,
        })
    }

    pub fn timestamp_string(&self) -> String {
        format!("{:.6}", self.issued_at.timestamp_micros() as f64 / 1e6)
    }

    /// True once the ticket has outlived the max-alive window and its
    /// holder is presumed to have leaked it.
    pub fn presumed_leaked(&self, now: DateTime<Utc>, max_alive: Duration) -> bool {
        match (now - self.issued_at).to_std() {
            Ok(age) => age > max_alive,
            // Issued in the future; clock skew between processes.
            Err(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error(
        "Too many requests. Please try again later. The current maximum concurrent requests allowed for {client_id} is {max_active_requests}."
    )]
    QuotaExceeded {
        client_id: String,
        max_active_requests: u64,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LimitError {
    /// Serialized error body for the hosting layer. Routing the status code
    /// is the host's concern; this only builds the payload.
    pub fn to_response(&self) -> serde_json::Value {
        match self {
            LimitError::QuotaExceeded { .. } => serde_json::json!({
                "code": "quota_exceeded",
                "message": self.to_string(),
                "status": 429,
            }),
            LimitError::Store(e) => serde_json::json!({
                "code": "store_unavailable",
                "message": e.to_string(),
                "status": 503,
            }),
        }
    }
}

/// Admission controller for one client id.
///
/// The count check and the ticket registration are separate store
/// round-trips with no transaction between them, so a burst of concurrent
/// admissions may briefly overshoot the limit. A limiter whose limit is
/// zero is disabled and never contacts the store.
pub struct RateLimit {
    client_id: String,
    max_active_requests: AtomicU64,
    max_active_requests_key: String,
    active_requests_key: String,
    last_flush: Mutex<Option<Instant>>,
    settings: LimiterSettings,
    store: Arc<dyn CounterStore>,
}

impl RateLimit {
    pub fn new(
        client_id: impl Into<String>,
        max_active_requests: u64,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self::with_settings(client_id, max_active_requests, store, LimiterSettings::default())
    }

    pub fn with_settings(
        client_id: impl Into<String>,
        max_active_requests: u64,
        store: Arc<dyn CounterStore>,
        settings: LimiterSettings,
    ) -> Self {
        let client_id = client_id.into();
        Self {
            max_active_requests: AtomicU64::new(max_active_requests),
            max_active_requests_key: format!("rate_limit:{client_id}:max_active_requests"),
            active_requests_key: format!("rate_limit:{client_id}:active_requests"),
            client_id,
            last_flush: Mutex::new(None),
            settings,
            store,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Locally cached limit. A flush may replace it with a central override.
    pub fn max_active_requests(&self) -> u64 {
        self.max_active_requests.load(Ordering::Acquire)
    }

    /// A zero limit disables admission control for this client.
    pub fn disabled(&self) -> bool {
        self.max_active_requests() == 0
    }

    pub(crate) fn set_max_active_requests(&self, max: u64) {
        self.max_active_requests.store(max, Ordering::Release);
    }

    pub(crate) fn clear_flush_clock(&self) {
        let mut last = self.last_flush.lock().unwrap_or_else(PoisonError::into_inner);
        *last = None;
    }

    fn mark_flushed(&self) {
        let mut last = self.last_flush.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(Instant::now());
    }

    fn flush_due(&self) -> bool {
        let last = self.last_flush.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) => at.elapsed() > self.settings.flush_interval,
            None => true,
        }
    }

    /// Admit one request for this client.
    ///
    /// Returns the request id whose ticket must be released through
    /// [`exit`](Self::exit). Generates a fresh id when the caller supplies
    /// none. A disabled limiter returns the unlimited sentinel without
    /// touching the store.
    pub async fn enter(&self, request_id: Option<&str>) -> Result<String, LimitError> {
        if self.disabled() {
            return Ok(UNLIMITED_REQUEST_ID.to_string());
        }
        if self.flush_due() {
            self.flush_cache(false).await?;
        }
        let request_id = match request_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let max = self.max_active_requests();
        let active = self.store.hash_len(&self.active_requests_key).await?;
        if active >= max {
            tracing::debug!(
                client_id = %self.client_id,
                active,
                max_active_requests = max,
                "Admission rejected"
            );
            return Err(LimitError::QuotaExceeded {
                client_id: self.client_id.clone(),
                max_active_requests: max,
            });
        }

        let ticket = AdmissionTicket::new(request_id);
        self.store
            .hash_set(
                &self.active_requests_key,
                &ticket.request_id,
                &ticket.timestamp_string(),
            )
            .await?;
        tracing::debug!(
            client_id = %self.client_id,
            request_id = %ticket.request_id,
            "Admitted request"
        );
        Ok(ticket.request_id)
    }

    /// Release one admitted request. The unlimited sentinel releases
    /// nothing.
    pub async fn exit(&self, request_id: &str) -> Result<(), LimitError> {
        if request_id == UNLIMITED_REQUEST_ID {
            return Ok(());
        }
        self.store
            .hash_delete(&self.active_requests_key, &[request_id.to_string()])
            .await?;
        tracing::debug!(
            client_id = %self.client_id,
            request_id = %request_id,
            "Released admission ticket"
        );
        Ok(())
    }

    /// Recalculate this limiter against the store.
    ///
    /// Publishes or adopts the per-client limit record, refreshes the expiry
    /// of both records, and reaps tickets older than the max-alive window.
    /// With `use_local_value` the local limit overwrites the central record;
    /// registration does this once so a fresh process publishes its
    /// configured limit.
    pub async fn flush_cache(&self, use_local_value: bool) -> Result<(), LimitError> {
        if self.disabled() {
            return Ok(());
        }
        // The clock advances before the store is touched, so a failing
        // store rate-limits flush attempts instead of being hammered.
        self.mark_flushed();
        let ttl = self.settings.record_ttl;

        if use_local_value || !self.store.exists(&self.max_active_requests_key).await? {
            let max = self.max_active_requests();
            self.store
                .set_with_expiry(&self.max_active_requests_key, &max.to_string(), ttl)
                .await?;
        } else {
            match self.store.get(&self.max_active_requests_key).await? {
                Some(raw) => {
                    let adopted =
                        raw.trim()
                            .parse::<u64>()
                            .map_err(|_| StoreError::UnexpectedValue {
                                key: self.max_active_requests_key.clone(),
                                reason: format!("expected an integer limit, got {raw:?}"),
                            })?;
                    let previous = self.max_active_requests.swap(adopted, Ordering::AcqRel);
                    if previous != adopted {
                        tracing::info!(
                            client_id = %self.client_id,
                            previous,
                            adopted,
                            "Adopted centrally overridden limit"
                        );
                    }
                    self.store
                        .refresh_expiry(&self.max_active_requests_key, ttl)
                        .await?;
                }
                None => {
                    // The record vanished after the existence check; publish
                    // the local value as if it never existed.
                    let max = self.max_active_requests();
                    self.store
                        .set_with_expiry(&self.max_active_requests_key, &max.to_string(), ttl)
                        .await?;
                }
            }
        }

        if !self.store.exists(&self.active_requests_key).await? {
            return Ok(());
        }
        let tickets = self.store.hash_get_all(&self.active_requests_key).await?;
        self.store
            .refresh_expiry(&self.active_requests_key, ttl)
            .await?;

        let now = Utc::now();
        let mut leaked = Vec::new();
        for (request_id, raw) in &tickets {
            match AdmissionTicket::parse(request_id, raw) {
                Some(ticket) if !ticket.presumed_leaked(now, self.settings.ticket_max_alive) => {}
                Some(_) => leaked.push(request_id.clone()),
                None => {
                    tracing::warn!(
                        client_id = %self.client_id,
                        request_id = %request_id,
                        value = %raw,
                        "Reaping ticket with unreadable timestamp"
                    );
                    leaked.push(request_id.clone());
                }
            }
        }
        if !leaked.is_empty() {
            let removed = self
                .store
                .hash_delete(&self.active_requests_key, &leaked)
                .await?;
            tracing::info!(
                client_id = %self.client_id,
                removed,
                "Reaped leaked admission tickets"
            );
        }
        Ok(())
    }
}
