//! Request/response surface consumed by the event router
//!
//! [`ParkingService`] abstracts where sessions and wallets live. The
//! in-process implementation runs the blocking redb work on the blocking
//! pool and bounds every call with the request timeout; an elapsed timeout
//! is reported as [`ParkingError::Timeout`] and a crashed task as
//! [`ParkingError::TransportFailure`].
//! The operation may still complete in the background after a timeout, so
//! callers treat that outcome as unknown and fail safe.

use super::error::{ParkingError, ParkingResult};
use super::sessions::SessionManager;
use super::slots::{AvailabilitySummary, SlotTransition};
use async_trait::async_trait;
use shared::message::OccupancyPayload;
use shared::models::SystemLog;
use shared::request::{EntryRequest, ExitRequest};
use shared::response::{EntryResponse, ExitReceipt, SystemStatus};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ParkingService: Send + Sync {
    async fn record_entry(&self, req: EntryRequest) -> ParkingResult<EntryResponse>;

    async fn record_exit(&self, req: ExitRequest) -> ParkingResult<ExitReceipt>;

    async fn apply_occupancy(&self, report: OccupancyPayload) -> ParkingResult<SlotTransition>;

    /// Current availability (in-memory, never blocks)
    fn availability(&self) -> AvailabilitySummary;

    /// Best-effort audit record
    async fn log_event(&self, log: SystemLog);
}

/// In-process service backed by a [`SessionManager`]
#[derive(Debug, Clone)]
pub struct LocalParkingService {
    manager: Arc<SessionManager>,
    timeout: Duration,
}

impl LocalParkingService {
    pub fn new(manager: Arc<SessionManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn system_status(&self, gate_status: Option<String>) -> ParkingResult<SystemStatus> {
        self.run_blocking("system_status", move |m| m.system_status(gate_status))
            .await
    }

    async fn run_blocking<T, F>(&self, op: &'static str, f: F) -> ParkingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SessionManager) -> ParkingResult<T> + Send + 'static,
    {
        let manager = self.manager.clone();
        let handle = tokio::task::spawn_blocking(move || f(&manager));

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                tracing::error!(op, error = %join_err, "Parking task failed");
                Err(ParkingError::TransportFailure(format!(
                    "{} task failed: {}",
                    op, join_err
                )))
            }
            Err(_) => {
                tracing::error!(op, timeout_ms = self.timeout.as_millis() as u64, "Parking call timed out");
                Err(ParkingError::Timeout {
                    op,
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl ParkingService for LocalParkingService {
    async fn record_entry(&self, req: EntryRequest) -> ParkingResult<EntryResponse> {
        self.run_blocking("record_entry", move |m| m.record_entry(&req))
            .await
    }

    async fn record_exit(&self, req: ExitRequest) -> ParkingResult<ExitReceipt> {
        self.run_blocking("record_exit", move |m| m.record_exit(&req))
            .await
    }

    /// Transitions are stamped with the node clock, like claims and releases,
    /// so a slot's history never goes backwards. The sensor time is only logged.
    async fn apply_occupancy(&self, report: OccupancyPayload) -> ParkingResult<SlotTransition> {
        self.run_blocking("apply_occupancy", move |m| {
            let at = m.now_millis();
            tracing::debug!(
                slot_id = %report.slot_id,
                sensor_timestamp = report.timestamp,
                at,
                "Applying occupancy report"
            );
            Ok(m.slots().apply_occupancy(
                &report.slot_id,
                &report.camera_id,
                report.occupied,
                at,
            )?)
        })
        .await
    }

    fn availability(&self) -> AvailabilitySummary {
        self.manager.availability()
    }

    async fn log_event(&self, log: SystemLog) {
        let result = self
            .run_blocking("log_event", move |m| {
                m.audit().record(log);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Audit record dropped");
        }
    }
}
