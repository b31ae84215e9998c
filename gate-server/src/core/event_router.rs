//! Event router
//!
//! Consumes client events from the bus, drives the parking service and
//! emits the gate commands.
//!
//! ```text
//! occupancy/{cam}/slot/{slot} ──▶ apply_occupancy ──▶ slotChange/{slot} (changed only)
//!                                                └──▶ availabilitySummary (always)
//! tagscan ──▶ dedup ──▶ entry | exit ──▶ gateCommand (exactly one per scan)
//! gateStatus ──▶ remembered, never used for decisions
//! ```
//!
//! Every failure path ends in [`deny_reason`]. Nothing but an `Ok` from the
//! service produces an `open` command.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use shared::message::{
    BusMessage, GateCommandPayload, GateStatusPayload, OccupancyPayload, ScanLocation,
    SlotChangePayload, TagScanPayload, Topic,
};
use shared::error::ErrorCode;
use shared::models::SystemLog;
use shared::request::{EntryRequest, ExitRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::{BusError, MessageBus};
use crate::parking::money::format_amount;
use crate::parking::{ParkingError, ParkingService};
use crate::utils::Clock;

const COMPONENT: &str = "router";

pub const REASON_NO_SLOTS: &str = "No parking slots available";
pub const REASON_SYSTEM_ERROR: &str = "System error";
pub const REASON_UNKNOWN_LOCATION: &str = "Unknown scan location";

/// Which lane a scan was classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Entry,
    Exit,
}

/// Reason text for a failed request
///
/// Entry surfaces every domain failure, exit only surfaces insufficient
/// funds. Anything else is reported as a system error.
fn deny_reason(err: &ParkingError, lane: Lane) -> String {
    let surface = match lane {
        Lane::Entry => err.is_domain(),
        Lane::Exit => matches!(err, ParkingError::InsufficientBalance { .. }),
    };
    if surface {
        err.to_string()
    } else {
        REASON_SYSTEM_ERROR.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScanKey {
    tag_id: String,
    location: String,
    timestamp: i64,
}

impl ScanKey {
    fn of(scan: &TagScanPayload) -> Self {
        Self {
            tag_id: scan.tag_id.clone(),
            location: scan.location.as_str().to_string(),
            timestamp: scan.timestamp,
        }
    }
}

/// Bounded memory of decided scans (FIFO eviction)
#[derive(Debug)]
struct ScanDedup {
    capacity: usize,
    order: VecDeque<ScanKey>,
    decided: HashMap<ScanKey, GateCommandPayload>,
}

impl ScanDedup {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            decided: HashMap::new(),
        }
    }

    fn get(&self, key: &ScanKey) -> Option<GateCommandPayload> {
        self.decided.get(key).cloned()
    }

    fn insert(&mut self, key: ScanKey, command: GateCommandPayload) {
        if self.capacity == 0 {
            return;
        }
        if self.decided.insert(key.clone(), command).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.decided.remove(&oldest);
            }
        }
    }
}

pub struct EventRouter {
    service: Arc<dyn ParkingService>,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
    gate_camera_id: String,
    dedup: Mutex<ScanDedup>,
    gate_status: RwLock<Option<String>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("gate_camera_id", &self.gate_camera_id)
            .field("gate_status", &*self.gate_status.read())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    pub fn new(
        service: Arc<dyn ParkingService>,
        bus: MessageBus,
        clock: Arc<dyn Clock>,
        gate_camera_id: impl Into<String>,
        dedup_window: usize,
    ) -> Self {
        Self {
            service,
            bus,
            clock,
            gate_camera_id: gate_camera_id.into(),
            dedup: Mutex::new(ScanDedup::new(dedup_window)),
            gate_status: RwLock::new(None),
        }
    }

    /// Last status reported by the gate controller
    pub fn gate_status(&self) -> Option<String> {
        self.gate_status.read().clone()
    }

    /// Process client events until shutdown or inbox close
    ///
    /// Events are handled one at a time in arrival order. The inbox never
    /// drops events, so every tag scan that reaches it gets a gate command.
    pub async fn run(&self, mut inbox: mpsc::Receiver<BusMessage>, shutdown: CancellationToken) {
        tracing::info!("Event router started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Event router shutting down");
                    break;
                }

                msg = inbox.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!("Server inbox closed");
                        break;
                    };
                    if let Err(e) = self.dispatch(&msg).await {
                        tracing::error!(topic = %msg.topic, error = %e, "Failed to route message");
                    }
                }
            }
        }

        tracing::info!("Event router stopped");
    }

    pub async fn dispatch(&self, msg: &BusMessage) -> Result<(), BusError> {
        match msg.kind() {
            Topic::Occupancy { camera_id, slot_id } => {
                self.on_occupancy(msg, camera_id, slot_id).await
            }
            Topic::TagScan => self.on_tag_scan(msg).await,
            Topic::GateStatus => {
                self.on_gate_status(msg);
                Ok(())
            }
            _ => {
                tracing::debug!(topic = %msg.topic, "Ignoring message");
                Ok(())
            }
        }
    }

    /// Publish the current availability (also used by the periodic refresh)
    pub fn publish_availability(&self) -> Result<(), BusError> {
        let summary = self.service.availability();
        let msg = BusMessage::availability(&summary.to_payload(self.clock.now_millis()))?;
        publish_optional(&self.bus, msg)
    }

    // ========== occupancy ==========

    async fn on_occupancy(
        &self,
        msg: &BusMessage,
        camera_id: String,
        slot_id: String,
    ) -> Result<(), BusError> {
        let mut report: OccupancyPayload = match msg.parse_payload() {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(topic = %msg.topic, error = %e, "Malformed occupancy report dropped");
                return Ok(());
            }
        };

        if report.slot_id != slot_id || report.camera_id != camera_id {
            tracing::warn!(
                topic = %msg.topic,
                payload_slot = %report.slot_id,
                payload_camera = %report.camera_id,
                "Occupancy payload disagrees with topic, using topic ids"
            );
            report.slot_id = slot_id;
            report.camera_id = camera_id;
        }

        match self.service.apply_occupancy(report).await {
            Ok(transition) if transition.changed => {
                let slot = &transition.slot;
                tracing::info!(
                    slot_id = %slot.slot_id,
                    camera_id = %slot.camera_id,
                    occupied = slot.is_occupied,
                    free = transition.summary.free_slots,
                    "Slot occupancy changed"
                );
                let change = BusMessage::slot_change(&SlotChangePayload {
                    slot_id: slot.slot_id.clone(),
                    camera_id: slot.camera_id.clone(),
                    occupied: slot.is_occupied,
                    session_id: None,
                    timestamp: slot.last_transition,
                })?;
                publish_optional(&self.bus, change)?;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(topic = %msg.topic, error = %e, "Failed to apply occupancy report");
            }
        }

        self.publish_availability()
    }

    // ========== tag scans ==========

    async fn on_tag_scan(&self, msg: &BusMessage) -> Result<(), BusError> {
        let scan: TagScanPayload = match msg.parse_payload() {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(error = %e, source = ?msg.source, "Malformed tag scan, denying");
                let now = self.clock.now_millis();
                return self.emit(GateCommandPayload::deny(REASON_SYSTEM_ERROR, now));
            }
        };

        let key = ScanKey::of(&scan);
        if let Some(previous) = self.dedup.lock().get(&key) {
            tracing::info!(
                tag_id = %scan.tag_id,
                location = %scan.location,
                "Duplicate scan, re-emitting previous command"
            );
            return self.emit(previous);
        }

        tracing::info!(tag_id = %scan.tag_id, location = %scan.location, "Tag scanned");
        let command = match scan.location {
            ScanLocation::Entry | ScanLocation::Gate => self.decide_entry(&scan.tag_id).await,
            ScanLocation::Exit => self.decide_exit(&scan.tag_id).await,
            ScanLocation::Other(ref location) => {
                tracing::warn!(tag_id = %scan.tag_id, location = %location, "Unknown scan location");
                self.service
                    .log_event(
                        SystemLog::warning(COMPONENT, "scan_rejected", REASON_UNKNOWN_LOCATION)
                            .tag(&scan.tag_id)
                            .details(json!({ "location": location })),
                    )
                    .await;
                GateCommandPayload::deny(REASON_UNKNOWN_LOCATION, self.clock.now_millis())
            }
        };

        self.dedup.lock().insert(key, command.clone());
        self.emit(command)
    }

    async fn decide_entry(&self, tag_id: &str) -> GateCommandPayload {
        // Never start a session that cannot be parked
        if !self.service.availability().any_available {
            tracing::warn!(tag_id = %tag_id, "Entry denied: no slots available");
            self.service
                .log_event(
                    SystemLog::warning(COMPONENT, "entry_denied", REASON_NO_SLOTS)
                        .tag(tag_id)
                        .details(json!({ "code": ErrorCode::NoSlotsAvailable })),
                )
                .await;
            return GateCommandPayload::deny(REASON_NO_SLOTS, self.clock.now_millis());
        }

        let result = self
            .service
            .record_entry(EntryRequest {
                tag_id: tag_id.to_string(),
                camera_id: self.gate_camera_id.clone(),
                slot_id: None,
            })
            .await;
        let now = self.clock.now_millis();

        match result {
            Ok(resp) => {
                tracing::info!(tag_id = %tag_id, session_id = %resp.session_id, "Entry recorded");
                GateCommandPayload::open(format!("Entry granted for {}", tag_id), now)
            }
            Err(e) => self.deny(e, Lane::Entry, tag_id, now).await,
        }
    }

    async fn decide_exit(&self, tag_id: &str) -> GateCommandPayload {
        let result = self
            .service
            .record_exit(ExitRequest {
                tag_id: tag_id.to_string(),
                camera_id: self.gate_camera_id.clone(),
            })
            .await;
        let now = self.clock.now_millis();

        match result {
            Ok(receipt) => {
                tracing::info!(
                    tag_id = %tag_id,
                    session_id = %receipt.session_id,
                    transaction_id = %receipt.transaction_id,
                    amount = %receipt.amount_charged,
                    "Exit processed"
                );
                GateCommandPayload::open(
                    format!("Exit granted. Charged: {}", format_amount(receipt.amount_charged)),
                    now,
                )
            }
            Err(e) => self.deny(e, Lane::Exit, tag_id, now).await,
        }
    }

    async fn deny(&self, err: ParkingError, lane: Lane, tag_id: &str, now: i64) -> GateCommandPayload {
        let reason = deny_reason(&err, lane);
        let event_type = match lane {
            Lane::Entry => "entry_failed",
            Lane::Exit => "exit_failed",
        };

        if err.is_transport() {
            // The manager may never have seen the request, so audit here
            tracing::error!(tag_id = %tag_id, lane = ?lane, error = %err, "Request failed, denying");
            self.service
                .log_event(
                    SystemLog::error(COMPONENT, event_type, err.to_string())
                        .tag(tag_id)
                        .details(json!({ "code": err.code() })),
                )
                .await;
        } else {
            tracing::warn!(tag_id = %tag_id, lane = ?lane, error = %err, reason = %reason, "Request denied");
        }

        GateCommandPayload::deny(reason, now)
    }

    // ========== gate ==========

    fn on_gate_status(&self, msg: &BusMessage) {
        match msg.parse_payload::<GateStatusPayload>() {
            Ok(status) => {
                tracing::info!(gate_status = %status.gate_status, "Gate status reported");
                *self.gate_status.write() = Some(status.gate_status);
            }
            Err(e) => tracing::warn!(error = %e, "Malformed gate status dropped"),
        }
    }

    fn emit(&self, command: GateCommandPayload) -> Result<(), BusError> {
        let msg = BusMessage::gate_command(&command)?;
        match self.bus.publish(msg) {
            Ok(_) => {
                tracing::info!(action = %command.action, reason = %command.reason, "Gate command sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    action = %command.action,
                    reason = %command.reason,
                    error = %e,
                    "Gate actuator unreachable"
                );
                Err(e)
            }
        }
    }
}

/// Informational topics may have no listener
fn publish_optional(bus: &MessageBus, msg: BusMessage) -> Result<(), BusError> {
    match bus.publish(msg) {
        Ok(_) | Err(BusError::NoSubscribers(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parking::slots::{AvailabilitySummary, SlotAggregate, SlotTransition};
    use crate::parking::storage::ParkingStorage;
    use crate::parking::ParkingResult;
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use shared::message::{GateAction, topics};
    use shared::response::{EntryResponse, ExitReceipt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    type EntryFn = Box<dyn Fn(&EntryRequest) -> ParkingResult<EntryResponse> + Send + Sync>;
    type ExitFn = Box<dyn Fn(&ExitRequest) -> ParkingResult<ExitReceipt> + Send + Sync>;

    struct MockService {
        slots: SlotAggregate,
        entry: EntryFn,
        exit: ExitFn,
        entry_calls: AtomicUsize,
        exit_calls: AtomicUsize,
        logs: Mutex<Vec<SystemLog>>,
    }

    impl MockService {
        fn new() -> Self {
            Self {
                slots: SlotAggregate::new(ParkingStorage::open_in_memory().unwrap()),
                entry: Box::new(|req| {
                    Ok(EntryResponse {
                        session_id: "SESS_1".into(),
                        balance: Decimal::from(100),
                        entry_time: 0,
                        slot_id: req.slot_id.clone(),
                    })
                }),
                exit: Box::new(|_| {
                    Ok(ExitReceipt {
                        session_id: "SESS_1".into(),
                        entry_time: 0,
                        exit_time: 7_200_000,
                        duration_minutes: 120,
                        duration_display: "2h 0m".into(),
                        amount_charged: Decimal::from(20),
                        balance_before: Decimal::from(100),
                        balance_after: Decimal::from(80),
                        tariff_rate: Decimal::from(10),
                        transaction_id: "TXN_1".into(),
                    })
                }),
                entry_calls: AtomicUsize::new(0),
                exit_calls: AtomicUsize::new(0),
                logs: Mutex::new(Vec::new()),
            }
        }

        fn with_free_slot(self) -> Self {
            self.slots.apply_occupancy("A1", "CAM_01", false, 1).unwrap();
            self
        }
    }

    #[async_trait]
    impl ParkingService for MockService {
        async fn record_entry(&self, req: EntryRequest) -> ParkingResult<EntryResponse> {
            self.entry_calls.fetch_add(1, Ordering::SeqCst);
            (self.entry)(&req)
        }

        async fn record_exit(&self, req: ExitRequest) -> ParkingResult<ExitReceipt> {
            self.exit_calls.fetch_add(1, Ordering::SeqCst);
            (self.exit)(&req)
        }

        async fn apply_occupancy(&self, report: OccupancyPayload) -> ParkingResult<SlotTransition> {
            Ok(self.slots.apply_occupancy(
                &report.slot_id,
                &report.camera_id,
                report.occupied,
                report.timestamp,
            )?)
        }

        fn availability(&self) -> AvailabilitySummary {
            self.slots.summary()
        }

        async fn log_event(&self, log: SystemLog) {
            self.logs.lock().push(log);
        }
    }

    fn router(service: Arc<MockService>, bus: &MessageBus) -> EventRouter {
        EventRouter::new(
            service,
            bus.clone(),
            Arc::new(ManualClock::new(1_736_931_600_000)),
            "GATE_CAM",
            16,
        )
    }

    fn scan(tag: &str, location: &str, ts: i64) -> BusMessage {
        let raw = format!(r#"{{"tagId":"{}","location":"{}","timestamp":{}}}"#, tag, location, ts);
        BusMessage::new(topics::TAG_SCAN, raw.into_bytes())
    }

    async fn next_command(rx: &mut broadcast::Receiver<BusMessage>) -> GateCommandPayload {
        loop {
            let msg = rx.recv().await.unwrap();
            if msg.topic == topics::GATE_COMMAND {
                return msg.parse_payload().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_entry_granted() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let router = router(Arc::new(MockService::new().with_free_slot()), &bus);

        router.dispatch(&scan("T1", "entry", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Open);
        assert_eq!(cmd.reason, "Entry granted for T1");
    }

    #[tokio::test]
    async fn test_gate_location_is_entry() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let service = Arc::new(MockService::new().with_free_slot());
        let router = router(service.clone(), &bus);

        router.dispatch(&scan("T1", "gate", 1)).await.unwrap();
        assert!(next_command(&mut rx).await.is_open());
        assert_eq!(service.entry_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_slots_short_circuits() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let service = Arc::new(MockService::new());
        let router = router(service.clone(), &bus);

        router.dispatch(&scan("T1", "entry", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, REASON_NO_SLOTS);
        assert_eq!(service.entry_calls.load(Ordering::SeqCst), 0);
        let logs = service.logs.lock();
        assert_eq!(logs[0].event_type, "entry_denied");
        assert_eq!(logs[0].details.as_ref().unwrap()["code"], 3002);
    }

    #[tokio::test]
    async fn test_entry_domain_failure_surfaces_reason() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let mut service = MockService::new().with_free_slot();
        service.entry = Box::new(|req| {
            Err(ParkingError::DuplicateSession {
                tag_id: req.tag_id.clone(),
                session_id: "SESS_0".into(),
            })
        });
        let router = router(Arc::new(service), &bus);

        router.dispatch(&scan("T1", "entry", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, "User already has an active parking session");
    }

    #[tokio::test]
    async fn test_entry_transport_failure_is_system_error() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let mut service = MockService::new().with_free_slot();
        service.entry = Box::new(|_| Err(ParkingError::TransportFailure("timed out".into())));
        let service = Arc::new(service);
        let router = router(service.clone(), &bus);

        router.dispatch(&scan("T1", "entry", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, REASON_SYSTEM_ERROR);

        let logs = service.logs.lock();
        assert_eq!(logs[0].event_type, "entry_failed");
        assert_eq!(logs[0].tag_id.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_exit_reasons() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let router = router(Arc::new(MockService::new()), &bus);

        router.dispatch(&scan("T1", "exit", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert!(cmd.is_open());
        assert_eq!(cmd.reason, "Exit granted. Charged: ₹20.00");

        let mut service = MockService::new();
        service.exit = Box::new(|_| {
            Err(ParkingError::InsufficientBalance {
                required: Decimal::from(20),
                available: Decimal::from(5),
            })
        });
        let router = super::EventRouter::new(
            Arc::new(service),
            bus.clone(),
            Arc::new(ManualClock::new(0)),
            "GATE_CAM",
            16,
        );
        router.dispatch(&scan("T1", "exit", 2)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(
            cmd.reason,
            "Insufficient balance. Required: ₹20.00, Available: ₹5.00"
        );
    }

    #[tokio::test]
    async fn test_exit_other_failures_are_system_error() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let mut service = MockService::new();
        service.exit = Box::new(|req| Err(ParkingError::NoActiveSession(req.tag_id.clone())));
        let router = router(Arc::new(service), &bus);

        router.dispatch(&scan("T1", "exit", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, REASON_SYSTEM_ERROR);
    }

    #[tokio::test]
    async fn test_duplicate_scan_replays_command() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let service = Arc::new(MockService::new());
        let router = router(service.clone(), &bus);

        router.dispatch(&scan("T1", "exit", 42)).await.unwrap();
        router.dispatch(&scan("T1", "exit", 42)).await.unwrap();

        let first = next_command(&mut rx).await;
        let second = next_command(&mut rx).await;
        assert_eq!(first, second);
        assert_eq!(service.exit_calls.load(Ordering::SeqCst), 1);

        // A new reader timestamp is a new scan
        router.dispatch(&scan("T1", "exit", 43)).await.unwrap();
        next_command(&mut rx).await;
        assert_eq!(service.exit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_location_denied() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let service = Arc::new(MockService::new().with_free_slot());
        let router = router(service.clone(), &bus);

        router.dispatch(&scan("T1", "loading-dock", 1)).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, REASON_UNKNOWN_LOCATION);
        assert_eq!(service.entry_calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.exit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_scan_denied() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let router = router(Arc::new(MockService::new().with_free_slot()), &bus);

        let msg = BusMessage::new(topics::TAG_SCAN, b"not json".to_vec());
        router.dispatch(&msg).await.unwrap();
        let cmd = next_command(&mut rx).await;
        assert_eq!(cmd.action, GateAction::Deny);
        assert_eq!(cmd.reason, REASON_SYSTEM_ERROR);
    }

    #[tokio::test]
    async fn test_occupancy_publishes_change_and_summary() {
        let bus = MessageBus::new();
        let mut changes = bus.subscribe_filtered(topics::SLOT_CHANGE_FILTER);
        let mut summaries = bus.subscribe_filtered(topics::AVAILABILITY_SUMMARY);
        let router = router(Arc::new(MockService::new()), &bus);

        let report = OccupancyPayload {
            slot_id: "A1".into(),
            camera_id: "CAM_01".into(),
            occupied: true,
            confidence: None,
            timestamp: 10,
        };
        let msg = BusMessage::occupancy(&report).unwrap();
        router.dispatch(&msg).await.unwrap();
        router.dispatch(&msg).await.unwrap();

        let change: SlotChangePayload = changes.recv().await.unwrap().parse_payload().unwrap();
        assert_eq!(change.slot_id, "A1");
        assert!(change.occupied);

        // Both reports refresh the summary
        for _ in 0..2 {
            let summary: shared::message::AvailabilitySummaryPayload =
                summaries.recv().await.unwrap().parse_payload().unwrap();
            assert_eq!(summary.total_slots, 1);
            assert!(!summary.any_available);
        }

        // The duplicate produced no second change event
        let next = tokio::time::timeout(std::time::Duration::from_millis(50), changes.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_gate_status_remembered() {
        let bus = MessageBus::new();
        let router = router(Arc::new(MockService::new()), &bus);
        assert_eq!(router.gate_status(), None);

        let msg = BusMessage::new(
            topics::GATE_STATUS,
            br#"{"gateStatus":"closed","timestamp":5}"#.to_vec(),
        );
        router.dispatch(&msg).await.unwrap();
        assert_eq!(router.gate_status().as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn test_gate_unreachable_is_error() {
        let bus = MessageBus::new();
        let router = router(Arc::new(MockService::new().with_free_slot()), &bus);
        let result = router.dispatch(&scan("T1", "entry", 1)).await;
        assert!(matches!(result, Err(BusError::NoSubscribers(_))));
    }

    #[test]
    fn test_dedup_evicts_oldest() {
        let mut dedup = ScanDedup::new(2);
        let key = |ts| ScanKey {
            tag_id: "T1".into(),
            location: "entry".into(),
            timestamp: ts,
        };
        for ts in 0..3 {
            dedup.insert(key(ts), GateCommandPayload::deny("x", ts));
        }
        assert!(dedup.get(&key(0)).is_none());
        assert!(dedup.get(&key(1)).is_some());
        assert!(dedup.get(&key(2)).is_some());
    }

    #[test]
    fn test_deny_reason_policy() {
        let insufficient = ParkingError::InsufficientBalance {
            required: Decimal::from(10),
            available: Decimal::ZERO,
        };
        let occupied = ParkingError::SlotOccupied("A1".into());
        let transport = ParkingError::TransportFailure("down".into());

        assert_eq!(deny_reason(&occupied, Lane::Entry), "Selected slot is occupied");
        assert_eq!(deny_reason(&transport, Lane::Entry), REASON_SYSTEM_ERROR);
        assert_eq!(deny_reason(&occupied, Lane::Exit), REASON_SYSTEM_ERROR);
        assert!(deny_reason(&insufficient, Lane::Exit).starts_with("Insufficient balance"));
    }
}
