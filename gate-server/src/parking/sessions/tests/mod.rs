use super::*;
use crate::utils::ManualClock;


/// 2025-01-15 09:00:00 UTC
const NINE_AM: i64 = 1_736_931_600_000;

struct Harness {
    manager: SessionManager,
    clock: Arc<ManualClock>,
    storage: ParkingStorage,
}

fn create_test_manager() -> Harness {
    let storage = ParkingStorage::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(NINE_AM));
    let slots = Arc::new(SlotAggregate::new(storage.clone()));
    let manager = SessionManager::new(storage.clone(), slots, Tariff::default(), clock.clone());
    Harness {
        manager,
        clock,
        storage,
    }
}

fn register(manager: &SessionManager, tag_id: &str, balance: i64) -> Credential {
    manager
        .register_credential(&RegisterCredential {
            tag_id: tag_id.to_string(),
            name: format!("Driver {}", tag_id),
            vehicle_no: format!("KA01{}", tag_id),
            contact: None,
            email: None,
            initial_balance: Decimal::from(balance),
        })
        .unwrap()
}

fn entry(tag_id: &str, slot_id: Option<&str>) -> EntryRequest {
    EntryRequest {
        tag_id: tag_id.to_string(),
        camera_id: "GATE_CAM".to_string(),
        slot_id: slot_id.map(str::to_string),
    }
}

fn exit(tag_id: &str) -> ExitRequest {
    ExitRequest {
        tag_id: tag_id.to_string(),
        camera_id: "GATE_CAM".to_string(),
    }
}

fn ledger_sum(storage: &ParkingStorage, tag_id: &str) -> Decimal {
    storage
        .transactions_for(tag_id, None)
        .unwrap()
        .iter()
        .map(|t| t.amount)
        .sum()
}
