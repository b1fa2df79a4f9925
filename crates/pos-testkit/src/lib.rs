//! In-memory collaborators and a pre-wired harness for cross-component
//! scenario tests. Nothing here touches the network or a database.

use std::sync::Arc;

use chrono::NaiveDate;

use pos_calendar::HolidayCalendar;
use pos_eod::{EodEngine, EodEngineConfig};
use pos_events::EventPublisher;
use pos_schemas::{RawPosition, Snapshot, SnapshotStatus};

mod mem_store;
mod memory_bus;
mod scripted_upstream;

pub use mem_store::MemStore;
pub use memory_bus::MemoryBus;
pub use scripted_upstream::ScriptedUpstream;

/// Engine + fakes wired together the way the daemon wires production.
pub struct Harness {
    pub store: Arc<MemStore>,
    pub upstream: Arc<ScriptedUpstream>,
    pub bus: MemoryBus,
    pub publisher: Arc<EventPublisher>,
    pub calendar: Arc<HolidayCalendar>,
    pub engine: Arc<EodEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EodEngineConfig::default())
    }

    pub fn with_config(cfg: EodEngineConfig) -> Self {
        let store = Arc::new(MemStore::new());
        let upstream = Arc::new(ScriptedUpstream::new());
        let bus = MemoryBus::new();
        let publisher = Arc::new(EventPublisher::new(Arc::new(bus.clone())));
        let calendar = Arc::new(HolidayCalendar::weekdays_only());
        let engine = Arc::new(EodEngine::new(
            Arc::clone(&store) as Arc<dyn pos_eod::PositionStore>,
            Arc::clone(&upstream) as Arc<dyn pos_upstream::SnapshotSource>,
            Arc::clone(&publisher),
            Arc::clone(&calendar),
            cfg,
        ));
        Harness {
            store,
            upstream,
            bus,
            publisher,
            calendar,
            engine,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// A Monday, so the weekday calendar treats it as a business day.
pub fn business_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 2, 3).expect("valid fixture date")
}

pub fn raw_position(product: &str, quantity: &str, price: &str) -> RawPosition {
    RawPosition {
        product_id: product.to_string(),
        position_type: "SETTLED".to_string(),
        quantity: quantity.to_string(),
        price: Some(price.to_string()),
        currency: "USD".to_string(),
        market_value: None,
        ticker: None,
        asset_class: None,
        issue_currency: None,
        settlement_currency: None,
    }
}

pub fn snapshot(
    account_id: &str,
    client_id: &str,
    date: NaiveDate,
    positions: Vec<RawPosition>,
) -> Snapshot {
    Snapshot {
        account_id: account_id.to_string(),
        client_id: client_id.to_string(),
        business_date: date,
        status: SnapshotStatus::Available,
        positions,
    }
}

/// The three-position book from the standard happy-path fixture:
/// qty 100/50/25 at 150.25/10/4000 USD.
pub fn standard_snapshot(account_id: &str, client_id: &str, date: NaiveDate) -> Snapshot {
    snapshot(
        account_id,
        client_id,
        date,
        vec![
            raw_position("PROD-AAA", "100", "150.25"),
            raw_position("PROD-BBB", "50", "10"),
            raw_position("PROD-CCC", "25", "4000"),
        ],
    )
}
