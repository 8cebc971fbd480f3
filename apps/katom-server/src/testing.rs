//! Shared fixtures for command tests.
//!
//! One in-memory database per fixture: a store with two branches, three
//! products and one member. [`file_fixture`] uses a temp file instead, for
//! tests that need real concurrent writers.

use katom_core::order::{CreateOrderRequest, OrderLineRequest, PaymentMethod, PaymentRequest};
use katom_core::{MovementKind, Shift, StockAdjustment};
use katom_db::{Database, DbConfig, NewProduct};
use std::path::PathBuf;

use crate::config::PosConfig;
use crate::session::SessionContext;
use crate::worker::AccrualProcessor;
use crate::AppState;

pub const STAFF_ID: &str = "staff-1";

/// Unit prices of the fixture products, by index.
pub const PRICES: [i64; 3] = [10_000, 2_500, 5_000];

pub struct Fixture {
    pub app: AppState,
    pub store_id: String,
    pub branch_id: String,
    pub other_branch_id: String,
    /// `[2]` redeems for 5 points.
    pub product_ids: Vec<String>,
    pub customer_id: String,
}

pub async fn fixture() -> Fixture {
    fixture_with(PosConfig::default()).await
}

pub async fn fixture_with(config: PosConfig) -> Fixture {
    fixture_on(DbConfig::in_memory(), config).await
}

/// A fixture on a fresh database file. Remove the returned path when done.
pub async fn file_fixture() -> (Fixture, PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "katom-server-{}-{}.db",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let fixture = fixture_on(DbConfig::new(&path).max_connections(8), PosConfig::default()).await;
    (fixture, path)
}

async fn fixture_on(db_config: DbConfig, config: PosConfig) -> Fixture {
    let db = Database::new(db_config).await.unwrap();
    let catalog = db.catalog();

    let store_id = catalog.create_store("Katom Test Store").await.unwrap();
    let branch_id = catalog.create_branch(&store_id, "Main").await.unwrap().id;
    let other_branch_id = catalog.create_branch(&store_id, "Riverside").await.unwrap().id;

    let mut product_ids = Vec::new();
    for input in [
        NewProduct::new(&store_id, "Thai Tea", PRICES[0]),
        NewProduct::new(&store_id, "Sticky Rice", PRICES[1]),
        NewProduct::new(&store_id, "Mango", PRICES[2]).redeemable_for(5),
    ] {
        product_ids.push(catalog.create_product(&input).await.unwrap().id);
    }

    let customer_id = catalog
        .create_customer(&store_id, "C001", "Somchai Jaidee", None)
        .await
        .unwrap()
        .id;

    Fixture {
        app: AppState::new(db, config),
        store_id,
        branch_id,
        other_branch_id,
        product_ids,
        customer_id,
    }
}

impl Fixture {
    /// Staff member at the main branch.
    pub fn session(&self) -> SessionContext {
        SessionContext::new(&self.store_id)
            .branch(&self.branch_id)
            .staff(STAFF_ID)
    }

    /// Staff member at the second branch.
    pub fn other_session(&self) -> SessionContext {
        SessionContext::new(&self.store_id)
            .branch(&self.other_branch_id)
            .staff(STAFF_ID)
    }

    pub fn db(&self) -> &Database {
        self.app.db()
    }

    pub fn processor(&self) -> AccrualProcessor {
        AccrualProcessor::new(self.db().clone(), self.app.config().loyalty.clone()).0
    }

    pub async fn open_shift(&self, starting_cash_cents: i64) -> Shift {
        self.db()
            .shifts()
            .open(&self.store_id, &self.branch_id, STAFF_ID, starting_cash_cents)
            .await
            .unwrap()
    }

    /// Receives stock of product `idx` at the main branch.
    pub async fn stock_up(&self, idx: usize, quantity: i64) {
        self.stock_up_at(&self.branch_id, idx, quantity).await;
    }

    pub async fn stock_up_at(&self, branch_id: &str, idx: usize, quantity: i64) {
        self.db()
            .stock()
            .adjust(&StockAdjustment::new(
                &self.store_id,
                branch_id,
                &self.product_ids[idx],
                quantity,
                MovementKind::Receive,
                STAFF_ID,
            ))
            .await
            .unwrap();
    }

    pub async fn on_hand(&self, branch_id: &str, idx: usize) -> i64 {
        self.db()
            .stock()
            .on_hand(branch_id, &self.product_ids[idx])
            .await
            .unwrap()
    }

    /// The fixture member's balance on product `idx`.
    pub async fn points_for(&self, idx: usize) -> i64 {
        self.db()
            .points()
            .balance(&self.store_id, &self.customer_id, &self.product_ids[idx])
            .await
            .unwrap()
    }
}

/// A cash order at list prices. `lines` are `(product index, quantity)`.
pub fn order_request(
    fx: &Fixture,
    lines: &[(usize, i64)],
    paid_cents: i64,
    with_customer: bool,
) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id: with_customer.then(|| fx.customer_id.clone()),
        items: lines
            .iter()
            .map(|(idx, qty)| OrderLineRequest {
                product_id: fx.product_ids[*idx].clone(),
                quantity: *qty,
                unit_price_cents: PRICES[*idx],
            })
            .collect(),
        payments: vec![PaymentRequest {
            method: PaymentMethod::Cash,
            amount_cents: paid_cents,
        }],
        discount_total_cents: 0,
        promotion_id: None,
    }
}
