//! Shared fixtures for repository tests.
//!
//! Every fixture gets its own in-memory database with one store, two
//! branches, three products and one customer.

use katom_core::order::{CreateOrderRequest, OrderLineRequest, PaymentMethod, PaymentRequest};
use katom_core::{MovementKind, OrderReceipt, Shift, StockAdjustment};

use crate::repository::catalog::NewProduct;
use crate::repository::order::NewOrder;
use crate::{Database, DbConfig};

pub const STAFF_ID: &str = "staff-1";

pub struct Fixture {
    pub db: Database,
    pub store_id: String,
    pub branch_id: String,
    pub other_branch_id: String,
    /// `[0]` costs 100.00, `[1]` costs 25.00, `[2]` costs 50.00 and redeems for 5 points.
    pub product_ids: Vec<String>,
    pub customer_id: String,
    pub staff_id: String,
}

pub async fn fixture() -> Fixture {
    fixture_with(DbConfig::in_memory()).await
}

pub async fn fixture_with(config: DbConfig) -> Fixture {
    let db = Database::new(config).await.unwrap();
    let catalog = db.catalog();

    let store_id = catalog.create_store("Katom Test Store").await.unwrap();
    let branch_id = catalog.create_branch(&store_id, "Main").await.unwrap().id;
    let other_branch_id = catalog.create_branch(&store_id, "Riverside").await.unwrap().id;

    let mut product_ids = Vec::new();
    for input in [
        NewProduct::new(&store_id, "Thai Tea", 10_000).category("drinks"),
        NewProduct::new(&store_id, "Sticky Rice", 2_500).category("food"),
        NewProduct::new(&store_id, "Mango", 5_000)
            .category("food")
            .redeemable_for(5),
    ] {
        product_ids.push(catalog.create_product(&input).await.unwrap().id);
    }

    let customer_id = catalog
        .create_customer(&store_id, "C001", "Somchai Jaidee", Some("1234"))
        .await
        .unwrap()
        .id;

    Fixture {
        db,
        store_id,
        branch_id,
        other_branch_id,
        product_ids,
        customer_id,
        staff_id: STAFF_ID.to_string(),
    }
}

impl Fixture {
    pub fn adjustment(
        &self,
        branch_id: &str,
        product_id: &str,
        delta: i64,
        kind: MovementKind,
    ) -> StockAdjustment {
        StockAdjustment::new(&self.store_id, branch_id, product_id, delta, kind, &self.staff_id)
    }

    pub async fn stock_up(&self, branch_id: &str, product_id: &str, quantity: i64) {
        self.db
            .stock()
            .adjust(&self.adjustment(branch_id, product_id, quantity, MovementKind::Receive))
            .await
            .unwrap();
    }

    pub async fn on_hand(&self, branch_id: &str, product_id: &str) -> i64 {
        self.db.stock().on_hand(branch_id, product_id).await.unwrap()
    }

    pub async fn open_shift(&self, starting_cash_cents: i64) -> Shift {
        self.db
            .shifts()
            .open(&self.store_id, &self.branch_id, &self.staff_id, starting_cash_cents)
            .await
            .unwrap()
    }

    /// A cash order for the main branch, optionally for the fixture customer.
    pub fn cash_order(
        &self,
        lines: &[(usize, i64)],
        paid_cents: i64,
        with_customer: bool,
    ) -> NewOrder {
        let request = CreateOrderRequest {
            customer_id: with_customer.then(|| self.customer_id.clone()),
            items: lines
                .iter()
                .map(|(idx, qty)| OrderLineRequest {
                    product_id: self.product_ids[*idx].clone(),
                    quantity: *qty,
                    unit_price_cents: [10_000, 2_500, 5_000][*idx],
                })
                .collect(),
            payments: vec![PaymentRequest {
                method: PaymentMethod::Cash,
                amount_cents: paid_cents,
            }],
            discount_total_cents: 0,
            promotion_id: None,
        };
        NewOrder::from_request(&self.store_id, &self.branch_id, &self.staff_id, request, true)
            .unwrap()
    }

    pub async fn place(&self, order: &NewOrder) -> OrderReceipt {
        self.db.orders().create_order_tx(order).await.unwrap()
    }
}
