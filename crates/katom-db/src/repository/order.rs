//! # Order Repository
//!
//! The order transaction processor: one atomic write per sale and per
//! cancellation.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    create_order_tx (one transaction)                    │
//! │                                                                         │
//! │  1. UPDATE shifts .. WHERE is_active = 1 RETURNING id                   │
//! │     └── first write: takes the lock, serializes with close_shift        │
//! │     └── no row → NoActiveShift                                          │
//! │  2. Check products, customer and promotion belong to the store          │
//! │  3. INSERT orders (PAID)                                                │
//! │  4. For each line:                                                      │
//! │     └── stock ledger SALE (−qty, clamped at 0)                          │
//! │     └── INSERT order_items with from_stock / to_stock                   │
//! │  5. INSERT payments, order_promotions                                   │
//! │  6. change > 0 → shift cash movement PAID_OUT                           │
//! │  7. customer attached → queue ACCRUE job                                │
//! │  8. COMMIT                                                              │
//! │                                                                         │
//! │  Any error → ROLLBACK, nothing is persisted.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cancel Flow
//! ```text
//! UPDATE orders SET status = 'CANCELLED' WHERE status = 'PAID'   (CAS)
//!   └── restore from_stock − to_stock per line (CANCEL_SALE)
//!   └── ACCRUE still queued → retire it
//!       otherwise          → queue REVERSE
//! ```

use chrono::Utc;
use katom_core::loyalty::{AccrualKind, AccrualLine};
use katom_core::order::{
    validate_cancel_reason, CreateOrderRequest, OrderLineRequest, OrderTotals, PaymentRequest,
};
use katom_core::shift::{CashDirection, CashMovementKind};
use katom_core::{
    CoreError, CoreResult, Money, MovementKind, Order, OrderItem, OrderReceipt, OrderStatus, Payment,
    StockAdjustment, StockReference,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::accrual::{enqueue_in, retire_pending_accrual_in, NewAccrualJob};
use super::new_id;
use super::shift::record_cash_movement_in;
use super::stock::adjust_in;
use crate::error::DbResult;

const ORDER_COLUMNS: &str = r#"
    id, store_id, branch_id, shift_id, staff_id, customer_id,
    subtotal_cents, discount_total_cents, total_price_cents, change_amount_cents,
    status, promotion_id, cancel_reason, cancelled_by, cancelled_at,
    created_at, updated_at
"#;

/// A validated order ready to be written.
///
/// Built with [`NewOrder::from_request`], which checks the request shape
/// and computes the totals before any transaction is opened.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub store_id: String,
    pub branch_id: String,
    pub staff_id: String,
    pub customer_id: Option<String>,
    pub items: Vec<OrderLineRequest>,
    pub payments: Vec<PaymentRequest>,
    pub totals: OrderTotals,
    pub promotion_id: Option<String>,
    /// Queue an ACCRUE job when a customer is attached.
    pub accrue_points: bool,
}

impl NewOrder {
    /// Validates the request and computes its totals.
    ///
    /// ## Errors
    /// - `Validation` for empty lines, bad quantities or prices
    /// - `InsufficientPayment` when payments do not cover the total
    pub fn from_request(
        store_id: &str,
        branch_id: &str,
        staff_id: &str,
        request: CreateOrderRequest,
        accrue_points: bool,
    ) -> CoreResult<Self> {
        request.validate()?;
        let totals = OrderTotals::compute(
            &request.items,
            &request.payments,
            request.discount_total_cents,
        )?;

        Ok(NewOrder {
            store_id: store_id.to_string(),
            branch_id: branch_id.to_string(),
            staff_id: staff_id.to_string(),
            customer_id: request.customer_id,
            items: request.items,
            payments: request.payments,
            totals,
            promotion_id: request.promotion_id,
            accrue_points,
        })
    }

    fn accrual_lines(&self) -> Vec<AccrualLine> {
        self.items
            .iter()
            .map(|l| AccrualLine {
                product_id: l.product_id.clone(),
                quantity: l.quantity,
            })
            .collect()
    }
}

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Records a paid order with its stock, payment and loyalty effects.
    ///
    /// ## Stock
    /// Lines deduct through the ledger, which clamps at zero. An oversold
    /// line is still sold; `from_stock - to_stock` records what actually
    /// left the shelf.
    ///
    /// ## Errors
    /// - `NoActiveShift` when the branch has no open shift
    /// - `ProductNotFound` / `CustomerNotFound` / `PromotionNotFound`
    ///   for references outside the store
    pub async fn create_order_tx(&self, order: &NewOrder) -> DbResult<OrderReceipt> {
        let now = Utc::now();
        let order_id = new_id();
        let mut tx = self.pool.begin().await?;

        let shift_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE shifts SET updated_at = ?3
            WHERE store_id = ?1 AND branch_id = ?2 AND is_active = 1
            RETURNING id
            "#,
        )
        .bind(&order.store_id)
        .bind(&order.branch_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let shift_id = shift_id.ok_or_else(|| CoreError::NoActiveShift {
            branch_id: order.branch_id.clone(),
        })?;

        check_references_in(&mut tx, order).await?;

        let header = Order {
            id: order_id.clone(),
            store_id: order.store_id.clone(),
            branch_id: order.branch_id.clone(),
            shift_id: shift_id.clone(),
            staff_id: order.staff_id.clone(),
            customer_id: order.customer_id.clone(),
            subtotal_cents: order.totals.subtotal.cents(),
            discount_total_cents: order.totals.discount.cents(),
            total_price_cents: order.totals.total.cents(),
            change_amount_cents: order.totals.change.cents(),
            status: OrderStatus::Paid,
            promotion_id: order.promotion_id.clone(),
            cancel_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, store_id, branch_id, shift_id, staff_id, customer_id,
                subtotal_cents, discount_total_cents, total_price_cents, change_amount_cents,
                status, promotion_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
        )
        .bind(&header.id)
        .bind(&header.store_id)
        .bind(&header.branch_id)
        .bind(&header.shift_id)
        .bind(&header.staff_id)
        .bind(&header.customer_id)
        .bind(header.subtotal_cents)
        .bind(header.discount_total_cents)
        .bind(header.total_price_cents)
        .bind(header.change_amount_cents)
        .bind(header.status)
        .bind(&header.promotion_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(order.items.len());
        for line in &order.items {
            let adjustment = StockAdjustment::new(
                &order.store_id,
                &order.branch_id,
                &line.product_id,
                -line.quantity,
                MovementKind::Sale,
                &order.staff_id,
            )
            .with_reference(StockReference::order(&order_id));

            let change = adjust_in(&mut tx, &adjustment).await?;

            let item = OrderItem {
                id: new_id(),
                order_id: order_id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                line_total_cents: Money::from_cents(line.unit_price_cents)
                    .multiply_quantity(line.quantity)
                    .cents(),
                from_stock: change.before,
                to_stock: change.after,
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, quantity, unit_price_cents,
                    line_total_cents, from_stock, to_stock, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.line_total_cents)
            .bind(item.from_stock)
            .bind(item.to_stock)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            items.push(item);
        }

        let mut payments = Vec::with_capacity(order.payments.len());
        for request in &order.payments {
            let payment = Payment {
                id: new_id(),
                order_id: order_id.clone(),
                method: request.method,
                amount_cents: request.amount_cents,
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO payments (id, order_id, method, amount_cents, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&payment.id)
            .bind(&payment.order_id)
            .bind(payment.method)
            .bind(payment.amount_cents)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            payments.push(payment);
        }

        if let Some(promotion_id) = &order.promotion_id {
            sqlx::query(
                r#"
                INSERT INTO order_promotions (order_id, promotion_id, discount_amount_cents, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&order_id)
            .bind(promotion_id)
            .bind(order.totals.discount.cents())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if order.totals.change.is_positive() {
            record_cash_movement_in(
                &mut tx,
                &shift_id,
                CashMovementKind::PaidOut,
                CashDirection::Out,
                order.totals.change.cents(),
                Some(&format!("change for order {order_id}")),
                &order.staff_id,
            )
            .await?;
        }

        if let (Some(customer_id), true) = (&order.customer_id, order.accrue_points) {
            enqueue_in(
                &mut tx,
                &NewAccrualJob {
                    kind: AccrualKind::Accrue,
                    store_id: order.store_id.clone(),
                    branch_id: order.branch_id.clone(),
                    order_id: order_id.clone(),
                    customer_id: customer_id.clone(),
                    staff_id: order.staff_id.clone(),
                    lines: order.accrual_lines(),
                },
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            order_id = %order_id,
            shift_id = %shift_id,
            total = %order.totals.total,
            lines = items.len(),
            "Order created"
        );

        Ok(OrderReceipt {
            order: header,
            items,
            payments,
        })
    }

    /// Cancels a paid order and puts its stock back.
    ///
    /// ## What This Does
    /// 1. Flips PAID → CANCELLED (compare-and-swap, first write)
    /// 2. Restores what each line actually deducted
    /// 3. Settles loyalty: an ACCRUE job that never ran is retired;
    ///    otherwise a REVERSE job is queued when `reverse_points` is set
    ///
    /// ## Errors
    /// - `OrderNotFound` when the order is not in the store
    /// - `InvalidOrderStatus` when it is already cancelled
    pub async fn cancel_order(
        &self,
        store_id: &str,
        order_id: &str,
        cancelled_by: &str,
        reason: Option<&str>,
        reverse_points: bool,
    ) -> DbResult<OrderReceipt> {
        validate_cancel_reason(reason)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = 'CANCELLED',
                cancel_reason = ?3,
                cancelled_by = ?4,
                cancelled_at = ?5,
                updated_at = ?5
            WHERE id = ?1 AND store_id = ?2 AND status = 'PAID'
            "#,
        )
        .bind(order_id)
        .bind(store_id)
        .bind(reason)
        .bind(cancelled_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let status: Option<OrderStatus> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1 AND store_id = ?2")
                    .bind(order_id)
                    .bind(store_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match status {
                None => CoreError::OrderNotFound(order_id.to_string()),
                Some(status) => CoreError::InvalidOrderStatus {
                    order_id: order_id.to_string(),
                    status: status.to_string(),
                    operation: "cancel".to_string(),
                },
            }
            .into());
        }

        let order = fetch_order_in(&mut tx, order_id).await?;
        let items = fetch_items_in(&mut tx, order_id).await?;
        let reason_text = reason.unwrap_or("order cancelled");

        for item in &items {
            let restored = item.deducted();
            if restored == 0 {
                continue;
            }
            let adjustment = StockAdjustment::new(
                &order.store_id,
                &order.branch_id,
                &item.product_id,
                restored,
                MovementKind::CancelSale,
                cancelled_by,
            )
            .with_reference(StockReference::order(order_id))
            .with_reason(reason_text);

            adjust_in(&mut tx, &adjustment).await?;
        }

        let retired = retire_pending_accrual_in(&mut tx, order_id).await?;
        if let (0, true, Some(customer_id)) = (retired, reverse_points, &order.customer_id) {
            enqueue_in(
                &mut tx,
                &NewAccrualJob {
                    kind: AccrualKind::Reverse,
                    store_id: order.store_id.clone(),
                    branch_id: order.branch_id.clone(),
                    order_id: order_id.to_string(),
                    customer_id: customer_id.clone(),
                    staff_id: cancelled_by.to_string(),
                    lines: items
                        .iter()
                        .map(|i| AccrualLine {
                            product_id: i.product_id.clone(),
                            quantity: i.quantity,
                        })
                        .collect(),
                },
            )
            .await?;
        }

        let payments = fetch_payments_in(&mut tx, order_id).await?;
        tx.commit().await?;

        info!(
            order_id = %order_id,
            cancelled_by = %cancelled_by,
            retired_accruals = retired,
            "Order cancelled"
        );

        Ok(OrderReceipt {
            order,
            items,
            payments,
        })
    }

    /// An order with its lines and payments.
    pub async fn get(&self, store_id: &str, order_id: &str) -> DbResult<Option<OrderReceipt>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1 AND store_id = ?2"
        ))
        .bind(order_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(order) = order else {
            return Ok(None);
        };

        let mut conn = self.pool.acquire().await?;
        let items = fetch_items_in(&mut conn, order_id).await?;
        let payments = fetch_payments_in(&mut conn, order_id).await?;

        Ok(Some(OrderReceipt {
            order,
            items,
            payments,
        }))
    }

    /// Orders taken during a shift, newest first.
    pub async fn list_for_shift(&self, store_id: &str, shift_id: &str) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE store_id = ?1 AND shift_id = ?2
            ORDER BY created_at DESC, rowid DESC
            "#
        ))
        .bind(store_id)
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }
}

/// Fails on the first product, customer or promotion outside the store.
async fn check_references_in(conn: &mut SqliteConnection, order: &NewOrder) -> DbResult<()> {
    for line in &order.items {
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM products WHERE id = ?1 AND store_id = ?2")
                .bind(&line.product_id)
                .bind(&order.store_id)
                .fetch_optional(&mut *conn)
                .await?;
        if found.is_none() {
            return Err(CoreError::ProductNotFound(line.product_id.clone()).into());
        }
    }

    if let Some(customer_id) = &order.customer_id {
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM customers WHERE id = ?1 AND store_id = ?2")
                .bind(customer_id)
                .bind(&order.store_id)
                .fetch_optional(&mut *conn)
                .await?;
        if found.is_none() {
            return Err(CoreError::CustomerNotFound(customer_id.clone()).into());
        }
    }

    if let Some(promotion_id) = &order.promotion_id {
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM promotions WHERE id = ?1 AND store_id = ?2")
                .bind(promotion_id)
                .bind(&order.store_id)
                .fetch_optional(&mut *conn)
                .await?;
        if found.is_none() {
            return Err(CoreError::PromotionNotFound(promotion_id.clone()).into());
        }
    }

    debug!(lines = order.items.len(), "Order references checked");
    Ok(())
}

async fn fetch_order_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Order> {
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"
    ))
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(order)
}

async fn fetch_items_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        r#"
        SELECT id, order_id, product_id, quantity, unit_price_cents,
               line_total_cents, from_stock, to_stock, created_at
        FROM order_items
        WHERE order_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

async fn fetch_payments_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        r#"
        SELECT id, order_id, method, amount_cents, created_at
        FROM payments
        WHERE order_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(payments)
}

// =============================================================================
// Unit Tests
// =============================================================================
