//! # Transfer Repository
//!
//! Stock transfers between branches, or from the central warehouse.
//!
//! ## State Machine
//! ```text
//!   CREATED ──send──► SENT ──receive──► RECEIVED
//!      │               │
//!      └────cancel─────┴──────────────► CANCELLED
//!
//!   send     source    −send_count     TRANSFER_OUT  (skipped for central)
//!   receive  dest      +receive_count  TRANSFER_IN   (counts > 0)
//!   cancel   source    +send_count     TRANSFER_IN   (only if already sent)
//! ```
//!
//! Every transition starts with a compare-and-swap
//! `UPDATE .. WHERE status IN (<sources>)`. Zero rows means the transfer is
//! missing, in the wrong state or at another branch, and nothing moves.

use chrono::{DateTime, Utc};
use katom_core::transfer::{
    clamp_page_size, plan_receipt, CreateTransferRequest, ReceiveItemRequest, TransferPage,
    DEFAULT_TRANSFER_PAGE_SIZE, MAX_TRANSFER_PAGE_SIZE,
};
use katom_core::{
    CoreError, MovementKind, StockAdjustment, StockReference, StockTransfer, TransferItem,
    TransferStatus,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::new_id;
use super::stock::adjust_in;
use crate::error::DbResult;

const TRANSFER_COLUMNS: &str = r#"
    id, store_id, from_branch_id, to_branch_id, status, note,
    requested_by, sent_by, received_by, cancelled_by,
    sent_at, received_at, cancelled_at, created_at, updated_at
"#;

/// Repository for stock transfers.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    /// Creates a new TransferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    /// Records a transfer request. Stock is not touched.
    ///
    /// `request.from_branch_id` must already be resolved; `None` means
    /// central warehouse.
    ///
    /// ## Errors
    /// - `Validation` for empty or duplicate lines
    /// - `BranchNotFound` / `ProductNotFound` for ids outside the store
    pub async fn create(
        &self,
        store_id: &str,
        requested_by: &str,
        request: &CreateTransferRequest,
    ) -> DbResult<StockTransfer> {
        request.validate()?;

        let now = Utc::now();
        let id = new_id();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stock_transfers (
                id, store_id, from_branch_id, to_branch_id, status, note,
                requested_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'CREATED', ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&id)
        .bind(store_id)
        .bind(&request.from_branch_id)
        .bind(&request.to_branch_id)
        .bind(&request.note)
        .bind(requested_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let branches = request
            .from_branch_id
            .iter()
            .chain(std::iter::once(&request.to_branch_id));
        for branch_id in branches {
            let found: Option<String> =
                sqlx::query_scalar("SELECT id FROM branches WHERE id = ?1 AND store_id = ?2")
                    .bind(branch_id)
                    .bind(store_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if found.is_none() {
                return Err(CoreError::BranchNotFound(branch_id.clone()).into());
            }
        }

        for item in &request.items {
            let found: Option<String> =
                sqlx::query_scalar("SELECT id FROM products WHERE id = ?1 AND store_id = ?2")
                    .bind(&item.product_id)
                    .bind(store_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if found.is_none() {
                return Err(CoreError::ProductNotFound(item.product_id.clone()).into());
            }

            sqlx::query(
                r#"
                INSERT INTO stock_transfer_items (id, transfer_id, product_id, send_count)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(new_id())
            .bind(&id)
            .bind(&item.product_id)
            .bind(item.send_count)
            .execute(&mut *tx)
            .await?;
        }

        let transfer = fetch_in(&mut tx, &id).await?;
        tx.commit().await?;

        info!(
            transfer_id = %id,
            from = ?request.from_branch_id,
            to = %request.to_branch_id,
            "Transfer created"
        );
        Ok(transfer)
    }

    /// A transfer with its items.
    pub async fn get(&self, store_id: &str, transfer_id: &str) -> DbResult<Option<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;
        let transfer = find_in(&mut conn, transfer_id).await?;
        Ok(transfer.filter(|t| t.store_id == store_id))
    }

    /// CREATED → SENT. Deducts the source branch unless the goods come from
    /// the central warehouse.
    ///
    /// ## Errors
    /// - `BranchMismatch` when `branch_id` is not the source branch
    /// - `InvalidTransferState` unless the transfer is CREATED
    pub async fn send(
        &self,
        store_id: &str,
        transfer_id: &str,
        branch_id: &str,
        staff_id: &str,
    ) -> DbResult<StockTransfer> {
        let mut tx = self.pool.begin().await?;
        let transfer = claim_in(
            &mut tx,
            Claim::new(store_id, transfer_id, TransferStatus::Sent, "send", staff_id)
                .from_branch(branch_id),
        )
        .await?;

        if let Some(from_branch_id) = &transfer.from_branch_id {
            for item in &transfer.items {
                let adjustment = StockAdjustment::new(
                    store_id,
                    from_branch_id,
                    &item.product_id,
                    -item.send_count,
                    MovementKind::TransferOut,
                    staff_id,
                )
                .with_reference(StockReference::transfer(transfer_id));
                adjust_in(&mut tx, &adjustment).await?;
            }
        }

        tx.commit().await?;

        info!(transfer_id = %transfer_id, sent_by = %staff_id, "Transfer sent");
        Ok(transfer)
    }

    /// SENT → RECEIVED at the destination branch.
    ///
    /// ## Errors
    /// - `BranchMismatch` when `branch_id` is not the destination
    /// - `InvalidTransferState` unless the transfer is SENT
    /// - `Validation` when a listed product is not on the transfer
    pub async fn receive(
        &self,
        store_id: &str,
        transfer_id: &str,
        branch_id: &str,
        staff_id: &str,
        received: &[ReceiveItemRequest],
    ) -> DbResult<StockTransfer> {
        let mut tx = self.pool.begin().await?;
        let claimed = claim_in(
            &mut tx,
            Claim::new(store_id, transfer_id, TransferStatus::Received, "receive", staff_id)
                .at_branch(branch_id),
        )
        .await?;

        let plan = plan_receipt(transfer_id, &claimed.items, received)?;

        for line in &plan {
            sqlx::query("UPDATE stock_transfer_items SET receive_count = ?2 WHERE id = ?1")
                .bind(&line.item_id)
                .bind(line.receive_count)
                .execute(&mut *tx)
                .await?;

            if line.receive_count > 0 {
                let adjustment = StockAdjustment::new(
                    store_id,
                    branch_id,
                    &line.product_id,
                    line.receive_count,
                    MovementKind::TransferIn,
                    staff_id,
                )
                .with_reference(StockReference::transfer(transfer_id));
                adjust_in(&mut tx, &adjustment).await?;
            }
        }

        let transfer = fetch_in(&mut tx, transfer_id).await?;
        tx.commit().await?;

        let total: i64 = plan.iter().map(|l| l.receive_count).sum();
        info!(transfer_id = %transfer_id, received = total, "Transfer received");
        Ok(transfer)
    }

    /// CREATED | SENT → CANCELLED. A sent transfer puts the goods back at
    /// the source branch.
    pub async fn cancel(&self, store_id: &str, transfer_id: &str, staff_id: &str) -> DbResult<StockTransfer> {
        let mut tx = self.pool.begin().await?;
        let transfer = claim_in(
            &mut tx,
            Claim::new(store_id, transfer_id, TransferStatus::Cancelled, "cancel", staff_id),
        )
        .await?;

        let restored = match (&transfer.sent_at, &transfer.from_branch_id) {
            (Some(_), Some(from_branch_id)) => {
                for item in &transfer.items {
                    let adjustment = StockAdjustment::new(
                        store_id,
                        from_branch_id,
                        &item.product_id,
                        item.send_count,
                        MovementKind::TransferIn,
                        staff_id,
                    )
                    .with_reference(StockReference::transfer(transfer_id))
                    .with_reason("transfer cancelled");
                    adjust_in(&mut tx, &adjustment).await?;
                }
                true
            }
            _ => false,
        };

        tx.commit().await?;

        info!(transfer_id = %transfer_id, restored, "Transfer cancelled");
        Ok(transfer)
    }

    /// Transfers leaving or entering the branch, newest first.
    pub async fn list_for_branch(
        &self,
        store_id: &str,
        branch_id: &str,
        limit: Option<i64>,
        offset: i64,
    ) -> DbResult<TransferPage> {
        let limit = clamp_page_size(limit, DEFAULT_TRANSFER_PAGE_SIZE, MAX_TRANSFER_PAGE_SIZE);
        let mut conn = self.pool.acquire().await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stock_transfers
            WHERE store_id = ?1 AND (to_branch_id = ?2 OR from_branch_id = ?2)
            "#,
        )
        .bind(store_id)
        .bind(branch_id)
        .fetch_one(&mut *conn)
        .await?;

        let mut transfers = sqlx::query_as::<_, StockTransfer>(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS} FROM stock_transfers
            WHERE store_id = ?1 AND (to_branch_id = ?2 OR from_branch_id = ?2)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3 OFFSET ?4
            "#
        ))
        .bind(store_id)
        .bind(branch_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&mut *conn)
        .await?;

        for transfer in &mut transfers {
            transfer.items = items_in(&mut conn, &transfer.id).await?;
        }

        Ok(TransferPage { transfers, total })
    }

    /// SENT transfers waiting to be received at the branch.
    pub async fn pending_for_branch(&self, store_id: &str, branch_id: &str) -> DbResult<Vec<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;

        let mut transfers = sqlx::query_as::<_, StockTransfer>(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS} FROM stock_transfers
            WHERE store_id = ?1 AND to_branch_id = ?2 AND status = 'SENT'
            ORDER BY sent_at, rowid
            "#
        ))
        .bind(store_id)
        .bind(branch_id)
        .fetch_all(&mut *conn)
        .await?;

        for transfer in &mut transfers {
            transfer.items = items_in(&mut conn, &transfer.id).await?;
        }

        debug!(branch_id = %branch_id, count = transfers.len(), "Pending transfers loaded");
        Ok(transfers)
    }
}

// =============================================================================
// Transitions
// =============================================================================

struct Claim<'a> {
    store_id: &'a str,
    transfer_id: &'a str,
    next: TransferStatus,
    operation: &'a str,
    staff_id: &'a str,
    /// Destination the caller must be at.
    branch_id: Option<&'a str>,
    /// Source the caller must be at. Central-warehouse transfers pass.
    from_branch_id: Option<&'a str>,
}

impl<'a> Claim<'a> {
    fn new(
        store_id: &'a str,
        transfer_id: &'a str,
        next: TransferStatus,
        operation: &'a str,
        staff_id: &'a str,
    ) -> Self {
        Claim {
            store_id,
            transfer_id,
            next,
            operation,
            staff_id,
            branch_id: None,
            from_branch_id: None,
        }
    }

    fn at_branch(mut self, branch_id: &'a str) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    fn from_branch(mut self, branch_id: &'a str) -> Self {
        self.from_branch_id = Some(branch_id);
        self
    }
}

/// Moves the transfer to `claim.next` if it is in a legal source state.
///
/// This is the first write of the caller's transaction. On zero rows the
/// reason is worked out from the current row.
async fn claim_in(conn: &mut SqliteConnection, claim: Claim<'_>) -> DbResult<StockTransfer> {
    let (by_column, at_column) = match claim.next {
        TransferStatus::Sent => ("sent_by", "sent_at"),
        TransferStatus::Received => ("received_by", "received_at"),
        TransferStatus::Cancelled => ("cancelled_by", "cancelled_at"),
        // Nothing transitions into CREATED
        TransferStatus::Created => {
            return Err(CoreError::InvalidTransferState {
                transfer_id: claim.transfer_id.to_string(),
                status: claim.next.to_string(),
                operation: claim.operation.to_string(),
            }
            .into())
        }
    };

    let sources = TransferStatus::sources_of(claim.next)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let now: DateTime<Utc> = Utc::now();

    let result = sqlx::query(&format!(
        r#"
        UPDATE stock_transfers
        SET status = ?3, {by_column} = ?4, {at_column} = ?5, updated_at = ?5
        WHERE id = ?1 AND store_id = ?2 AND status IN ({sources})
          AND (?6 IS NULL OR to_branch_id = ?6)
          AND (?7 IS NULL OR from_branch_id IS NULL OR from_branch_id = ?7)
        "#
    ))
    .bind(claim.transfer_id)
    .bind(claim.store_id)
    .bind(claim.next)
    .bind(claim.staff_id)
    .bind(now)
    .bind(claim.branch_id)
    .bind(claim.from_branch_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return fetch_in(conn, claim.transfer_id).await;
    }

    let current = find_in(conn, claim.transfer_id)
        .await?
        .filter(|t| t.store_id == claim.store_id);

    let error = match current {
        None => CoreError::TransferNotFound(claim.transfer_id.to_string()),
        Some(t) => match (claim.branch_id, claim.from_branch_id, t.from_branch_id.as_deref()) {
            (Some(branch_id), _, _) if t.to_branch_id != branch_id => CoreError::BranchMismatch {
                expected: t.to_branch_id,
                actual: branch_id.to_string(),
            },
            (_, Some(branch_id), Some(source)) if source != branch_id => CoreError::BranchMismatch {
                expected: source.to_string(),
                actual: branch_id.to_string(),
            },
            _ => CoreError::InvalidTransferState {
                transfer_id: t.id,
                status: t.status.to_string(),
                operation: claim.operation.to_string(),
            },
        },
    };

    debug!(transfer_id = %claim.transfer_id, operation = %claim.operation, "Transfer claim refused");
    Err(error.into())
}

async fn find_in(conn: &mut SqliteConnection, transfer_id: &str) -> DbResult<Option<StockTransfer>> {
    let transfer = sqlx::query_as::<_, StockTransfer>(&format!(
        "SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE id = ?1"
    ))
    .bind(transfer_id)
    .fetch_optional(&mut *conn)
    .await?;

    match transfer {
        Some(mut transfer) => {
            transfer.items = items_in(conn, transfer_id).await?;
            Ok(Some(transfer))
        }
        None => Ok(None),
    }
}

async fn fetch_in(conn: &mut SqliteConnection, transfer_id: &str) -> DbResult<StockTransfer> {
    find_in(conn, transfer_id)
        .await?
        .ok_or_else(|| CoreError::TransferNotFound(transfer_id.to_string()).into())
}

async fn items_in(conn: &mut SqliteConnection, transfer_id: &str) -> DbResult<Vec<TransferItem>> {
    let items = sqlx::query_as::<_, TransferItem>(
        r#"
        SELECT id, transfer_id, product_id, send_count, receive_count
        FROM stock_transfer_items
        WHERE transfer_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(transfer_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use crate::DbError;
    use katom_core::transfer::{TransferItemRequest, WithdrawGoodsRequest, WithdrawItemRequest};

    fn request(fx: &Fixture, send_count: i64) -> CreateTransferRequest {
        CreateTransferRequest {
            from_branch_id: Some(fx.branch_id.clone()),
            to_branch_id: fx.other_branch_id.clone(),
            note: None,
            items: vec![TransferItemRequest {
                product_id: fx.product_ids[0].clone(),
                send_count,
            }],
        }
    }

    fn receive_all(fx: &Fixture, count: i64) -> Vec<ReceiveItemRequest> {
        vec![ReceiveItemRequest {
            product_id: fx.product_ids[0].clone(),
            receive_count: count,
        }]
    }

    #[tokio::test]
    async fn test_full_lifecycle_moves_stock() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        fx.stock_up(&fx.branch_id, &fx.product_ids[0], 10).await;

        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 4)).await.unwrap();
        assert_eq!(created.status, TransferStatus::Created);
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 10);

        let sent = transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();
        assert_eq!(sent.status, TransferStatus::Sent);
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 6);

        let received = transfers
            .receive(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id, &receive_all(&fx, 3))
            .await
            .unwrap();
        assert_eq!(received.status, TransferStatus::Received);
        assert_eq!(received.items[0].receive_count, Some(3));
        assert_eq!(fx.on_hand(&fx.other_branch_id, &fx.product_ids[0]).await, 3);

        let movements = fx
            .db
            .stock()
            .movements_for_reference("stock_transfers", &created.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].kind, MovementKind::TransferOut);
        assert_eq!(movements[1].kind, MovementKind::TransferIn);
    }

    #[tokio::test]
    async fn test_receive_before_send_leaves_stock_alone() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();

        let result = transfers
            .receive(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id, &receive_all(&fx, 2))
            .await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::InvalidTransferState { ref status, .. })) if status == "CREATED"
        ));
        assert_eq!(fx.on_hand(&fx.other_branch_id, &fx.product_ids[0]).await, 0);
    }

    #[tokio::test]
    async fn test_receive_twice_is_rejected() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();
        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();
        transfers
            .receive(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id, &receive_all(&fx, 2))
            .await
            .unwrap();

        let again = transfers
            .receive(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id, &receive_all(&fx, 2))
            .await;

        assert!(matches!(
            again,
            Err(DbError::Domain(CoreError::InvalidTransferState { .. }))
        ));
        assert_eq!(fx.on_hand(&fx.other_branch_id, &fx.product_ids[0]).await, 2);
    }

    #[tokio::test]
    async fn test_receive_at_wrong_branch() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();
        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();

        let result = transfers
            .receive(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id, &receive_all(&fx, 2))
            .await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::BranchMismatch { .. }))
        ));
        let still_sent = transfers.get(&fx.store_id, &created.id).await.unwrap().unwrap();
        assert_eq!(still_sent.status, TransferStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_only_from_source_branch() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[0], 5).await;
        let transfers = fx.db.transfers();
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();

        let result = transfers
            .send(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id)
            .await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::BranchMismatch { ref expected, .. })) if *expected == fx.branch_id
        ));
        let still_created = transfers.get(&fx.store_id, &created.id).await.unwrap().unwrap();
        assert_eq!(still_created.status, TransferStatus::Created);
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 5);

        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 3);
    }

    #[tokio::test]
    async fn test_receive_with_foreign_product_rolls_back() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();
        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();

        let stray = vec![ReceiveItemRequest {
            product_id: fx.product_ids[1].clone(),
            receive_count: 1,
        }];
        let result = transfers
            .receive(&fx.store_id, &created.id, &fx.other_branch_id, &fx.staff_id, &stray)
            .await;

        assert!(matches!(result, Err(DbError::Domain(CoreError::Validation(_)))));
        let still_sent = transfers.get(&fx.store_id, &created.id).await.unwrap().unwrap();
        assert_eq!(still_sent.status, TransferStatus::Sent);
    }

    #[tokio::test]
    async fn test_cancel_after_send_restores_source() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        fx.stock_up(&fx.branch_id, &fx.product_ids[0], 5).await;
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 5)).await.unwrap();
        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 0);

        let cancelled = transfers.cancel(&fx.store_id, &created.id, &fx.staff_id).await.unwrap();

        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 5);

        let again = transfers.cancel(&fx.store_id, &created.id, &fx.staff_id).await;
        assert!(matches!(
            again,
            Err(DbError::Domain(CoreError::InvalidTransferState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unsent_touches_nothing() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        fx.stock_up(&fx.branch_id, &fx.product_ids[0], 5).await;
        let created = transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, 2)).await.unwrap();

        transfers.cancel(&fx.store_id, &created.id, &fx.staff_id).await.unwrap();

        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 5);
        let movements = fx
            .db
            .stock()
            .movements_for_reference("stock_transfers", &created.id)
            .await
            .unwrap();
        assert!(movements.is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_from_central_skips_source_deduction() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let request = WithdrawGoodsRequest {
            items: vec![WithdrawItemRequest {
                product_id: fx.product_ids[1].clone(),
                quantity: 12,
            }],
            note: Some("weekly restock".to_string()),
        }
        .into_transfer(&fx.branch_id);

        let created = transfers.create(&fx.store_id, &fx.staff_id, &request).await.unwrap();
        assert!(created.is_from_central());
        transfers.send(&fx.store_id, &created.id, &fx.branch_id, &fx.staff_id).await.unwrap();

        let pending = transfers.pending_for_branch(&fx.store_id, &fx.branch_id).await.unwrap();
        assert_eq!(pending.len(), 1);

        transfers
            .receive(
                &fx.store_id,
                &created.id,
                &fx.branch_id,
                &fx.staff_id,
                &[ReceiveItemRequest {
                    product_id: fx.product_ids[1].clone(),
                    receive_count: 12,
                }],
            )
            .await
            .unwrap();

        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[1]).await, 12);
        assert!(transfers.pending_for_branch(&fx.store_id, &fx.branch_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_product() {
        let fx = fixture().await;
        let mut input = request(&fx, 1);
        input.items[0].product_id = "ghost".to_string();

        let result = fx.db.transfers().create(&fx.store_id, &fx.staff_id, &input).await;

        assert!(matches!(result, Err(DbError::Domain(CoreError::ProductNotFound(_)))));
        let page = fx
            .db
            .transfers()
            .list_for_branch(&fx.store_id, &fx.branch_id, None, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_list_for_branch_pages_newest_first() {
        let fx = fixture().await;
        let transfers = fx.db.transfers();
        let mut ids = Vec::new();
        for n in 1..=3 {
            ids.push(transfers.create(&fx.store_id, &fx.staff_id, &request(&fx, n)).await.unwrap().id);
        }

        let page = transfers
            .list_for_branch(&fx.store_id, &fx.other_branch_id, Some(2), 0)
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.transfers.len(), 2);
        assert_eq!(page.transfers[0].id, ids[2]);
        assert_eq!(page.transfers[0].items.len(), 1);
    }
}
