//! # Transfer Commands
//!
//! ## Who Does What
//! ```text
//!   create_transfer   any branch (from defaults to the session branch)
//!   withdraw_goods    requesting branch (from = central warehouse)
//!   send_transfer     source branch only (any branch for central) ─► else PRECONDITION_FAILED
//!   receive_transfer  destination branch only ─► else PRECONDITION_FAILED
//!   cancel_transfer   any staff, before RECEIVED
//! ```

use katom_core::transfer::{
    clamp_page_size, CreateTransferRequest, ReceiveItemRequest, TransferPage, WithdrawGoodsRequest,
};
use katom_core::{CoreError, StockTransfer};
use tracing::debug;

use crate::error::ApiResult;
use crate::session::SessionContext;
use crate::AppState;

/// Requests a transfer between branches. Stock does not move until sent.
pub async fn create_transfer(
    app: &AppState,
    session: &SessionContext,
    mut request: CreateTransferRequest,
) -> ApiResult<StockTransfer> {
    let staff_id = session.require_staff()?;
    if request.from_branch_id.is_none() {
        request.from_branch_id = Some(session.require_branch()?.to_string());
    }
    debug!(from = ?request.from_branch_id, to = %request.to_branch_id, "create_transfer command");

    Ok(app
        .db()
        .transfers()
        .create(&session.store_id, staff_id, &request)
        .await?)
}

/// Requests goods from the central warehouse into the session branch.
pub async fn withdraw_goods(
    app: &AppState,
    session: &SessionContext,
    request: WithdrawGoodsRequest,
) -> ApiResult<StockTransfer> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    debug!(branch_id = %branch_id, lines = request.items.len(), "withdraw_goods command");

    let request = request.into_transfer(branch_id);
    Ok(app
        .db()
        .transfers()
        .create(&session.store_id, staff_id, &request)
        .await?)
}

/// Ships the goods, taking them off the session branch's stock.
pub async fn send_transfer(
    app: &AppState,
    session: &SessionContext,
    transfer_id: &str,
) -> ApiResult<StockTransfer> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    Ok(app
        .db()
        .transfers()
        .send(&session.store_id, transfer_id, branch_id, staff_id)
        .await?)
}

/// Books the counted goods into the session branch.
///
/// Products not listed in `items` are received as 0.
pub async fn receive_transfer(
    app: &AppState,
    session: &SessionContext,
    transfer_id: &str,
    items: &[ReceiveItemRequest],
) -> ApiResult<StockTransfer> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    Ok(app
        .db()
        .transfers()
        .receive(&session.store_id, transfer_id, branch_id, staff_id, items)
        .await?)
}

pub async fn cancel_transfer(
    app: &AppState,
    session: &SessionContext,
    transfer_id: &str,
) -> ApiResult<StockTransfer> {
    let staff_id = session.require_staff()?;
    Ok(app
        .db()
        .transfers()
        .cancel(&session.store_id, transfer_id, staff_id)
        .await?)
}

pub async fn get_transfer(
    app: &AppState,
    session: &SessionContext,
    transfer_id: &str,
) -> ApiResult<StockTransfer> {
    app.db()
        .transfers()
        .get(&session.store_id, transfer_id)
        .await?
        .ok_or_else(|| CoreError::TransferNotFound(transfer_id.to_string()).into())
}

/// Transfers leaving or entering the session branch, newest first.
pub async fn list_transfers(
    app: &AppState,
    session: &SessionContext,
    limit: Option<i64>,
    offset: i64,
) -> ApiResult<TransferPage> {
    let branch_id = session.require_branch()?;
    let settings = &app.config().transfers;
    let limit = clamp_page_size(limit, settings.default_page_size, settings.max_page_size);

    Ok(app
        .db()
        .transfers()
        .list_for_branch(&session.store_id, branch_id, Some(limit), offset)
        .await?)
}

/// Sent transfers waiting to be received at the session branch.
pub async fn pending_transfers(
    app: &AppState,
    session: &SessionContext,
) -> ApiResult<Vec<StockTransfer>> {
    let branch_id = session.require_branch()?;
    Ok(app
        .db()
        .transfers()
        .pending_for_branch(&session.store_id, branch_id)
        .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PosConfig;
    use crate::error::ErrorCode;
    use crate::testing::{fixture, fixture_with, Fixture};
    use katom_core::transfer::{TransferItemRequest, WithdrawItemRequest};
    use katom_core::TransferStatus;

    /// Main → Riverside, 4 of product 0 and 2 of product 1.
    fn to_riverside(fx: &Fixture) -> CreateTransferRequest {
        CreateTransferRequest {
            from_branch_id: None,
            to_branch_id: fx.other_branch_id.clone(),
            note: Some("weekend top-up".into()),
            items: vec![
                TransferItemRequest {
                    product_id: fx.product_ids[0].clone(),
                    send_count: 4,
                },
                TransferItemRequest {
                    product_id: fx.product_ids[1].clone(),
                    send_count: 2,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_from_branch_defaults_to_session() {
        let fx = fixture().await;
        let transfer = create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
            .await
            .unwrap();

        assert_eq!(transfer.from_branch_id.as_deref(), Some(fx.branch_id.as_str()));
        assert_eq!(transfer.status, TransferStatus::Created);
        assert_eq!(transfer.items.len(), 2);
    }

    #[tokio::test]
    async fn test_full_lifecycle_moves_stock() {
        let fx = fixture().await;
        fx.stock_up(0, 10).await;
        fx.stock_up(1, 10).await;

        let transfer = create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
            .await
            .unwrap();
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 10);

        send_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 6);
        assert_eq!(fx.on_hand(&fx.branch_id, 1).await, 8);

        let pending = pending_transfers(&fx.app, &fx.other_session()).await.unwrap();
        assert_eq!(pending.len(), 1);

        let counted = [ReceiveItemRequest {
            product_id: fx.product_ids[0].clone(),
            receive_count: 3,
        }];
        let received = receive_transfer(&fx.app, &fx.other_session(), &transfer.id, &counted)
            .await
            .unwrap();

        assert_eq!(received.status, TransferStatus::Received);
        assert_eq!(fx.on_hand(&fx.other_branch_id, 0).await, 3);
        assert_eq!(fx.on_hand(&fx.other_branch_id, 1).await, 0);
        assert!(pending_transfers(&fx.app, &fx.other_session())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_receive_only_at_destination_and_only_when_sent() {
        let fx = fixture().await;
        fx.stock_up(0, 10).await;
        let transfer = create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
            .await
            .unwrap();

        let err = receive_transfer(&fx.app, &fx.other_session(), &transfer.id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);

        send_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();

        let err = receive_transfer(&fx.app, &fx.session(), &transfer.id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
        assert_eq!(fx.on_hand(&fx.other_branch_id, 0).await, 0);

        receive_transfer(&fx.app, &fx.other_session(), &transfer.id, &[])
            .await
            .unwrap();
        let err = receive_transfer(&fx.app, &fx.other_session(), &transfer.id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_send_only_from_source_branch() {
        let fx = fixture().await;
        fx.stock_up(0, 10).await;
        fx.stock_up(1, 10).await;
        let transfer = create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
            .await
            .unwrap();

        let err = send_transfer(&fx.app, &fx.other_session(), &transfer.id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 10);
        let unsent = get_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();
        assert_eq!(unsent.status, TransferStatus::Created);

        let sent = send_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();
        assert_eq!(sent.status, TransferStatus::Sent);
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 6);
    }

    #[tokio::test]
    async fn test_cancel_after_send_restores_source() {
        let fx = fixture().await;
        fx.stock_up(0, 10).await;
        fx.stock_up(1, 10).await;
        let transfer = create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
            .await
            .unwrap();
        send_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();

        let cancelled = cancel_transfer(&fx.app, &fx.session(), &transfer.id)
            .await
            .unwrap();

        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 10);
        assert_eq!(fx.on_hand(&fx.branch_id, 1).await, 10);

        let err = send_transfer(&fx.app, &fx.session(), &transfer.id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_withdraw_goods_comes_from_central() {
        let fx = fixture().await;
        let request = WithdrawGoodsRequest {
            items: vec![WithdrawItemRequest {
                product_id: fx.product_ids[2].clone(),
                quantity: 12,
            }],
            note: None,
        };

        let transfer = withdraw_goods(&fx.app, &fx.session(), request).await.unwrap();
        assert!(transfer.is_from_central());
        assert_eq!(transfer.to_branch_id, fx.branch_id);

        send_transfer(&fx.app, &fx.session(), &transfer.id).await.unwrap();
        let counted = [ReceiveItemRequest {
            product_id: fx.product_ids[2].clone(),
            receive_count: 12,
        }];
        receive_transfer(&fx.app, &fx.session(), &transfer.id, &counted)
            .await
            .unwrap();

        assert_eq!(fx.on_hand(&fx.branch_id, 2).await, 12);
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let mut config = PosConfig::default();
        config.transfers.default_page_size = 2;
        let fx = fixture_with(config).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                create_transfer(&fx.app, &fx.session(), to_riverside(&fx))
                    .await
                    .unwrap()
                    .id,
            );
        }

        let page = list_transfers(&fx.app, &fx.other_session(), None, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.transfers.len(), 2);
        assert_eq!(page.transfers[0].id, ids[2]);

        let rest = list_transfers(&fx.app, &fx.session(), Some(10), 2).await.unwrap();
        assert_eq!(rest.transfers.len(), 1);

        let found = get_transfer(&fx.app, &fx.session(), &ids[0]).await.unwrap();
        assert_eq!(found.items.len(), 2);

        let err = get_transfer(&fx.app, &fx.session(), "missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_product() {
        let fx = fixture().await;
        let mut request = to_riverside(&fx);
        request.items[1].product_id = "ghost".into();

        let err = create_transfer(&fx.app, &fx.session(), request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let page = list_transfers(&fx.app, &fx.session(), None, 0).await.unwrap();
        assert_eq!(page.total, 0);
    }
}
