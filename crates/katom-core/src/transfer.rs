//! # Stock Transfers
//!
//! The inter-branch transfer state machine and its request types.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   CREATED ──send──► SENT ──receive──► RECEIVED (terminal)              │
//! │      │               │                                                  │
//! │      └──cancel──┐ ┌──cancel                                             │
//! │                 ▼ ▼                                                     │
//! │              CANCELLED (terminal)                                       │
//! │                                                                         │
//! │  Ledger effects:                                                        │
//! │   send      source      −send_count     TRANSFER_OUT  (skipped for     │
//! │                                                       central source)  │
//! │   receive   destination +receive_count  TRANSFER_IN                    │
//! │   cancel    source      +send_count     TRANSFER_IN   (only if SENT)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::{
    validate_line_count, validate_non_negative, validate_note, validate_positive,
    validate_required, validate_unique,
};
use crate::MAX_CART_ITEMS;

/// Default page size for transfer listings.
pub const DEFAULT_TRANSFER_PAGE_SIZE: i64 = 20;

/// Largest page a caller may request.
pub const MAX_TRANSFER_PAGE_SIZE: i64 = 100;

// =============================================================================
// Transfer Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Created,
    Sent,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Created => "CREATED",
            TransferStatus::Sent => "SENT",
            TransferStatus::Received => "RECEIVED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Created, Sent) | (Created, Cancelled) | (Sent, Cancelled) | (Sent, Received)
        )
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Received | TransferStatus::Cancelled)
    }

    /// States from which `next` can be reached.
    pub fn sources_of(next: TransferStatus) -> Vec<TransferStatus> {
        [
            TransferStatus::Created,
            TransferStatus::Sent,
            TransferStatus::Received,
            TransferStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }

    /// Checks a transition, naming the operation in the error.
    pub fn ensure_transition(
        &self,
        transfer_id: &str,
        next: TransferStatus,
        operation: &str,
    ) -> CoreResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransferState {
                transfer_id: transfer_id.to_string(),
                status: self.as_str().to_string(),
                operation: operation.to_string(),
            })
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A request to move goods between branches.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransfer {
    pub id: String,
    pub store_id: String,
    /// `None` = central warehouse.
    pub from_branch_id: Option<String>,
    pub to_branch_id: String,
    pub status: TransferStatus,
    pub note: Option<String>,
    pub requested_by: String,
    pub sent_by: Option<String>,
    pub received_by: Option<String>,
    pub cancelled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<TransferItem>,
}

impl StockTransfer {
    /// True when the goods come from the central warehouse.
    #[inline]
    pub fn is_from_central(&self) -> bool {
        self.from_branch_id.is_none()
    }

    /// True when the transfer leaves or enters `branch_id`.
    pub fn touches(&self, branch_id: &str) -> bool {
        self.to_branch_id == branch_id || self.from_branch_id.as_deref() == Some(branch_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct TransferItem {
    pub id: String,
    pub transfer_id: String,
    pub product_id: String,
    pub send_count: i64,
    /// NULL until received.
    pub receive_count: Option<i64>,
}

/// A page of transfers.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferPage {
    pub transfers: Vec<StockTransfer>,
    pub total: i64,
}

/// Clamps a requested page size to `1..=max`, using `default` when absent or non-positive.
pub fn clamp_page_size(requested: Option<i64>, default: i64, max: i64) -> i64 {
    match requested {
        Some(limit) if limit > 0 => limit.min(max),
        _ => default.clamp(1, max),
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferItemRequest {
    pub product_id: String,
    pub send_count: i64,
}

/// Input for a branch-to-branch transfer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateTransferRequest {
    /// Defaults to the session branch.
    pub from_branch_id: Option<String>,
    pub to_branch_id: String,
    pub note: Option<String>,
    pub items: Vec<TransferItemRequest>,
}

impl CreateTransferRequest {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("to_branch_id", &self.to_branch_id)?;
        if let Some(note) = &self.note {
            validate_note("note", note)?;
        }
        validate_items(&self.items)?;

        if self.from_branch_id.as_deref() == Some(self.to_branch_id.as_str()) {
            return Err(ValidationError::InvalidFormat {
                field: "to_branch_id".to_string(),
                reason: "must differ from from_branch_id".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn validate_items(items: &[TransferItemRequest]) -> CoreResult<()> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        }
        .into());
    }
    validate_line_count("items", items.len(), MAX_CART_ITEMS)?;
    for item in items {
        validate_required("product_id", &item.product_id)?;
        validate_positive("send_count", item.send_count)?;
    }
    validate_unique("product_id", items.iter().map(|i| i.product_id.as_str()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WithdrawItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

/// Input for requesting goods from the central warehouse.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WithdrawGoodsRequest {
    pub items: Vec<WithdrawItemRequest>,
    pub note: Option<String>,
}

impl WithdrawGoodsRequest {
    /// Converts into a central → `to_branch_id` transfer request.
    pub fn into_transfer(self, to_branch_id: impl Into<String>) -> CreateTransferRequest {
        CreateTransferRequest {
            from_branch_id: None,
            to_branch_id: to_branch_id.into(),
            note: self.note,
            items: self
                .items
                .into_iter()
                .map(|i| TransferItemRequest {
                    product_id: i.product_id,
                    send_count: i.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiveItemRequest {
    pub product_id: String,
    pub receive_count: i64,
}

/// One transfer line with the quantity to book in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub item_id: String,
    pub product_id: String,
    pub receive_count: i64,
}

/// Matches the submitted counts to the transfer's items.
///
/// ## Rules
/// - At least one line submitted
/// - Counts ≥ 0, no product listed twice
/// - Every submitted product belongs to the transfer
/// - Items not submitted receive 0
pub fn plan_receipt(
    transfer_id: &str,
    items: &[TransferItem],
    received: &[ReceiveItemRequest],
) -> CoreResult<Vec<ReceiptLine>> {
    if received.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        }
        .into());
    }
    for line in received {
        validate_non_negative("receive_count", line.receive_count)?;
    }
    validate_unique("product_id", received.iter().map(|r| r.product_id.as_str()))?;

    let mut counts: HashMap<&str, i64> = received
        .iter()
        .map(|r| (r.product_id.as_str(), r.receive_count))
        .collect();

    let plan: Vec<ReceiptLine> = items
        .iter()
        .map(|item| ReceiptLine {
            item_id: item.id.clone(),
            product_id: item.product_id.clone(),
            receive_count: counts.remove(item.product_id.as_str()).unwrap_or(0),
        })
        .collect();

    if let Some(stray) = counts.keys().next() {
        return Err(ValidationError::NotInSet {
            field: "product_id".to_string(),
            value: stray.to_string(),
            parent: format!("transfer {transfer_id}"),
        }
        .into());
    }

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use TransferStatus::*;

    fn item(id: &str, product: &str, send: i64) -> TransferItem {
        TransferItem {
            id: id.to_string(),
            transfer_id: "t".to_string(),
            product_id: product.to_string(),
            send_count: send,
            receive_count: None,
        }
    }

    fn receive(product: &str, count: i64) -> ReceiveItemRequest {
        ReceiveItemRequest {
            product_id: product.to_string(),
            receive_count: count,
        }
    }

    #[test]
    fn test_transitions() {
        assert!(Created.can_transition_to(Sent));
        assert!(Created.can_transition_to(Cancelled));
        assert!(Sent.can_transition_to(Received));
        assert!(Sent.can_transition_to(Cancelled));

        assert!(!Created.can_transition_to(Received));
        assert!(!Received.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Sent));
        assert!(!Sent.can_transition_to(Sent));
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for terminal in [Received, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Created, Sent, Received, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_sources_of() {
        assert_eq!(TransferStatus::sources_of(Cancelled), vec![Created, Sent]);
        assert_eq!(TransferStatus::sources_of(Received), vec![Sent]);
        assert!(TransferStatus::sources_of(Created).is_empty());
    }

    #[test]
    fn test_ensure_transition_error() {
        let err = Created.ensure_transition("t-1", Received, "receive").unwrap_err();
        assert_eq!(err.to_string(), "Transfer t-1 is CREATED, cannot receive");
    }

    #[test]
    fn test_plan_receipt_unlisted_items_get_zero() {
        let items = [item("i1", "a", 5), item("i2", "b", 3)];
        let plan = plan_receipt("t", &items, &[receive("a", 4)]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].receive_count, 4);
        assert_eq!(plan[1].receive_count, 0);
    }

    #[test]
    fn test_plan_receipt_rejects_foreign_product() {
        let items = [item("i1", "a", 5)];
        let err = plan_receipt("t", &items, &[receive("a", 1), receive("z", 1)]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::NotInSet { .. })
        ));
    }

    #[test]
    fn test_plan_receipt_rejects_bad_input() {
        let items = [item("i1", "a", 5)];
        assert!(plan_receipt("t", &items, &[]).is_err());
        assert!(plan_receipt("t", &items, &[receive("a", -1)]).is_err());
        assert!(plan_receipt("t", &items, &[receive("a", 1), receive("a", 2)]).is_err());
    }

    #[test]
    fn test_create_request_validation() {
        let valid = CreateTransferRequest {
            from_branch_id: Some("b1".into()),
            to_branch_id: "b2".into(),
            note: None,
            items: vec![TransferItemRequest {
                product_id: "a".into(),
                send_count: 1,
            }],
        };
        assert!(valid.validate().is_ok());

        let same_branch = CreateTransferRequest {
            to_branch_id: "b1".into(),
            ..valid.clone()
        };
        assert!(same_branch.validate().is_err());

        let zero_count = CreateTransferRequest {
            items: vec![TransferItemRequest {
                product_id: "a".into(),
                send_count: 0,
            }],
            ..valid.clone()
        };
        assert!(zero_count.validate().is_err());

        let empty = CreateTransferRequest {
            items: vec![],
            ..valid
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_withdraw_into_transfer() {
        let req = WithdrawGoodsRequest {
            items: vec![WithdrawItemRequest {
                product_id: "a".into(),
                quantity: 7,
            }],
            note: Some("weekly".into()),
        };
        let transfer = req.into_transfer("b1");
        assert!(transfer.from_branch_id.is_none());
        assert_eq!(transfer.to_branch_id, "b1");
        assert_eq!(transfer.items[0].send_count, 7);
    }

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(None, 20, 100), 20);
        assert_eq!(clamp_page_size(Some(0), 20, 100), 20);
        assert_eq!(clamp_page_size(Some(-5), 20, 100), 20);
        assert_eq!(clamp_page_size(Some(500), 20, 100), 100);
        assert_eq!(clamp_page_size(Some(7), 20, 100), 7);
    }
}
