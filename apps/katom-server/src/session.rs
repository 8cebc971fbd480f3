//! # Session Context
//!
//! Who is calling. Identity is resolved upstream; commands only read it.

use katom_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The caller's tenant, branch and staff member.
///
/// `branch_id` is unset until the terminal picks a branch. `staff_id` is
/// unset until a staff member has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionContext {
    pub store_id: String,
    pub branch_id: Option<String>,
    pub staff_id: Option<String>,
}

impl SessionContext {
    pub fn new(store_id: impl Into<String>) -> Self {
        SessionContext {
            store_id: store_id.into(),
            branch_id: None,
            staff_id: None,
        }
    }

    pub fn branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn staff(mut self, staff_id: impl Into<String>) -> Self {
        self.staff_id = Some(staff_id.into());
        self
    }

    /// ## Errors
    /// `BranchNotSelected` when no branch is set.
    pub fn require_branch(&self) -> CoreResult<&str> {
        self.branch_id.as_deref().ok_or(CoreError::BranchNotSelected)
    }

    /// ## Errors
    /// `StaffNotIdentified` when no staff member is set.
    pub fn require_staff(&self) -> CoreResult<&str> {
        self.staff_id.as_deref().ok_or(CoreError::StaffNotIdentified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements() {
        let session = SessionContext::new("s-1");
        assert!(matches!(
            session.require_branch(),
            Err(CoreError::BranchNotSelected)
        ));
        assert!(matches!(
            session.require_staff(),
            Err(CoreError::StaffNotIdentified)
        ));

        let session = session.branch("b-1").staff("staff-1");
        assert_eq!(session.require_branch().unwrap(), "b-1");
        assert_eq!(session.require_staff().unwrap(), "staff-1");
    }
}
