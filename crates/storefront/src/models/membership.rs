//! Membership domain types.

use chrono::{DateTime, Utc};

use thistle_core::{MembershipId, MembershipStatus, UserId};

/// A locally administered membership row.
///
/// Created on first successful grant, updated by billing reconciliation or
/// an administrative toggle. Never hard-deleted, only transitioned to
/// `inactive`.
#[derive(Debug, Clone)]
pub struct Membership {
    pub id: MembershipId,
    pub user_id: UserId,
    pub status: MembershipStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Reference into the external billing system, when known.
    pub billing_customer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Derive the member flag at a point in time.
    ///
    /// A canceled-but-not-yet-expired subscription still counts as a
    /// member; an active one whose period has lapsed does not. The flag is
    /// always derived, never stored.
    #[must_use]
    pub fn is_member_at(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            MembershipStatus::Active | MembershipStatus::Canceled
        ) && now < self.current_period_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn membership(status: MembershipStatus, period_end: DateTime<Utc>) -> Membership {
        let now = Utc::now();
        Membership {
            id: MembershipId::new(1),
            user_id: UserId::new(1),
            status,
            current_period_start: now - Duration::days(30),
            current_period_end: period_end,
            billing_customer_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_canceled_but_unexpired_is_member() {
        let now = Utc::now();
        let m = membership(MembershipStatus::Canceled, now + Duration::days(1));
        assert!(m.is_member_at(now));
    }

    #[test]
    fn test_active_but_expired_is_not_member() {
        let now = Utc::now();
        let m = membership(MembershipStatus::Active, now - Duration::seconds(1));
        assert!(!m.is_member_at(now));
    }

    #[test]
    fn test_inactive_is_never_member() {
        let now = Utc::now();
        let m = membership(MembershipStatus::Inactive, now + Duration::days(365));
        assert!(!m.is_member_at(now));
    }
}
