use serde::Serialize;

use crate::db::models::User;

/// Machine-readable rejection detail, rendered into the 403 `details` block
/// so the client can drive its "top up" flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExceeded {
    pub required: i64,
    /// True signed headroom; negative when the account is already over its
    /// limit. Messaging-wise a negative value behaves like zero.
    pub available: i64,
    pub plan_type: String,
    pub messages_used: i32,
    pub messages_limit: i32,
    pub suggestion: String,
}

/// Checks the user's remaining message allowance against the contact count.
/// Must run before any campaign or job row is created.
pub fn check_quota(user: &User, contacts_to_send: i64) -> Result<(), QuotaExceeded> {
    let available = i64::from(user.messages_limit) - i64::from(user.messages_used);
    if contacts_to_send <= available.max(0) {
        return Ok(());
    }
    Err(QuotaExceeded {
        required: contacts_to_send,
        available,
        plan_type: user.plan_type.clone(),
        messages_used: user.messages_used,
        messages_limit: user.messages_limit,
        suggestion: "Actualiza tu plan o espera al próximo ciclo de facturación".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(used: i32, limit: i32) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Prueba".to_string(),
            email: "prueba@example.com".to_string(),
            plan_type: "standard".to_string(),
            messages_used: used,
            messages_limit: limit,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_exactly_remaining_allowance() {
        assert!(check_quota(&user(95, 100), 5).is_ok());
    }

    #[test]
    fn rejects_one_over_allowance() {
        let err = check_quota(&user(95, 100), 6).unwrap_err();
        assert_eq!(err.available, 5);
        assert_eq!(err.required, 6);
    }

    #[test]
    fn overdrawn_account_reports_signed_headroom() {
        let err = check_quota(&user(110, 100), 1).unwrap_err();
        assert_eq!(err.available, -10);
        assert_eq!(err.required, 1);
    }

    #[test]
    fn zero_contacts_always_fit() {
        assert!(check_quota(&user(110, 100), 0).is_ok());
    }
}
