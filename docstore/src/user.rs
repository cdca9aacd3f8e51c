use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{RecordRoot, RecordValue, UPDATED_AT_FIELD, UPDATED_BY_FIELD};
use crate::StoreUserError;

/// Identity stamped on mutations performed without a user while
/// authorization is disabled.
pub const ANONYMOUS_USER: &str = "$ANONYMOUS_USER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// The roles container. A user without the container (as opposed to a
    /// user with no assigned roles) is rejected by authorization checks.
    pub roles: Option<Vec<String>>,
}

impl User {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            roles: Some(roles.into_iter().map(Into::into).collect()),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles
            .as_ref()
            .map_or(false, |roles| roles.iter().any(|r| r == role))
    }
}

/// Validates that a user is present and carries a roles container.
pub(crate) fn check_user(user: Option<&User>) -> std::result::Result<&User, StoreUserError> {
    let user = user.ok_or(StoreUserError::UserNotFound)?;
    if user.roles.is_none() {
        return Err(StoreUserError::NoPermissionFound);
    }
    Ok(user)
}

pub(crate) fn user_id(user: Option<&User>) -> String {
    user.map_or_else(|| ANONYMOUS_USER.to_string(), |user| user.id.clone())
}

/// Time source for audit stamps. Injected so the pipeline stays
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Metadata attached to every authorized mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl AuditStamp {
    /// Merges the stamp into a record as `updatedBy`/`updatedAt` fields.
    pub fn apply(&self, record: &mut RecordRoot) {
        record.insert(
            UPDATED_BY_FIELD.to_string(),
            RecordValue::String(self.updated_by.clone()),
        );
        record.insert(
            UPDATED_AT_FIELD.to_string(),
            RecordValue::Number(self.updated_at.timestamp_millis() as f64),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_check_user_absent() {
        assert_eq!(check_user(None), Err(StoreUserError::UserNotFound));
    }

    #[test]
    fn test_check_user_missing_roles_container() {
        let user = User {
            id: "u1".to_string(),
            roles: None,
        };
        assert_eq!(
            check_user(Some(&user)),
            Err(StoreUserError::NoPermissionFound)
        );
    }

    #[test]
    fn test_check_user_empty_roles_is_present() {
        let user = User::new("u1", Vec::<String>::new());
        assert!(check_user(Some(&user)).is_ok());
    }

    #[test]
    fn test_user_id_anonymous_fallback() {
        assert_eq!(user_id(None), ANONYMOUS_USER);
        assert_eq!(user_id(Some(&User::new("u1", ["reader"]))), "u1");
    }

    #[test]
    fn test_audit_stamp_apply() {
        let stamp = AuditStamp {
            updated_by: "u1".to_string(),
            updated_at: Utc.timestamp_millis_opt(1_500_000_000_000).unwrap(),
        };

        let mut record = RecordRoot::new();
        stamp.apply(&mut record);

        assert_eq!(
            record.get(UPDATED_BY_FIELD),
            Some(&RecordValue::String("u1".to_string()))
        );
        assert_eq!(
            record.get(UPDATED_AT_FIELD),
            Some(&RecordValue::Number(1_500_000_000_000.0))
        );
    }
}
