use std::collections::HashMap;

use crate::record::{RecordRoot, RecordValue, PERMISSION_REQUIRED_FIELD};
use crate::user::User;

/// Operation codes gated by the permission model. `Write` covers create,
/// update and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read = 0,
    Write = 1,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

/// Collection-level mapping from operation to the roles sufficient to
/// perform it. Registered at `mkcoll` time, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PermissionMap(HashMap<Operation, Vec<String>>);

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(
        mut self,
        op: Operation,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.0.insert(op, roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn roles(&self, op: Operation) -> Option<&[String]> {
        self.0.get(&op).map(Vec::as_slice)
    }

    /// True when the operation is mapped and the user holds one of the
    /// mapped roles.
    pub fn allows(&self, op: Operation, user: &User) -> bool {
        match self.roles(op) {
            Some(roles) => roles.iter().any(|role| user.has_role(role)),
            None => false,
        }
    }
}

/// Extracts the per-record override roles for an operation from the
/// reserved `_permissionRequired` field. Malformed override data (wrong
/// value shape, non-string roles) is treated as absence of an override.
pub fn record_override(record: &RecordRoot, op: Operation) -> Option<Vec<&str>> {
    let RecordValue::Map(override_map) = record.get(PERMISSION_REQUIRED_FIELD)? else {
        return None;
    };

    let RecordValue::Array(roles) = override_map.get(op.name())? else {
        return None;
    };

    Some(
        roles
            .iter()
            .filter_map(|role| match role {
                RecordValue::String(role) => Some(role.as_str()),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::json_to_record;

    #[test]
    fn test_permission_map_allows() {
        let map = PermissionMap::new()
            .allow(Operation::Read, ["reader", "admin"])
            .allow(Operation::Write, ["admin"]);

        let reader = User::new("u1", ["reader"]);
        let admin = User::new("u2", ["admin"]);
        let outsider = User::new("u3", ["guest"]);

        assert!(map.allows(Operation::Read, &reader));
        assert!(!map.allows(Operation::Write, &reader));
        assert!(map.allows(Operation::Write, &admin));
        assert!(!map.allows(Operation::Read, &outsider));
    }

    #[test]
    fn test_unmapped_operation_denies() {
        let map = PermissionMap::new().allow(Operation::Read, ["reader"]);
        let reader = User::new("u1", ["reader"]);
        assert!(!map.allows(Operation::Write, &reader));
    }

    #[test]
    fn test_record_override_extraction() {
        let record = json_to_record(serde_json::json!({
            "id": "rec1",
            "_permissionRequired": { "write": ["editor"] },
        }))
        .unwrap();

        assert_eq!(
            record_override(&record, Operation::Write),
            Some(vec!["editor"])
        );
        assert_eq!(record_override(&record, Operation::Read), None);
    }

    #[test]
    fn test_record_override_malformed_is_absent() {
        // Override value is not a map.
        let record = json_to_record(serde_json::json!({
            "_permissionRequired": "editor",
        }))
        .unwrap();
        assert_eq!(record_override(&record, Operation::Write), None);

        // Operation entry is not an array.
        let record = json_to_record(serde_json::json!({
            "_permissionRequired": { "write": "editor" },
        }))
        .unwrap();
        assert_eq!(record_override(&record, Operation::Write), None);

        // Non-string roles are skipped.
        let record = json_to_record(serde_json::json!({
            "_permissionRequired": { "write": [1.0, "editor"] },
        }))
        .unwrap();
        assert_eq!(
            record_override(&record, Operation::Write),
            Some(vec!["editor"])
        );
    }
}
