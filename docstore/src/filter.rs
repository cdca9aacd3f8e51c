use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::permission::Operation;
use crate::record::{compare_values, find_path, RecordRoot, RecordValue, PERMISSION_REQUIRED_FIELD};
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Eq(RecordValue),
    In(Vec<RecordValue>),
    /// For array fields: true when any element is in the given set. For
    /// scalar fields this degrades to set membership.
    ContainsAny(Vec<RecordValue>),
    Exists(bool),
    Gt(RecordValue),
    Gte(RecordValue),
    Lt(RecordValue),
    Lte(RecordValue),
}

impl Condition {
    fn matches(&self, value: Option<&RecordValue>) -> bool {
        if let Condition::Exists(want) = self {
            return value.is_some() == *want;
        }

        let Some(value) = value else {
            return false;
        };

        match self {
            Condition::Exists(_) => unreachable!("handled above"),
            Condition::Eq(want) => value == want,
            Condition::In(set) => set.contains(value),
            Condition::ContainsAny(set) => match value {
                RecordValue::Array(items) => items.iter().any(|item| set.contains(item)),
                scalar => set.contains(scalar),
            },
            Condition::Gt(bound) => compare_values(value, bound) == Some(Ordering::Greater),
            Condition::Gte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Lt(bound) => compare_values(value, bound) == Some(Ordering::Less),
            Condition::Lte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Query filter. Field conditions and `and` branches must all hold; when
/// `or` branches are present at least one must hold as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub conditions: HashMap<String, Condition>,
    #[serde(default)]
    pub or: Vec<Filter>,
    #[serde(default)]
    pub and: Vec<Filter>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(path.into(), condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.or.is_empty() && self.and.is_empty()
    }

    pub fn matches(&self, record: &RecordRoot) -> bool {
        self.conditions
            .iter()
            .all(|(path, condition)| condition.matches(find_path(record, path)))
            && self.and.iter().all(|filter| filter.matches(record))
            && (self.or.is_empty() || self.or.iter().any(|filter| filter.matches(record)))
    }

    /// Returns a copy of this filter augmented with the role-based
    /// visibility clause: a record is listable when it has no permission
    /// override, when the override has no entry for the operation, or when
    /// the override's roles intersect the caller's roles.
    ///
    /// A filter that already carries a top-level OR is nested under an AND
    /// instead of merging branches; the caller's filter value is never
    /// mutated.
    pub(crate) fn with_role_visibility(&self, user: Option<&User>, op: Operation) -> Filter {
        let roles: Vec<RecordValue> = user
            .and_then(|user| user.roles.clone())
            .unwrap_or_default()
            .into_iter()
            .map(RecordValue::String)
            .collect();

        let op_path = format!("{PERMISSION_REQUIRED_FIELD}.{}", op.name());
        let visibility = vec![
            Filter::new().field(PERMISSION_REQUIRED_FIELD, Condition::Exists(false)),
            Filter::new().field(&op_path, Condition::Exists(false)),
            Filter::new().field(&op_path, Condition::ContainsAny(roles)),
        ];

        if self.or.is_empty() {
            let mut filter = self.clone();
            filter.or = visibility;
            filter
        } else {
            Filter {
                and: vec![
                    Filter {
                        or: visibility,
                        ..Filter::default()
                    },
                    self.clone(),
                ],
                ..Filter::default()
            }
        }
    }
}
