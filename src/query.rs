//! Filters and field updates over session documents.
//!
//! A [`Filter`] always names one `(id, scope)` key plus a conjunction of
//! predicates; an [`Update`] is an ordered list of `set`/`inc` operations.
//! [`MemoryStore`](crate::MemoryStore) evaluates them directly against
//! [`SessionRecord`]s. The Redis store ships their JSON form to Lua scripts,
//! which is why both types serialize to plain field/op/value objects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::error::StoreError;
use crate::record::{LockToken, PendingAction, SessionKey, SessionRecord};

/// Document fields addressable by filters and updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ExpiresAt,
    LockHeld,
    LockToken,
    LockAcquiredAt,
    TimeoutMinutes,
    Payload,
    PendingAction,
}

/// Wire value of a field. Timestamps travel as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<LockToken> for FieldValue {
    fn from(value: LockToken) -> Self {
        FieldValue::Int(value.0)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Int(value.timestamp_millis())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<PendingAction> for FieldValue {
    fn from(value: PendingAction) -> Self {
        FieldValue::Text(
            match value {
                PendingAction::None => "none",
                PendingAction::Initialize => "initialize",
            }
            .to_string(),
        )
    }
}

impl FieldValue {
    fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: Field,
    pub op: Comparison,
    pub value: FieldValue,
}

/// Key plus conjunction of predicates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub key: SessionKey,
    pub predicates: Vec<Predicate>,
}

impl Filter {
    /// Match the document stored under `key`, whatever its state
    pub fn by_key(key: SessionKey) -> Self {
        Self {
            key,
            predicates: Vec::new(),
        }
    }

    fn with(mut self, field: Field, op: Comparison, value: impl Into<FieldValue>) -> Self {
        self.predicates.push(Predicate {
            field,
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    pub fn lt(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Lt, value)
    }

    pub fn lte(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Lte, value)
    }

    pub fn gt(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Gt, value)
    }

    pub fn gte(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Gte, value)
    }

    /// Whether `record` is the keyed document and satisfies every predicate
    pub fn matches(&self, record: &SessionRecord) -> bool {
        if record.id != self.key.id || record.scope != self.key.scope {
            return false;
        }
        self.predicates.iter().all(|p| {
            read_field(record, p.field)
                .compare(&p.value)
                .is_some_and(|ordering| p.op.holds(ordering))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum UpdateOp {
    Set { field: Field, value: FieldValue },
    Inc { field: Field, by: i64 },
}

/// Ordered field operations applied to one document
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.ops.push(UpdateOp::Set {
            field,
            value: value.into(),
        });
        self
    }

    pub fn inc(mut self, field: Field, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc { field, by });
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Apply every operation in order
    pub fn apply(&self, record: &mut SessionRecord) -> Result<(), StoreError> {
        for op in &self.ops {
            match op {
                UpdateOp::Set { field, value } => write_field(record, *field, value)?,
                UpdateOp::Inc { field, by } => match read_field(record, *field) {
                    FieldValue::Int(current) => {
                        write_field(record, *field, &FieldValue::Int(current + by))?
                    }
                    _ => {
                        return Err(StoreError::Backend(format!(
                            "cannot increment non-numeric field {:?}",
                            field
                        )))
                    }
                },
            }
        }
        Ok(())
    }
}

fn read_field(record: &SessionRecord, field: Field) -> FieldValue {
    match field {
        Field::ExpiresAt => record.expires_at.into(),
        Field::LockHeld => record.lock_held.into(),
        Field::LockToken => record.lock_token.into(),
        Field::LockAcquiredAt => record.lock_acquired_at.into(),
        Field::TimeoutMinutes => record.timeout_minutes.into(),
        Field::Payload => record.payload.clone().into(),
        Field::PendingAction => record.pending_action.into(),
    }
}

fn write_field(
    record: &mut SessionRecord,
    field: Field,
    value: &FieldValue,
) -> Result<(), StoreError> {
    let mismatch = || StoreError::Backend(format!("bad value {:?} for field {:?}", value, field));
    match (field, value) {
        (Field::ExpiresAt, FieldValue::Int(ms)) => {
            record.expires_at = DateTime::from_timestamp_millis(*ms).ok_or_else(mismatch)?
        }
        (Field::LockAcquiredAt, FieldValue::Int(ms)) => {
            record.lock_acquired_at = DateTime::from_timestamp_millis(*ms).ok_or_else(mismatch)?
        }
        (Field::LockHeld, FieldValue::Bool(held)) => record.lock_held = *held,
        (Field::LockToken, FieldValue::Int(token)) => record.lock_token = LockToken(*token),
        (Field::TimeoutMinutes, FieldValue::Int(minutes)) => {
            record.timeout_minutes = u32::try_from(*minutes).map_err(|_| mismatch())?
        }
        (Field::Payload, FieldValue::Text(payload)) => record.payload = payload.clone(),
        (Field::PendingAction, FieldValue::Text(action)) => {
            record.pending_action = match action.as_str() {
                "none" => PendingAction::None,
                "initialize" => PendingAction::Initialize,
                _ => return Err(mismatch()),
            }
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}
