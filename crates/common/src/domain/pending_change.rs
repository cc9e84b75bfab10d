use crate::domain::{Document, DomainError, DomainResult};
use crate::validation::validated;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Serialize;
use serde_json::Value;

/// Smallest sensing interval a device accepts, in milliseconds
pub const MIN_SENSING_INTERVAL_MS: i64 = 120_000;

const DEFAULT_INTERVAL_COMPENSATION_MS: i64 = 0;
const DEFAULT_READINGS_TO_COLLATE: i64 = 1;

// Field names of the persisted change log document
const FIELD_SENSING_INTERVAL: &str = "a";
const FIELD_INTERVAL_COMPENSATION: &str = "b";
const FIELD_READINGS_TO_COLLATE: &str = "c";
const FIELD_PRESERIALIZED_INPUT: &str = "input";
const FIELD_APPLIED_AT: &str = "appliedAt";

/// A validated sampling configuration waiting to be delivered to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntervalChange {
    #[garde(range(min = MIN_SENSING_INTERVAL_MS))]
    pub sensing_interval_ms: i64,

    #[garde(range(min = 0))]
    pub interval_compensation_ms: i64,

    #[garde(range(min = 1))]
    pub readings_to_collate: i64,
}

impl PendingIntervalChange {
    /// Build a change from a change log document.
    ///
    /// Accepts either `{a, b?, c?}` or `{input: "[a,b,c]"}`. `a` is required,
    /// `b` defaults to 0 and `c` to 1. Any present value must be an integer.
    pub fn from_document(document: &Document) -> DomainResult<Self> {
        let (a, b, c) = match document.get(FIELD_PRESERIALIZED_INPUT) {
            Some(input) => parse_preserialized_input(input)?,
            None => (
                integer_field(document, FIELD_SENSING_INTERVAL)?,
                integer_field(document, FIELD_INTERVAL_COMPENSATION)?,
                integer_field(document, FIELD_READINGS_TO_COLLATE)?,
            ),
        };

        let sensing_interval_ms = a.ok_or_else(|| {
            DomainError::ValidationError(format!("{}: field is required", FIELD_SENSING_INTERVAL))
        })?;

        validated(Self {
            sensing_interval_ms,
            interval_compensation_ms: b.unwrap_or(DEFAULT_INTERVAL_COMPENSATION_MS),
            readings_to_collate: c.unwrap_or(DEFAULT_READINGS_TO_COLLATE),
        })
    }

    /// Argument string for the device's interval adjustment function: `[a,b,c]`
    pub fn to_argument(&self) -> String {
        format!(
            "[{},{},{}]",
            self.sensing_interval_ms, self.interval_compensation_ms, self.readings_to_collate
        )
    }

    /// Record of this change as applied to a device
    pub fn to_applied_document(&self, applied_at: DateTime<Utc>) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_SENSING_INTERVAL.to_string(), self.sensing_interval_ms.into());
        doc.insert(
            FIELD_INTERVAL_COMPENSATION.to_string(),
            self.interval_compensation_ms.into(),
        );
        doc.insert(
            FIELD_READINGS_TO_COLLATE.to_string(),
            self.readings_to_collate.into(),
        );
        doc.insert(
            FIELD_APPLIED_AT.to_string(),
            Value::String(applied_at.to_rfc3339()),
        );
        doc
    }
}

type RawFields = (Option<i64>, Option<i64>, Option<i64>);

fn integer_field(document: &Document, name: &str) -> DomainResult<Option<i64>> {
    match document.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_integer(value).map(Some).ok_or_else(|| {
            DomainError::ValidationError(format!("{}: must be an integer, got {}", name, value))
        }),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn parse_preserialized_input(input: &Value) -> DomainResult<RawFields> {
    let text = input.as_str().ok_or_else(|| {
        DomainError::ValidationError(format!("{}: must be a string", FIELD_PRESERIALIZED_INPUT))
    })?;

    let values: Vec<Value> = serde_json::from_str(text).map_err(|e| {
        DomainError::ValidationError(format!(
            "{}: not a bracketed integer list: {}",
            FIELD_PRESERIALIZED_INPUT, e
        ))
    })?;

    if values.is_empty() || values.len() > 3 {
        return Err(DomainError::ValidationError(format!(
            "{}: expected 1 to 3 values, got {}",
            FIELD_PRESERIALIZED_INPUT,
            values.len()
        )));
    }

    let mut parsed = [None; 3];
    for (slot, value) in parsed.iter_mut().zip(values.iter()) {
        *slot = Some(as_integer(value).ok_or_else(|| {
            DomainError::ValidationError(format!(
                "{}: {} is not an integer",
                FIELD_PRESERIALIZED_INPUT, value
            ))
        })?);
    }

    Ok((parsed[0], parsed[1], parsed[2]))
}
