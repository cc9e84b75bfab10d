use common::domain::{Document, DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Field names of the first sensor board revision, by position in a reading group
pub const READING_SCHEMA_V1_FIELDS: [&str; 12] = [
    "Timestamp",
    "Light level (lux)",
    "Loudness (dB)",
    "UV light level",
    "Pressure (mBar)",
    "Temperature (*C)",
    "Relative Humidity (%)",
    "PM1.0 (μg/m3)",
    "PM2.5 (μg/m3)",
    "PM4.0 (μg/m3)",
    "PM10.0 (μg/m3)",
    "CO2 (ppm)",
];

/// What to do with values past the end of the schema table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    /// Drop the whole reading group
    Reject,
    /// Keep the value under its decimal position, e.g. `"12"`
    #[default]
    StoreVerbatim,
}

/// Ordered, versioned mapping from reading position to field name.
///
/// Versions only ever append fields, so a position keeps its meaning across
/// every version of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingSchema {
    version: u32,
    fields: Vec<String>,
}

impl ReadingSchema {
    /// Build a schema table, checking that it has at least one field and that
    /// names are non-empty and unique
    pub fn new(version: u32, fields: Vec<String>) -> DomainResult<Self> {
        if fields.is_empty() {
            return Err(DomainError::InvalidReadingSchema(format!(
                "v{} has no fields",
                version
            )));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for (index, name) in fields.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DomainError::InvalidReadingSchema(format!(
                    "v{} field {} has an empty name",
                    version, index
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(DomainError::InvalidReadingSchema(format!(
                    "v{} field {} duplicates name {:?}",
                    version, index, name
                )));
            }
        }

        Ok(Self { version, fields })
    }

    /// The table the deployed sensor boards report
    pub fn v1() -> DomainResult<Self> {
        Self::new(
            1,
            READING_SCHEMA_V1_FIELDS.iter().map(|f| f.to_string()).collect(),
        )
    }

    /// Next version of the table. `fields` must repeat every existing field at
    /// its existing position and append at least one new one.
    pub fn evolve(&self, fields: Vec<String>) -> DomainResult<Self> {
        if fields.len() <= self.fields.len() {
            return Err(DomainError::InvalidReadingSchema(format!(
                "v{} must append to the {} fields of v{}",
                self.version + 1,
                self.fields.len(),
                self.version
            )));
        }

        if let Some(index) = self
            .fields
            .iter()
            .zip(fields.iter())
            .position(|(existing, next)| existing != next)
        {
            return Err(DomainError::InvalidReadingSchema(format!(
                "v{} renames field {} from {:?} to {:?}",
                self.version + 1,
                index,
                self.fields[index],
                fields[index]
            )));
        }

        Self::new(self.version + 1, fields)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Map a reading group to a record keyed by field name, in position order.
    ///
    /// Fails with `UnknownFieldIndex` at the first position the table does not
    /// cover.
    pub fn decode(&self, raw_values: &[Value]) -> DomainResult<Document> {
        if raw_values.len() > self.fields.len() {
            return Err(self.unknown_field(self.fields.len()));
        }

        Ok(self
            .fields
            .iter()
            .zip(raw_values.iter())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    /// `decode`, with positions past the table handled per `policy`
    pub fn decode_with_policy(
        &self,
        raw_values: &[Value],
        policy: UnknownFieldPolicy,
    ) -> DomainResult<Document> {
        match (self.decode(raw_values), policy) {
            (Ok(record), _) => Ok(record),
            (Err(DomainError::UnknownFieldIndex { .. }), UnknownFieldPolicy::StoreVerbatim) => {
                let (known, unknown) = raw_values.split_at(self.fields.len());
                let mut record = self.decode(known)?;
                for (offset, value) in unknown.iter().enumerate() {
                    record.insert((self.fields.len() + offset).to_string(), value.clone());
                }
                Ok(record)
            }
            (Err(e), _) => Err(e),
        }
    }

    fn unknown_field(&self, index: usize) -> DomainError {
        DomainError::UnknownFieldIndex {
            index,
            schema_version: self.version,
            field_count: self.fields.len(),
        }
    }
}
