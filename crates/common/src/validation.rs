use crate::domain::{DomainError, DomainResult};
use garde::Validate;

/// Run garde rules over `value` and hand it back if every rule holds.
///
/// Failures are collapsed into one `DomainError::ValidationError` whose
/// message lists each offending field as `field: reason`, separated by `; `.
pub fn validated<T>(value: T) -> DomainResult<T>
where
    T: Validate,
    T::Context: Default,
{
    match value.validate() {
        Ok(()) => Ok(value),
        Err(report) => {
            let reasons: Vec<String> = report
                .iter()
                .map(|(path, error)| match path.to_string() {
                    field if field.is_empty() => error.message().to_string(),
                    field => format!("{field}: {}", error.message()),
                })
                .collect();
            Err(DomainError::ValidationError(reasons.join("; ")))
        }
    }
}
