//! Alternate-key resolution for `field#key` columns and single-key relation cells.

use tracing::debug;

use crate::error::{PatternError, PatternResult};
use crate::store::RecordLookup;
use crate::types::{RecordId, Value};

/// Outcome of an equality search on a key field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    Found(RecordId),
    NotFound,
    Ambiguous(Vec<RecordId>),
}

impl KeyMatch {
    pub fn from_ids(mut ids: Vec<RecordId>) -> Self {
        match ids.len() {
            0 => Self::NotFound,
            1 => Self::Found(ids[0]),
            _ => {
                ids.sort_unstable();
                Self::Ambiguous(ids)
            }
        }
    }

    /// The single match, or a [`PatternError::Lookup`] naming the key.
    pub fn into_id(self, model: &str, field: &str, value: &Value) -> PatternResult<RecordId> {
        let message = match self {
            Self::Found(id) => return Ok(id),
            Self::NotFound => "No record matched",
            Self::Ambiguous(_) => "More than one record matched",
        };
        Err(PatternError::Lookup {
            model: model.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        })
    }
}

/// Search `model` for records whose `field` equals `value`.
///
/// Exactly one match is required to use the result; callers turn the other
/// outcomes into row errors through [`KeyMatch::into_id`].
pub fn resolve_key(
    lookup: &dyn RecordLookup,
    model: &str,
    field: &str,
    value: &Value,
) -> PatternResult<KeyMatch> {
    let ids = lookup.search_eq(model, field, value)?;
    let outcome = KeyMatch::from_ids(ids);
    debug!(model, field, value = %value, ?outcome, "resolved lookup key");
    Ok(outcome)
}
