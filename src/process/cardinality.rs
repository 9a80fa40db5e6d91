//! `core:Cardinality`: enforce per-attribute value counts.
//!
//! ```json
//! {
//!   "mail": { "min": 1 },
//!   "eduPersonPrincipalName": { "min": 1, "max": 1 },
//!   "cn": { "max": 3, "warn": true },
//!   "%ignoreEntities": ["https://legacy-idp.example.org"]
//! }
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{FilterOutcome, ProcessingFilter, Suspension};
use crate::error::{Error, Result};
use crate::http::RequestContext;
use crate::state::{AuthState, CardinalityViolation, StateId, StateStore};

/// Stage the state is persisted under for the error page.
pub const CARDINALITY_STAGE: &str = "core:cardinality";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    min: Option<u64>,
    max: Option<u64>,
    warn: bool,
}

impl Bounds {
    fn accepts(&self, count: u64) -> bool {
        self.min.map_or(true, |min| count >= min) && self.max.map_or(true, |max| count <= max)
    }
}

/// Attribute cardinality filter.
#[derive(Debug, Clone)]
pub struct CardinalityFilter {
    rules: BTreeMap<String, Bounds>,
    ignore_entities: Vec<String>,
    error_url: String,
}

impl CardinalityFilter {
    /// Validate and build from the filter's configuration object.
    pub fn from_config(config: &Value, base_url: &str) -> Result<Self> {
        let Value::Object(entries) = config else {
            return Err(Error::config(
                "Invalid attribute name: cardinality configuration must map attribute names to bounds",
            ));
        };

        let mut rules = BTreeMap::new();
        let mut ignore_entities = Vec::new();

        for (key, value) in entries {
            match key.as_str() {
                "%ignoreEntities" => {
                    ignore_entities = parse_entity_list(value)?;
                    continue;
                }
                "%priority" => continue,
                "" => return Err(Error::config("Invalid attribute name: empty key")),
                _ if key.starts_with('%') => {
                    return Err(Error::config(format!("Unknown cardinality option: {key}")));
                }
                _ => {}
            }

            let Value::Object(bounds) = value else {
                return Err(Error::config(format!(
                    "Invalid attribute name or rules for {key}: expected an object with min and/or max"
                )));
            };
            rules.insert(key.clone(), parse_bounds(key, bounds)?);
        }

        Ok(Self {
            rules,
            ignore_entities,
            error_url: format!("{}/core/cardinality_error", base_url.trim_end_matches('/')),
        })
    }

    pub fn error_url(&self) -> &str {
        &self.error_url
    }
}

fn parse_bounds(attribute: &str, bounds: &Map<String, Value>) -> Result<Bounds> {
    let min = parse_bound(bounds.get("min"), "Minimum", attribute)?;
    let max = parse_bound(bounds.get("max"), "Maximum", attribute)?;

    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(Error::config(format!(
                "Minimum cardinality must be less than maximum for {attribute}"
            )));
        }
    }

    let warn = match bounds.get("warn") {
        None => false,
        Some(value) => value
            .as_bool()
            .ok_or_else(|| Error::config(format!("warn must be a boolean for {attribute}")))?,
    };

    Ok(Bounds { min, max, warn })
}

fn parse_bound(value: Option<&Value>, label: &str, attribute: &str) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            Error::config(format!(
                "{label} cardinality must be a positive integer for {attribute}"
            ))
        }),
    }
}

fn parse_entity_list(value: &Value) -> Result<Vec<String>> {
    let invalid = || Error::config("%ignoreEntities must be a list of entity IDs");
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|entry| entry.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

impl ProcessingFilter for CardinalityFilter {
    fn name(&self) -> &str {
        "core:Cardinality"
    }

    fn process(&self, state: &mut AuthState, _ctx: &RequestContext) -> Result<FilterOutcome> {
        if let Some(ref entity) = state.source_entity_id {
            if self.ignore_entities.contains(entity) {
                debug!(idp = %entity, "Cardinality check skipped for ignored entity");
                return Ok(FilterOutcome::Continue);
            }
        }

        let mut violations = Vec::new();
        for (attribute, bounds) in &self.rules {
            let count = state.attribute_count(attribute);
            if bounds.accepts(count as u64) {
                continue;
            }

            if bounds.warn {
                warn!(
                    attribute = %attribute,
                    count,
                    min = ?bounds.min,
                    max = ?bounds.max,
                    "Attribute cardinality out of bounds"
                );
                continue;
            }

            violations.push(CardinalityViolation {
                attribute: attribute.clone(),
                count,
                min: bounds.min,
                max: bounds.max,
            });
        }

        if violations.is_empty() {
            return Ok(FilterOutcome::Continue);
        }

        debug!(violations = violations.len(), "Attribute cardinality violated");
        state.cardinality_errors = violations;
        Ok(FilterOutcome::Suspend(Suspension::terminal(
            CARDINALITY_STAGE,
            self.error_url.clone(),
        )))
    }
}

/// Diagnostic data for the cardinality error page.
pub fn cardinality_error_report(
    store: &dyn StateStore,
    id: &StateId,
) -> Result<Vec<CardinalityViolation>> {
    let state = store.take(id, CARDINALITY_STAGE)?;
    Ok(state.cardinality_errors)
}
