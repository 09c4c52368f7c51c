use super::types::{Document, KeyResult, Objective, Scope};
use serde::Deserialize;
use std::collections::BTreeSet;

/// A single field-specific validation issue, addressed by file and field
/// path so a batch of problems reads like a compiler diagnostic list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub file: String,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}: {}", self.file, self.message)
        } else {
            write!(f, "{}: {}: {}", self.file, self.field, self.message)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, file: &str, field: String, message: String) {
        self.0.push(ValidationError {
            file: file.to_string(),
            field,
            message,
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    scope: String,
    #[serde(default)]
    objectives: Vec<RawObjective>,
}

#[derive(Debug, Deserialize)]
struct RawObjective {
    #[serde(default)]
    objective_id: String,
    #[serde(default)]
    objective: String,
    #[serde(default)]
    owner_id: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    key_results: Vec<RawKeyResult>,
}

#[derive(Debug, Deserialize)]
struct RawKeyResult {
    #[serde(default)]
    kr_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    owner_id: String,
    #[serde(default)]
    metric_key: String,
    baseline: Option<f64>,
    target: Option<f64>,
    confidence: Option<f64>,
    #[serde(default)]
    status: String,
    evidence: Option<Vec<String>>,
    current: Option<f64>,
    #[serde(default)]
    last_updated: String,
}

/// Unmarshals and validates a YAML OKR document, collecting every problem
/// instead of stopping at the first.
pub fn parse_and_validate_document(
    data: &str,
    source: &str,
) -> Result<Document, ValidationErrors> {
    let raw: RawDocument = match serde_yaml::from_str(data) {
        Ok(raw) => raw,
        Err(err) => {
            let mut errs = ValidationErrors::default();
            errs.push(source, "yaml".to_string(), err.to_string());
            return Err(errs);
        }
    };
    validate_raw_document(raw, source)
}

fn validate_raw_document(raw: RawDocument, source: &str) -> Result<Document, ValidationErrors> {
    let mut errs = ValidationErrors::default();

    let scope = match Scope::parse(&raw.scope) {
        Ok(scope) => scope,
        Err(message) => {
            errs.push(source, "scope".to_string(), message);
            // Scope errors are fatal for the document, but keep scanning
            // the objectives so the report stays complete.
            Scope::Org
        }
    };

    if raw.objectives.is_empty() {
        errs.push(
            source,
            "objectives".to_string(),
            "must contain at least one objective".to_string(),
        );
    }

    let mut objective_ids: BTreeSet<String> = BTreeSet::new();
    let mut objectives = Vec::with_capacity(raw.objectives.len());

    for (idx, raw_objective) in raw.objectives.into_iter().enumerate() {
        let path = format!("objectives[{idx}]");
        let objective = validate_objective(raw_objective, &path, scope, source, &mut errs);

        if !objective.id.is_empty() && !objective_ids.insert(objective.id.clone()) {
            errs.push(
                source,
                format!("{path}.objective_id"),
                format!("duplicate objective_id \"{}\" within scope", objective.id),
            );
        }
        objectives.push(objective);
    }

    if !errs.is_empty() {
        return Err(errs);
    }

    Ok(Document {
        scope,
        objectives,
        source: source.to_string(),
    })
}

fn validate_objective(
    raw: RawObjective,
    field_path: &str,
    scope: Scope,
    source: &str,
    errs: &mut ValidationErrors,
) -> Objective {
    if raw.objective_id.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.objective_id"),
            "objective_id is required".to_string(),
        );
    }
    if raw.objective.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.objective"),
            "objective text is required".to_string(),
        );
    }
    if raw.key_results.is_empty() {
        errs.push(
            source,
            format!("{field_path}.key_results"),
            "must contain at least one key result".to_string(),
        );
    }

    let mut kr_ids: BTreeSet<String> = BTreeSet::new();
    let mut key_results = Vec::with_capacity(raw.key_results.len());

    for (kr_idx, raw_kr) in raw.key_results.into_iter().enumerate() {
        let kr_path = format!("{field_path}.key_results[{kr_idx}]");
        let kr = validate_key_result(raw_kr, &kr_path, source, errs);
        if !kr.id.is_empty() && !kr_ids.insert(kr.id.clone()) {
            errs.push(
                source,
                format!("{kr_path}.kr_id"),
                format!("duplicate kr_id \"{}\" within objective", kr.id),
            );
        }
        key_results.push(kr);
    }

    Objective {
        id: raw.objective_id.trim().to_string(),
        objective: raw.objective.trim().to_string(),
        owner_id: raw.owner_id.trim().to_string(),
        notes: raw.notes.trim().to_string(),
        key_results,
        source_file: source.to_string(),
        document_scope: scope,
    }
}

fn validate_key_result(
    raw: RawKeyResult,
    field_path: &str,
    source: &str,
    errs: &mut ValidationErrors,
) -> KeyResult {
    if raw.kr_id.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.kr_id"),
            "kr_id is required".to_string(),
        );
    }
    if raw.description.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.description"),
            "description is required".to_string(),
        );
    }
    if raw.owner_id.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.owner_id"),
            "owner_id is required".to_string(),
        );
    }
    if raw.metric_key.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.metric_key"),
            "metric_key is required".to_string(),
        );
    }
    if raw.baseline.is_none() {
        errs.push(
            source,
            format!("{field_path}.baseline"),
            "baseline is required".to_string(),
        );
    }
    if raw.target.is_none() {
        errs.push(
            source,
            format!("{field_path}.target"),
            "target is required".to_string(),
        );
    }
    match raw.confidence {
        None => errs.push(
            source,
            format!("{field_path}.confidence"),
            "confidence is required".to_string(),
        ),
        Some(confidence) if !(0.0..=1.0).contains(&confidence) => errs.push(
            source,
            format!("{field_path}.confidence"),
            "must be between 0.0 and 1.0".to_string(),
        ),
        Some(_) => {}
    }
    if raw.status.trim().is_empty() {
        errs.push(
            source,
            format!("{field_path}.status"),
            "status is required".to_string(),
        );
    }
    match &raw.evidence {
        None => errs.push(
            source,
            format!("{field_path}.evidence"),
            "evidence list is required".to_string(),
        ),
        Some(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                if entry.trim().is_empty() {
                    errs.push(
                        source,
                        format!("{field_path}.evidence[{idx}]"),
                        "evidence entries cannot be empty".to_string(),
                    );
                }
            }
        }
    }
    if !raw.last_updated.is_empty() && !is_iso8601(&raw.last_updated) {
        errs.push(
            source,
            format!("{field_path}.last_updated"),
            "must be ISO-8601 date or datetime".to_string(),
        );
    }

    KeyResult {
        id: raw.kr_id.trim().to_string(),
        description: raw.description.trim().to_string(),
        owner_id: raw.owner_id.trim().to_string(),
        metric_key: raw.metric_key.trim().to_string(),
        baseline: raw.baseline.unwrap_or_default(),
        target: raw.target.unwrap_or_default(),
        confidence: raw.confidence.unwrap_or_default(),
        status: raw.status.trim().to_string(),
        evidence: raw.evidence.unwrap_or_default(),
        current: raw.current,
        last_updated: raw.last_updated.trim().to_string(),
    }
}

fn is_iso8601(value: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
        || chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}
