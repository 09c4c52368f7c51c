use super::types::{Document, KeyResultRecord, ObjectiveRecord, Scope};
use super::validate::{parse_and_validate_document, ValidationErrors};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const PERMISSIONS_FILE_NAME: &str = "permissions.yml";

/// In-memory representation of every loaded OKR document, with lookup maps
/// over objective and key-result ids.
#[derive(Debug, Clone, Default)]
pub struct OkrStore {
    org: Vec<Document>,
    team: Vec<Document>,
    person: Vec<Document>,
    objectives: BTreeMap<String, ObjectiveRecord>,
    key_results: BTreeMap<String, KeyResultRecord>,
}

impl OkrStore {
    /// Loads and validates all OKR YAML files from a directory.
    /// `permissions.yml` is handled by the permissions loader and skipped
    /// here. Validation problems across files are aggregated into one
    /// report.
    pub fn load_from_dir(okrs_dir: &Path) -> Result<Self, String> {
        let mut files = yaml_files(okrs_dir)?;
        files.retain(|path| {
            path.file_name()
                .map(|name| name != PERMISSIONS_FILE_NAME)
                .unwrap_or(true)
        });
        if files.is_empty() {
            return Err(format!(
                "no OKR YAML files found in {}",
                okrs_dir.display()
            ));
        }

        let mut docs = Vec::new();
        let mut errs = ValidationErrors::default();

        for path in files {
            let raw = fs::read_to_string(&path)
                .map_err(|err| format!("read {}: {err}", path.display()))?;
            match parse_and_validate_document(&raw, &path.display().to_string()) {
                Ok(doc) => docs.push(doc),
                Err(doc_errs) => errs.extend(doc_errs),
            }
        }

        if !errs.is_empty() {
            return Err(errs.to_string());
        }
        if docs.is_empty() {
            return Err(format!("no OKR documents found in {}", okrs_dir.display()));
        }

        let duplicate_errs = validate_cross_document_uniqueness(&docs);
        if !duplicate_errs.is_empty() {
            return Err(duplicate_errs.to_string());
        }

        Ok(Self::build(docs))
    }

    fn build(docs: Vec<Document>) -> Self {
        let mut store = Self::default();
        for doc in docs {
            for objective in &doc.objectives {
                store.objectives.insert(
                    objective.id.clone(),
                    ObjectiveRecord {
                        objective: objective.clone(),
                        scope: doc.scope,
                        source: doc.source.clone(),
                    },
                );
                for kr in &objective.key_results {
                    store.key_results.insert(
                        kr.id.clone(),
                        KeyResultRecord {
                            key_result: kr.clone(),
                            objective: objective.clone(),
                            scope: doc.scope,
                            source: doc.source.clone(),
                        },
                    );
                }
            }
            match doc.scope {
                Scope::Org => store.org.push(doc),
                Scope::Team => store.team.push(doc),
                Scope::Person => store.person.push(doc),
            }
        }
        store
    }

    pub fn documents(&self, scope: Scope) -> &[Document] {
        match scope {
            Scope::Org => &self.org,
            Scope::Team => &self.team,
            Scope::Person => &self.person,
        }
    }

    pub fn org_documents(&self) -> &[Document] {
        &self.org
    }

    pub fn objective(&self, id: &str) -> Option<&ObjectiveRecord> {
        self.objectives.get(id)
    }

    pub fn key_result(&self, id: &str) -> Option<&KeyResultRecord> {
        self.key_results.get(id)
    }

    pub fn objective_records(&self) -> impl Iterator<Item = &ObjectiveRecord> {
        self.objectives.values()
    }

    pub fn objective_count(&self) -> usize {
        self.objectives.len()
    }

    /// All objective ids grouped by scope, sorted within each scope.
    pub fn list_objective_ids(&self) -> BTreeMap<Scope, Vec<String>> {
        let mut result: BTreeMap<Scope, Vec<String>> = BTreeMap::from([
            (Scope::Org, Vec::new()),
            (Scope::Team, Vec::new()),
            (Scope::Person, Vec::new()),
        ]);
        for record in self.objectives.values() {
            if let Some(ids) = result.get_mut(&record.scope) {
                ids.push(record.objective.id.clone());
            }
        }
        for ids in result.values_mut() {
            ids.sort();
        }
        result
    }
}

/// The `*.yml` files directly under a directory, sorted by name.
pub fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(format!("scan {}: {err}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| format!("scan {}: {err}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("yml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn validate_cross_document_uniqueness(docs: &[Document]) -> ValidationErrors {
    let mut errs = ValidationErrors::default();

    let mut objectives_by_scope: BTreeMap<Scope, std::collections::BTreeSet<String>> =
        BTreeMap::new();
    struct KrOrigin {
        scope: Scope,
        file: String,
        objective_id: String,
    }
    let mut kr_seen: BTreeMap<String, KrOrigin> = BTreeMap::new();

    for doc in docs {
        let scope_ids = objectives_by_scope.entry(doc.scope).or_default();
        for (obj_idx, objective) in doc.objectives.iter().enumerate() {
            if !objective.id.is_empty() && !scope_ids.insert(objective.id.clone()) {
                errs.push(
                    &doc.source,
                    format!("objectives[{obj_idx}].objective_id"),
                    format!(
                        "objective_id \"{}\" duplicates another in scope {}",
                        objective.id, doc.scope
                    ),
                );
            }

            for (kr_idx, kr) in objective.key_results.iter().enumerate() {
                if kr.id.is_empty() {
                    continue;
                }
                if let Some(origin) = kr_seen.get(&kr.id) {
                    errs.push(
                        &doc.source,
                        format!("objectives[{obj_idx}].key_results[{kr_idx}].kr_id"),
                        format!(
                            "kr_id \"{}\" already defined in {} ({} objective {})",
                            kr.id, origin.file, origin.scope, origin.objective_id
                        ),
                    );
                    continue;
                }
                kr_seen.insert(
                    kr.id.clone(),
                    KrOrigin {
                        scope: doc.scope,
                        file: doc.source.clone(),
                        objective_id: objective.id.clone(),
                    },
                );
            }
        }
    }

    errs
}
