/// OKR scope level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Org,
    Team,
    Person,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Org => "org",
            Scope::Team => "team",
            Scope::Person => "person",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim() {
            "org" => Ok(Scope::Org),
            "team" => Ok(Scope::Team),
            "person" => Ok(Scope::Person),
            other => Err(format!(
                "invalid scope \"{other}\" (expected org, team, or person)"
            )),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized OKR document loaded from YAML.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub scope: Scope,
    pub objectives: Vec<Objective>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub id: String,
    pub objective: String,
    pub owner_id: String,
    pub notes: String,
    pub key_results: Vec<KeyResult>,
    pub source_file: String,
    pub document_scope: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyResult {
    pub id: String,
    pub description: String,
    pub owner_id: String,
    pub metric_key: String,
    pub baseline: f64,
    pub target: f64,
    pub confidence: f64,
    pub status: String,
    pub evidence: Vec<String>,
    pub current: Option<f64>,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveRecord {
    pub objective: Objective,
    pub scope: Scope,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyResultRecord {
    pub key_result: KeyResult,
    pub objective: Objective,
    pub scope: Scope,
    pub source: String,
}
