use super::types::{canonicalize_points, MetricPoint};

/// Collects metric points from a single source. Providers are fallible and
/// independent; the caller decides how provider failures compose.
pub trait Provider {
    fn name(&self) -> &str;
    fn collect(&self) -> Result<Vec<MetricPoint>, String>;
}

/// Runs every provider in order and merges their points into one
/// canonicalized list. The first provider failure aborts the collection.
pub fn collect_all(providers: &[&dyn Provider]) -> Result<Vec<MetricPoint>, String> {
    let mut all = Vec::new();
    for provider in providers {
        let points = provider
            .collect()
            .map_err(|err| format!("{} provider: {err}", provider.name()))?;
        all.extend(points);
    }
    Ok(canonicalize_points(all))
}
