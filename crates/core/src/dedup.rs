#![forbid(unsafe_code)]

/// Lowercased alphanumeric projection used for duplicate comparison.
/// `"SWOG-1234"`, `"swog 1234"`, and `"Swog.1234"` all normalize identically.
pub fn normalize_id(id: &str) -> String {
    id.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Returns the secondary ids that do not duplicate any primary id, nor any
/// earlier id from either list, under normalized comparison. Order of the
/// surviving secondaries is preserved.
pub fn dedup_ids(primary: &[String], secondary: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = primary.iter().map(|id| normalize_id(id)).collect();
    let mut survivors = Vec::new();
    for id in secondary {
        let normalized = normalize_id(id);
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        seen.push(normalized);
        survivors.push(id.clone());
    }
    survivors
}
