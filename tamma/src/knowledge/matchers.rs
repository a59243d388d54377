//! Similarity primitives: Jaccard over sets, Dice over character bigrams,
//! and the keyword/pattern matchers the pre-task checker combines.

use std::collections::HashSet;

use glob::Pattern;

/// Jaccard similarity of two string sets (case-insensitive). Empty inputs
/// score zero.
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let left: HashSet<String> = a.iter().map(|s| s.to_lowercase()).collect();
    let right: HashSet<String> = b.iter().map(|s| s.to_lowercase()).collect();
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Dice coefficient over character bigrams. Symmetric; `1.0` for identical
/// non-empty strings, `0.0` when either side has no bigrams.
pub fn dice_coefficient(a: &str, b: &str) -> f32 {
    let left = bigrams(a);
    let right = bigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    2.0 * shared as f32 / (left.len() + right.len()) as f32
}

/// Keyword overlap between an entry and the query. `None` when the entry
/// declares no keywords (no signal, rather than zero).
pub fn keyword_score(entry_keywords: &[String], query_keywords: &[String]) -> Option<f32> {
    if entry_keywords.is_empty() {
        return None;
    }
    Some(jaccard(entry_keywords, query_keywords))
}

/// Fraction of entry patterns that match at least one query file path.
/// `None` when the entry declares no patterns.
pub fn pattern_score(entry_patterns: &[String], file_paths: &[String]) -> Option<f32> {
    if entry_patterns.is_empty() {
        return None;
    }
    if file_paths.is_empty() {
        return Some(0.0);
    }
    let matched = entry_patterns
        .iter()
        .filter(|raw| match Pattern::new(raw) {
            Ok(pattern) => file_paths.iter().any(|p| pattern.matches(p)),
            Err(_) => false,
        })
        .count();
    Some(matched as f32 / entry_patterns.len() as f32)
}

/// Combines the two matcher signals into one score: the mean of whichever
/// signals exist, zero when neither does.
pub fn combine_scores(keyword: Option<f32>, pattern: Option<f32>) -> f32 {
    match (keyword, pattern) {
        (Some(k), Some(p)) => (k + p) / 2.0,
        (Some(k), None) => k,
        (None, Some(p)) => p,
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// **Scenario**: Jaccard is symmetric for all non-empty inputs.
    #[test]
    fn jaccard_symmetry() {
        let a = strings(&["auth", "token", "session"]);
        let b = strings(&["token", "cache"]);
        assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
        assert!((jaccard(&a, &b) - 0.25).abs() < 1e-6);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &[]), 0.0);
    }

    /// **Scenario**: Dice is symmetric and maximal on identical titles.
    #[test]
    fn dice_symmetry() {
        let a = "database migration locks";
        let b = "database migration deadlocks";
        assert!((dice_coefficient(a, b) - dice_coefficient(b, a)).abs() < 1e-6);
        assert_eq!(dice_coefficient(a, a), 1.0);
        assert_eq!(dice_coefficient("", a), 0.0);
        assert_eq!(dice_coefficient("x", a), 0.0);
    }

    /// **Scenario**: patterns match paths as globs; fraction reflects how
    /// many patterns hit.
    #[test]
    fn pattern_fraction() {
        let patterns = strings(&["src/auth/**", "**/*.sql"]);
        let paths = strings(&["src/auth/session.rs", "src/main.rs"]);
        assert_eq!(pattern_score(&patterns, &paths), Some(0.5));
        assert_eq!(pattern_score(&[], &paths), None);
        assert_eq!(pattern_score(&patterns, &[]), Some(0.0));
    }

    /// **Scenario**: combination averages present signals only.
    #[test]
    fn combination_rules() {
        assert_eq!(combine_scores(Some(0.4), Some(0.8)), 0.6);
        assert_eq!(combine_scores(Some(0.4), None), 0.4);
        assert_eq!(combine_scores(None, Some(0.8)), 0.8);
        assert_eq!(combine_scores(None, None), 0.0);
    }
}
