//! Query processing: synonym expansion, entity extraction, intent
//! classification.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// What the query is trying to accomplish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    CodeSearch,
    Explanation,
    Implementation,
    Debugging,
    Documentation,
    Refactoring,
    General,
}

/// Kind of entity spotted in a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    FilePath,
    Class,
    Function,
    Package,
}

/// An extracted entity with a heuristic confidence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

/// Processed form of a raw query.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessedQuery {
    pub original: String,
    /// Expansion variants, original excluded. Bounded by `max_variants`.
    pub expanded: Vec<String>,
    pub entities: Vec<Entity>,
    pub intent: QueryIntent,
}

const MAX_VARIANTS: usize = 4;

/// Per-token synonym table. Small and code-domain flavoured on purpose.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("bug", &["defect", "issue", "error"]),
    ("error", &["failure", "exception", "bug"]),
    ("fix", &["resolve", "repair", "patch"]),
    ("function", &["method", "fn", "routine"]),
    ("config", &["configuration", "settings", "options"]),
    ("auth", &["authentication", "authorization", "login"]),
    ("test", &["spec", "unit test", "check"]),
    ("delete", &["remove", "drop"]),
    ("create", &["add", "insert", "new"]),
    ("fast", &["quick", "performant"]),
];

static STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "to", "of", "in", "on", "for", "and", "or", "how",
    "what", "why", "do", "does", "this", "that", "with",
];

static FILE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_\-./]+\.[a-z]{1,8}\b").expect("static regex"));
static PASCAL_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+\b").expect("static regex"));
static CAMEL_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z][a-z0-9]*(?:[A-Z][a-z0-9]+)+\b").expect("static regex"));
static PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[a-z0-9\-]+/[a-z0-9\-._]+").expect("static regex"));

/// Expands a query into up to `MAX_VARIANTS` synonym variants. The original
/// is always preserved by the caller; variants replace one token at a time.
pub fn expand_query(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut variants = Vec::new();
    for (word, synonyms) in SYNONYMS {
        if !contains_word(&lower, word) {
            continue;
        }
        for synonym in *synonyms {
            if variants.len() >= MAX_VARIANTS {
                return variants;
            }
            let variant = replace_word(&lower, word, synonym);
            if variant != lower && !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric()).any(|t| t == word)
}

fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    text.split_whitespace()
        .map(|t| {
            if t.trim_matches(|c: char| !c.is_alphanumeric()) == word {
                t.replace(word, replacement)
            } else {
                t.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts file paths, class names, function names, and scoped packages.
/// Common stopwords never become entities.
pub fn extract_entities(query: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for m in PACKAGE_RE.find_iter(query) {
        if seen.insert(m.as_str().to_string()) {
            entities.push(Entity {
                text: m.as_str().to_string(),
                kind: EntityKind::Package,
                confidence: 0.95,
            });
        }
    }
    for m in FILE_PATH_RE.find_iter(query) {
        let text = m.as_str();
        // Paths with separators are near-certain; bare `name.ext` less so.
        let confidence = if text.contains('/') { 0.95 } else { 0.8 };
        if seen.insert(text.to_string()) {
            entities.push(Entity {
                text: text.to_string(),
                kind: EntityKind::FilePath,
                confidence,
            });
        }
    }
    for m in PASCAL_CASE_RE.find_iter(query) {
        let text = m.as_str();
        if is_stopword(text) {
            continue;
        }
        if seen.insert(text.to_string()) {
            entities.push(Entity {
                text: text.to_string(),
                kind: EntityKind::Class,
                confidence: 0.7,
            });
        }
    }
    for m in CAMEL_CASE_RE.find_iter(query) {
        let text = m.as_str();
        if is_stopword(text) {
            continue;
        }
        if seen.insert(text.to_string()) {
            entities.push(Entity {
                text: text.to_string(),
                kind: EntityKind::Function,
                confidence: 0.7,
            });
        }
    }
    entities
}

fn is_stopword(text: &str) -> bool {
    let lower = text.to_lowercase();
    STOPWORDS.contains(&lower.as_str())
}

/// Classifies intent by keyword hits; first matching bucket wins, `General`
/// otherwise.
pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| contains_word(&lower, w));

    if hit(&["debug", "crash", "stacktrace", "panic", "fails", "failing", "broken"]) {
        QueryIntent::Debugging
    } else if hit(&["refactor", "cleanup", "simplify", "restructure", "rename"]) {
        QueryIntent::Refactoring
    } else if hit(&["document", "docs", "readme", "comment", "documentation"]) {
        QueryIntent::Documentation
    } else if hit(&["implement", "add", "create", "build", "write"]) {
        QueryIntent::Implementation
    } else if hit(&["explain", "understand", "what", "why", "how"]) {
        QueryIntent::Explanation
    } else if hit(&["find", "where", "search", "locate", "usages"]) {
        QueryIntent::CodeSearch
    } else {
        QueryIntent::General
    }
}

/// Full query processing pass.
pub fn process_query(query: &str) -> ProcessedQuery {
    ProcessedQuery {
        original: query.to_string(),
        expanded: expand_query(query),
        entities: extract_entities(query),
        intent: classify_intent(query),
    }
}
