//! Duplicate detection for captured learnings.
//!
//! Title similarity (Dice over character bigrams) decides first; clearly
//! dissimilar titles fall through, and the mid-band defers to keyword
//! overlap (Jaccard).

use super::matchers::{dice_coefficient, jaccard};
use super::KnowledgeEntry;

/// Thresholded duplicate detector.
#[derive(Clone, Debug)]
pub struct DuplicateDetector {
    title_threshold: f32,
    keyword_threshold: f32,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            title_threshold: 0.8,
            keyword_threshold: 0.6,
        }
    }
}

impl DuplicateDetector {
    pub fn new(title_threshold: f32, keyword_threshold: f32) -> Self {
        Self {
            title_threshold,
            keyword_threshold,
        }
    }

    /// Whether a candidate duplicates an existing entry.
    ///
    /// Title similarity ≥ threshold: duplicate. Below 60 % of the threshold:
    /// not a duplicate regardless of keywords. In between: keyword overlap
    /// decides.
    pub fn is_duplicate(
        &self,
        title: &str,
        keywords: &[String],
        existing: &KnowledgeEntry,
    ) -> bool {
        let title_sim = dice_coefficient(title, &existing.title);
        if title_sim >= self.title_threshold {
            return true;
        }
        if title_sim < self.title_threshold * 0.6 {
            return false;
        }
        jaccard(keywords, &existing.keywords) >= self.keyword_threshold
    }

    /// First duplicate among `existing`, if any.
    pub fn find_duplicate<'a>(
        &self,
        title: &str,
        keywords: &[String],
        existing: &'a [KnowledgeEntry],
    ) -> Option<&'a KnowledgeEntry> {
        existing
            .iter()
            .find(|entry| self.is_duplicate(title, keywords, entry))
    }
}
