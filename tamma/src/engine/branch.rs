//! Branch naming: slugified feature branches with collision suffixes.

use crate::platform::{GitPlatform, PlatformError};

const MAX_SLUG_LEN: usize = 50;

/// Lowercases, replaces non-alphanumeric runs with single dashes, trims
/// dashes, and bounds the length.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Nominal branch name for an issue: `feature/<number>-<slug>`.
pub fn branch_name(issue_number: u64, title: &str) -> String {
    format!("feature/{issue_number}-{}", slugify(title))
}

/// Resolves a unique branch name: the nominal name if free, else the
/// smallest positive integer suffix that clears the collision.
pub async fn unique_branch_name(
    platform: &dyn GitPlatform,
    base_name: &str,
) -> Result<String, PlatformError> {
    if platform.get_branch(base_name).await?.is_none() {
        return Ok(base_name.to_string());
    }
    let mut suffix = 1u32;
    loop {
        let candidate = format!("{base_name}-{suffix}");
        if platform.get_branch(&candidate).await?.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
    }
}
