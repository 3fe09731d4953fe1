//! Slug derivation for branch names.
//!
//! Slugs double as physical database-name suffixes, so they stay lowercase
//! ASCII with hyphens and bounded length. Uniqueness is enforced by the store's
//! unique constraint; callers retry with [`with_suffix`] on collision rather
//! than checking first.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Longest slug we mint. Leaves headroom under Postgres's 63-byte identifier
/// limit once the physical database prefix is prepended.
pub const MAX_SLUG_LEN: usize = 40;

const SUFFIX_LEN: usize = 6;

/// Derive a slug from a human-readable branch name: lowercase, runs of
/// non-alphanumeric characters collapsed to single hyphens, trimmed, truncated.
/// Returns `None` when nothing usable remains.
pub fn slugify(name: &str) -> Option<String> {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() { None } else { Some(slug) }
}

/// Append a short random suffix for collision retries, keeping the result
/// within [`MAX_SLUG_LEN`].
pub fn with_suffix(slug: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let keep = MAX_SLUG_LEN - SUFFIX_LEN - 1;
    let mut base = slug.chars().take(keep).collect::<String>();
    while base.ends_with('-') {
        base.pop();
    }
    format!("{base}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Feature X"), Some("feature-x".to_string()));
        assert_eq!(slugify("PR #123: fix auth"), Some("pr-123-fix-auth".to_string()));
        assert_eq!(slugify("--already--slugged--"), Some("already-slugged".to_string()));
    }

    #[test]
    fn test_slugify_rejects_empty() {
        assert_eq!(slugify(""), None);
        assert_eq!(slugify("!!!"), None);
        assert_eq!(slugify("日本語"), None);
    }

    #[test]
    fn test_slugify_truncates() {
        let long = "x".repeat(200);
        let slug = slugify(&long).unwrap();
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_suffix_stays_within_limit() {
        let long = slugify(&"x".repeat(200)).unwrap();
        let suffixed = with_suffix(&long);
        assert!(suffixed.len() <= MAX_SLUG_LEN);
        assert_ne!(with_suffix("base"), with_suffix("base"));
    }
}
