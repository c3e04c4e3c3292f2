//! Cache key derivation.

use crate::utils::short_hash;

/// Derives the per-job cache key from a target id and a version.
///
/// # Examples
///
/// ```
/// use forgeflow::cache::job_cache_key;
///
/// let key = job_cache_key("web", "1.0.0");
/// assert!(key.starts_with("cache:"));
/// assert_eq!(key, job_cache_key("web", "1.0.0"));
/// ```
#[must_use]
pub fn job_cache_key(target_id: &str, version: &str) -> String {
    format!("cache:{}", short_hash(&[target_id, version]))
}
