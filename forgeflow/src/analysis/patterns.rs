//! Failure taxonomy and signatures.

use crate::errors::{ForgeflowError, Result};
use crate::utils::Timestamp;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_SIGNATURE_CHARS: usize = 120;

/// Coarse failure category, decided by keyword matching on the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A step exceeded its time budget.
    Timeout,
    /// The command ran out of memory.
    Memory,
    /// A package or module could not be resolved.
    Dependency,
    /// Source failed to compile or type-check.
    Compilation,
    /// Access to a file, registry or cluster was denied.
    Permission,
    /// Nothing matched.
    Unknown,
}

impl FailureCategory {
    const KEYWORDS: [(Self, &'static [&'static str]); 5] = [
        (Self::Timeout, &["timed out", "timeout", "deadline exceeded"]),
        (
            Self::Memory,
            &["out of memory", "heap out of", "enomem", "oomkilled", "memory limit", "allocation failed"],
        ),
        (
            Self::Permission,
            &["permission denied", "eacces", "eperm", "forbidden", "unauthorized", "access denied"],
        ),
        (
            Self::Dependency,
            &[
                "cannot find module",
                "module not found",
                "could not resolve",
                "unresolved import",
                "npm err",
                "enoent",
                "dependency",
                "no matching version",
            ],
        ),
        (
            Self::Compilation,
            &["syntax error", "syntaxerror", "typeerror", "type error", "unexpected token", "compil", "error ts"],
        ),
    ];

    /// Classifies an error message.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        Self::KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map_or(Self::Unknown, |(category, _)| *category)
    }

    /// Typical causes of this category.
    #[must_use]
    pub fn causes(&self) -> &'static [&'static str] {
        match self {
            Self::Timeout => &[
                "Step does more work than its timeout allows",
                "Slow or unreachable external service",
            ],
            Self::Memory => &[
                "Process exceeded the available heap",
                "Bundle or test suite grew beyond the memory limit",
            ],
            Self::Dependency => &[
                "Missing or unpublished package",
                "Lockfile out of sync with the manifest",
            ],
            Self::Compilation => &["Syntax or type error in the source", "Incompatible compiler version"],
            Self::Permission => &["Missing credentials", "Insufficient file or cluster permissions"],
            Self::Unknown => &["Unclassified failure"],
        }
    }

    /// Suggested fixes for this category.
    #[must_use]
    pub fn fixes(&self) -> &'static [&'static str] {
        match self {
            Self::Timeout => &[
                "Increase the step timeout",
                "Split the step or cache its expensive inputs",
            ],
            Self::Memory => &[
                "Raise the memory limit of the step",
                "Reduce the working set, e.g. by splitting the bundle",
            ],
            Self::Dependency => &[
                "Pin dependency versions and refresh the lockfile",
                "Verify the package registry is reachable",
            ],
            Self::Compilation => &["Fix the reported compile errors before retrying"],
            Self::Permission => &["Check credentials and permissions of the pipeline user"],
            Self::Unknown => &["Inspect the step logs for the root cause"],
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Memory => "memory",
            Self::Dependency => "dependency",
            Self::Compilation => "compilation",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A recurring failure, keyed by signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    /// `category:normalised message`.
    pub signature: String,
    /// Failure category.
    pub category: FailureCategory,
    /// Number of failed jobs with this signature.
    pub frequency: u32,
    /// Targets that hit it, sorted.
    pub affected_targets: Vec<String>,
    /// Typical causes.
    pub causes: Vec<String>,
    /// Suggested fixes.
    pub fixes: Vec<String>,
    /// A raw message that produced the signature.
    pub sample_message: String,
    /// First occurrence.
    pub first_seen: Timestamp,
    /// Latest occurrence.
    pub last_seen: Timestamp,
}

impl FailurePattern {
    pub(crate) fn first(signature: String, category: FailureCategory, target_id: &str, message: &str, at: Timestamp) -> Self {
        Self {
            signature,
            category,
            frequency: 1,
            affected_targets: vec![target_id.to_string()],
            causes: category.causes().iter().map(|s| (*s).to_string()).collect(),
            fixes: category.fixes().iter().map(|s| (*s).to_string()).collect(),
            sample_message: message.to_string(),
            first_seen: at,
            last_seen: at,
        }
    }

    pub(crate) fn observe(&mut self, target_id: &str, at: Timestamp) {
        self.frequency += 1;
        if let Err(pos) = self.affected_targets.binary_search_by(|t| t.as_str().cmp(target_id)) {
            self.affected_targets.insert(pos, target_id.to_string());
        }
        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
    }
}

/// Reduces error messages to stable signatures.
///
/// Numbers, hex runs and uuids vary between runs of the same failure, so
/// they are folded before messages are compared.
#[derive(Debug, Clone)]
pub struct SignatureNormalizer {
    uuid: Regex,
    hex: Regex,
    digits: Regex,
    whitespace: Regex,
}

impl SignatureNormalizer {
    /// Compiles the normalisation patterns.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ForgeflowError::Config(format!("invalid signature pattern: {e}")))
        };
        Ok(Self {
            uuid: compile(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")?,
            hex: compile(r"\b(?:0x)?[0-9a-f]{8,}\b")?,
            digits: compile(r"[0-9]+")?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Normalises a message: lower-case, ids folded, digits to `#`,
    /// whitespace collapsed, at most 120 characters.
    #[must_use]
    pub fn normalize(&self, message: &str) -> String {
        let lower = message.to_lowercase();
        let text = self.uuid.replace_all(&lower, "<uuid>");
        let text = self.hex.replace_all(&text, "<hex>");
        let text = self.digits.replace_all(&text, "#");
        let text = self.whitespace.replace_all(text.trim(), " ");
        text.chars().take(MAX_SIGNATURE_CHARS).collect()
    }

    /// Builds the `category:message` signature of a failure.
    #[must_use]
    pub fn signature(&self, category: FailureCategory, message: &str) -> String {
        format!("{category}:{}", self.normalize(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify() {
        assert_eq!(
            FailureCategory::classify("Step 'test' timed out after 500ms"),
            FailureCategory::Timeout
        );
        assert_eq!(
            FailureCategory::classify("FATAL ERROR: JavaScript heap out of memory"),
            FailureCategory::Memory
        );
        assert_eq!(
            FailureCategory::classify("Error: Cannot find module 'left-pad'"),
            FailureCategory::Dependency
        );
        assert_eq!(
            FailureCategory::classify("src/app.ts(4,2): error TS2322: Type mismatch"),
            FailureCategory::Compilation
        );
        assert_eq!(
            FailureCategory::classify("kubectl: permission denied"),
            FailureCategory::Permission
        );
        assert_eq!(FailureCategory::classify("exit status 1"), FailureCategory::Unknown);
    }

    #[test]
    fn test_normalize_folds_volatile_parts() {
        let normalizer = SignatureNormalizer::new().unwrap();
        let a = normalizer.normalize("Job job-0190f3a1b2c34d5e8f9a0b1c2d3e4f50 failed at   line 42");
        let b = normalizer.normalize("job JOB-0190f3a1ffffffff8f9a0b1c2d3e4f99 failed at line 7");
        assert_eq!(a, b);
        assert_eq!(a, "job job-<hex> failed at line #");
    }

    #[test]
    fn test_normalize_uuid_and_length() {
        let normalizer = SignatureNormalizer::new().unwrap();
        assert_eq!(
            normalizer.normalize("lock 550e8400-e29b-41d4-a716-446655440000 held"),
            "lock <uuid> held"
        );
        let long = "x".repeat(500);
        assert_eq!(normalizer.normalize(&long).chars().count(), 120);
    }

    #[test]
    fn test_short_words_are_not_hex() {
        let normalizer = SignatureNormalizer::new().unwrap();
        assert_eq!(normalizer.normalize("bad cafe 2"), "bad cafe #");
    }

    #[test]
    fn test_signature() {
        let normalizer = SignatureNormalizer::new().unwrap();
        assert_eq!(
            normalizer.signature(FailureCategory::Timeout, "Step 'e2e' timed out after 300000ms"),
            "timeout:step 'e#e' timed out after #ms"
        );
    }

    #[test]
    fn test_pattern_observe() {
        let now = crate::utils::now_utc();
        let mut pattern =
            FailurePattern::first("unknown:x".into(), FailureCategory::Unknown, "web", "x", now);
        pattern.observe("api", now);
        pattern.observe("web", now);
        assert_eq!(pattern.frequency, 3);
        assert_eq!(pattern.affected_targets, vec!["api", "web"]);
    }
}
