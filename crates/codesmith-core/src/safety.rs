//! Deterministic safety pre-filter.
//!
//! Runs before any model call. A match refuses the query outright; nothing
//! downstream of the router executes.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    CredentialExfiltration,
    DestructiveFilesystem,
    DestructiveDatabase,
    ExploitGeneration,
    /// Matched an operator-configured pattern.
    Custom,
}

impl std::fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CredentialExfiltration => "credential_exfiltration",
            Self::DestructiveFilesystem => "destructive_filesystem",
            Self::DestructiveDatabase => "destructive_database",
            Self::ExploitGeneration => "exploit_generation",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Safe,
    Unsafe {
        category: SafetyCategory,
        /// The text that matched.
        matched: String,
    },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

const BUILTIN_PATTERNS: &[(SafetyCategory, &str)] = &[
    (
        SafetyCategory::DestructiveDatabase,
        r"\bdrop\s+(the\s+)?(\w+\s+)?(table|tables|database|schema)\b",
    ),
    (SafetyCategory::DestructiveDatabase, r"\btruncate\s+table\b"),
    (
        SafetyCategory::DestructiveDatabase,
        r"\b(wipe|erase|destroy)\s+(the\s+)?(entire\s+|whole\s+|production\s+)?(database|db)\b",
    ),
    (
        SafetyCategory::DestructiveDatabase,
        r"\bdelete\s+from\s+\w+\s*(;|$)",
    ),
    (SafetyCategory::DestructiveFilesystem, r"\brm\s+-(rf|fr)\s+(/|~|\*)"),
    (
        SafetyCategory::DestructiveFilesystem,
        r"\b(delete|remove|wipe|destroy)\s+(all\s+)?(of\s+)?(the\s+|our\s+)?backups\b",
    ),
    (
        SafetyCategory::DestructiveFilesystem,
        r"\bformat\s+(the\s+)?(hard\s+)?(drive|disk)\b",
    ),
    (SafetyCategory::DestructiveFilesystem, r"\bmkfs(\.\w+)?\s+/dev/"),
    (SafetyCategory::DestructiveFilesystem, r"\bdd\s+if=\S+\s+of=/dev/"),
    (
        SafetyCategory::CredentialExfiltration,
        r"\b(steal|exfiltrate|harvest|dump|leak)\s+(\w+\s+){0,3}(credentials|passwords|secrets|api\s+keys|tokens|ssh\s+keys)\b",
    ),
    (
        SafetyCategory::CredentialExfiltration,
        r"\bsend\s+(\w+\s+){0,3}(credentials|passwords|secrets|api\s+keys|private\s+keys)\s+to\b",
    ),
    (SafetyCategory::CredentialExfiltration, r"\.ssh/id_(rsa|ed25519|ecdsa)\b"),
    (SafetyCategory::CredentialExfiltration, r"/etc/shadow\b"),
    (
        SafetyCategory::ExploitGeneration,
        r"\b(write|generate|create|build|make)\s+(me\s+)?(an?\s+)?(\w+\s+){0,2}(exploit|ransomware|keylogger|malware|rootkit|backdoor)\b",
    ),
    (SafetyCategory::ExploitGeneration, r"\breverse\s+shell\b"),
    (
        SafetyCategory::ExploitGeneration,
        r"\bsql\s+injection\s+payloads?\b",
    ),
];

fn compile(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn builtin() -> &'static [(SafetyCategory, Regex)] {
    static COMPILED: OnceLock<Vec<(SafetyCategory, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        BUILTIN_PATTERNS
            .iter()
            .filter_map(|(cat, p)| compile(p).ok().map(|re| (*cat, re)))
            .collect()
    })
}

/// Built-in patterns plus any configured extras.
#[derive(Debug, Clone, Default)]
pub struct SafetyFilter {
    extra: Vec<Regex>,
}

impl SafetyFilter {
    /// Compile `extra_patterns`; an invalid regex is a configuration error.
    pub fn new(extra_patterns: &[String]) -> Result<Self> {
        let extra = extra_patterns
            .iter()
            .map(|p| {
                compile(p).map_err(|e| {
                    OrchestratorError::Config(format!("invalid safety pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { extra })
    }

    pub fn classify(&self, query: &str) -> SafetyVerdict {
        if let SafetyVerdict::Unsafe { category, matched } = classify_safety(query) {
            return SafetyVerdict::Unsafe { category, matched };
        }
        for re in &self.extra {
            if let Some(m) = re.find(query) {
                return SafetyVerdict::Unsafe {
                    category: SafetyCategory::Custom,
                    matched: m.as_str().to_string(),
                };
            }
        }
        SafetyVerdict::Safe
    }
}

/// Classify against the built-in list only.
pub fn classify_safety(query: &str) -> SafetyVerdict {
    for (category, re) in builtin() {
        if let Some(m) = re.find(query) {
            return SafetyVerdict::Unsafe {
                category: *category,
                matched: m.as_str().to_string(),
            };
        }
    }
    SafetyVerdict::Safe
}
