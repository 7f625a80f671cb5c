//! Blast-radius report for a set of changed files.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" | "MODERATE" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A file outside the change set that is likely affected by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub directly_changed: Vec<String>,
    pub indirectly_affected: Vec<AffectedFile>,
    pub risk_level: RiskLevel,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ImpactReport {
    /// MEDIUM-risk report used whenever analysis cannot complete.
    pub fn fallback(
        directly_changed: Vec<String>,
        indirectly_affected: Vec<AffectedFile>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            directly_changed,
            indirectly_affected,
            risk_level: RiskLevel::Medium,
            risks: vec![note.into()],
            recommendations: vec![
                "Review the change manually and run the full test suite before merging."
                    .to_string(),
            ],
        }
    }
}
