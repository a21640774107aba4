//! Contradictions between hypotheses and evidence, and their resolution state machine.
//!
//! # States
//!
//! - **Unresolved**: newly detected, awaiting review
//! - **Critical**: escalated, still awaiting a resolution
//! - **Explained**: resolved with an explanation (terminal)
//! - **Dismissed**: resolved as not material (terminal)
//!
//! `unresolved` may move to any other state; `critical` may only be resolved.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::macros::text_enum;

/// How badly a contradiction undermines the thesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

text_enum!(Severity, "severity", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Severity {
    /// Sort rank, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }
}

/// Position in the resolution state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionStatus {
    #[default]
    Unresolved,
    Explained,
    Dismissed,
    Critical,
}

text_enum!(ContradictionStatus, "contradiction status", {
    Unresolved => "unresolved",
    Explained => "explained",
    Dismissed => "dismissed",
    Critical => "critical",
});

impl ContradictionStatus {
    /// `explained` and `dismissed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContradictionStatus::Explained | ContradictionStatus::Dismissed
        )
    }

    /// Whether this status is a valid resolution target.
    pub fn is_resolution(&self) -> bool {
        self.is_terminal()
    }

    /// Legal single-step transitions.
    pub fn can_transition_to(&self, next: ContradictionStatus) -> bool {
        use ContradictionStatus::*;
        matches!(
            (self, next),
            (Unresolved, Explained)
                | (Unresolved, Dismissed)
                | (Unresolved, Critical)
                | (Critical, Explained)
                | (Critical, Dismissed)
        )
    }
}

/// A detected conflict between the thesis and what the evidence says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub engagement_id: String,
    /// Challenged hypothesis; nulled if that hypothesis is deleted.
    pub hypothesis_id: Option<String>,
    /// Evidence that raised the contradiction; nulled if deleted.
    pub evidence_id: Option<String>,
    pub description: String,
    pub severity: Severity,
    pub status: ContradictionStatus,
    /// Bear-case theme tag (e.g. "customer concentration").
    pub bear_case_theme: Option<String>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub found_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Contradiction {
    /// Create an unresolved contradiction.
    pub fn new(
        engagement_id: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            hypothesis_id: None,
            evidence_id: None,
            description: description.into(),
            severity,
            status: ContradictionStatus::Unresolved,
            bear_case_theme: None,
            resolution_notes: None,
            resolved_by: None,
            found_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_hypothesis(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.hypothesis_id = Some(hypothesis_id.into());
        self
    }

    pub fn with_evidence(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_id = Some(evidence_id.into());
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.bear_case_theme = Some(theme.into());
        self
    }

    /// Checks a contradiction about to be recorded. Every contradiction
    /// starts `unresolved`; later states come only from resolve or mark-critical.
    pub fn validate(&self) -> AppResult<()> {
        if self.description.trim().is_empty() {
            return Err(AppError::validation(
                "description",
                "Description cannot be empty",
            ));
        }
        if self.status != ContradictionStatus::Unresolved {
            return Err(AppError::validation(
                "status",
                format!("A new contradiction must be unresolved, not {}", self.status),
            ));
        }
        if self.resolved_at.is_some()
            || self.resolved_by.is_some()
            || self.resolution_notes.is_some()
        {
            return Err(AppError::validation(
                "resolution",
                "A new contradiction cannot carry resolution details",
            ));
        }
        Ok(())
    }
}

/// Filters for [`ContradictionStore::list_contradictions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContradictionFilter {
    #[serde(default)]
    pub status: Option<ContradictionStatus>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
}

impl ContradictionFilter {
    pub fn status(mut self, status: ContradictionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn hypothesis(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.hypothesis_id = Some(hypothesis_id.into());
        self
    }
}

/// Counts over an engagement's contradictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContradictionStats {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub unresolved: u64,
    pub critical: u64,
    pub resolution_rate: f64,
}

impl ContradictionStats {
    /// Build stats from `(severity, status, count)` groups.
    pub fn from_groups<I>(groups: I) -> Self
    where
        I: IntoIterator<Item = (Severity, ContradictionStatus, u64)>,
    {
        let mut stats = Self::default();
        let mut resolved = 0;
        for (severity, status, count) in groups {
            stats.total += count;
            *stats.by_severity.entry(severity.to_string()).or_default() += count;
            *stats.by_status.entry(status.to_string()).or_default() += count;
            match status {
                ContradictionStatus::Unresolved => stats.unresolved += count,
                ContradictionStatus::Critical => stats.critical += count,
                ContradictionStatus::Explained | ContradictionStatus::Dismissed => {
                    resolved += count
                }
            }
        }
        stats.resolution_rate = resolution_rate(resolved, stats.total);
        stats
    }
}

/// (explained + dismissed) ÷ total; 1.0 when there is nothing to resolve.
pub fn resolution_rate(resolved: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        resolved as f64 / total as f64
    }
}

/// Persistence and transitions for contradictions.
#[async_trait]
pub trait ContradictionStore: Send + Sync {
    /// Persist a new contradiction. Referenced ids must exist in the engagement.
    async fn create_contradiction(&self, contradiction: &Contradiction) -> AppResult<()>;

    async fn get_contradiction(&self, engagement_id: &str, id: &str) -> AppResult<Contradiction>;

    /// Severity high to low, then newest first.
    async fn list_contradictions(
        &self,
        engagement_id: &str,
        filter: &ContradictionFilter,
    ) -> AppResult<Vec<Contradiction>>;

    /// Move to `explained` or `dismissed`.
    ///
    /// Fails with `AlreadyResolved` when the contradiction is already terminal.
    async fn resolve_contradiction(
        &self,
        engagement_id: &str,
        id: &str,
        status: ContradictionStatus,
        notes: Option<&str>,
        resolved_by: Option<&str>,
    ) -> AppResult<Contradiction>;

    /// Escalate to `critical`. A no-op when already critical.
    async fn mark_critical(&self, engagement_id: &str, id: &str) -> AppResult<Contradiction>;

    async fn delete_contradiction(&self, engagement_id: &str, id: &str) -> AppResult<()>;

    async fn contradiction_stats(&self, engagement_id: &str) -> AppResult<ContradictionStats>;
}
