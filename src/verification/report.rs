//! Verification report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Passed,
    Failed,
    /// Explicitly turned off by the caller; never counts toward a pass
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub outcome: CheckOutcome,
    pub duration_ms: u64,
    pub detail: String,
}

impl CheckResult {
    pub fn passed<N: Into<String>, D: Into<String>>(name: N, duration: Duration, detail: D) -> Self {
        Self::new(name, CheckOutcome::Passed, duration, detail)
    }

    pub fn failed<N: Into<String>, D: Into<String>>(name: N, duration: Duration, detail: D) -> Self {
        Self::new(name, CheckOutcome::Failed, duration, detail)
    }

    pub fn skipped<N: Into<String>>(name: N) -> Self {
        Self::new(name, CheckOutcome::Skipped, Duration::ZERO, "skipped")
    }

    fn new<N: Into<String>, D: Into<String>>(
        name: N,
        outcome: CheckOutcome,
        duration: Duration,
        detail: D,
    ) -> Self {
        Self {
            name: name.into(),
            outcome,
            duration_ms: duration.as_millis() as u64,
            detail: detail.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == CheckOutcome::Failed
    }
}

/// What was verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Template,
    Deployment,
}

/// Outcome of one verification run; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub target: String,
    pub target_kind: TargetKind,
    pub checks: Vec<CheckResult>,
    pub passed: bool,
    pub created_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Overall pass requires every check to have run and passed
    pub fn new<T: Into<String>>(target: T, target_kind: TargetKind, checks: Vec<CheckResult>) -> Self {
        let passed = !checks.is_empty() && checks.iter().all(|c| c.outcome == CheckOutcome::Passed);
        Self {
            target: target.into(),
            target_kind,
            checks,
            passed,
            created_at: Utc::now(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.outcome == CheckOutcome::Passed)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.is_failure())
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_pass_is_failure() {
        let report = VerificationReport::new(
            "billing-svc",
            TargetKind::Deployment,
            vec![
                CheckResult::passed("reachability", Duration::from_millis(5), "ok"),
                CheckResult::failed("health", Duration::from_secs(1), "timeout"),
            ],
        );
        assert!(!report.passed);
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.check("health").unwrap().detail, "timeout");
    }

    #[test]
    fn test_skipped_check_withholds_the_pass() {
        let report = VerificationReport::new(
            "rust-axum",
            TargetKind::Template,
            vec![
                CheckResult::passed("structural", Duration::ZERO, "ok"),
                CheckResult::skipped("build"),
                CheckResult::skipped("container"),
            ],
        );
        assert!(!report.passed);
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn test_empty_report_does_not_pass() {
        assert!(!VerificationReport::new("x", TargetKind::Template, vec![]).passed);
    }

    #[test]
    fn test_report_json_shape() {
        let report = VerificationReport::new(
            "billing-svc",
            TargetKind::Deployment,
            vec![CheckResult::passed("health", Duration::from_millis(12), "HTTP 200")],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target_kind"], "deployment");
        assert_eq!(json["checks"][0]["outcome"], "passed");
        assert_eq!(json["checks"][0]["duration_ms"], 12);
    }
}
