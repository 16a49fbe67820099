//! Push policy checks
//!
//! A push is validated by a list of named checks. Each check either passes,
//! reports the payload as malformed, or lists the rules it found violated.
//! The branch naming convention is the only built-in check.

use serde::Deserialize;
use std::fmt;

use crate::webhook::PushPayload;

/// Reason reported when a push payload has no `ref`.
pub const MISSING_REF: &str = "missing ref";

/// Branch naming rules for pushes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BranchingRules {
    /// Long-lived branches that pass by name alone.
    pub protected: Vec<String>,
    /// Allowed `<prefix>` labels for short-lived workflow branches.
    pub prefixes: Vec<String>,
}

impl Default for BranchingRules {
    fn default() -> Self {
        Self {
            protected: ["master", "production", "staging", "development"]
                .map(String::from)
                .to_vec(),
            prefixes: ["change", "feature", "hotfix", "release"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// A single broken naming rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchViolation {
    MissingDash,
    UnknownPrefix(String),
    EmptySegment,
    InvalidIdentifier(String),
}

impl fmt::Display for BranchViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchViolation::MissingDash => write!(f, "no `-` separating prefix and identifier"),
            BranchViolation::UnknownPrefix(p) => write!(f, "unknown prefix `{}`", p),
            BranchViolation::EmptySegment => write!(f, "empty `-` segment"),
            BranchViolation::InvalidIdentifier(id) => {
                write!(f, "identifier `{}` is not a positive integer", id)
            }
        }
    }
}

/// Checks a branch name (without `refs/heads/`) against the rules and returns
/// every rule it breaks. An empty result means the branch is acceptable.
pub fn check_branch_name(branch: &str, rules: &BranchingRules) -> Vec<BranchViolation> {
    if rules.protected.iter().any(|b| b == branch) {
        return Vec::new();
    }

    // Without a dash there is no prefix/identifier split to inspect.
    if !branch.contains('-') {
        return vec![BranchViolation::MissingDash];
    }

    let segments: Vec<&str> = branch.split('-').collect();
    let prefix = segments[0];
    let identifier = segments[segments.len() - 1];
    let mut violations = Vec::new();

    if !rules.prefixes.iter().any(|p| p == prefix) {
        violations.push(BranchViolation::UnknownPrefix(prefix.to_string()));
    }
    if segments.iter().any(|s| s.is_empty()) {
        violations.push(BranchViolation::EmptySegment);
    }
    if !is_positive_integer(identifier) {
        violations.push(BranchViolation::InvalidIdentifier(identifier.to_string()));
    }

    violations
}

/// ASCII digits only, not all zeros. No sign, no length limit.
fn is_positive_integer(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && s.bytes().any(|b| b != b'0')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    /// The payload lacks what the check needs; not a policy violation.
    Malformed(String),
    Violated(Vec<String>),
}

/// A named check over a push payload.
pub trait PushCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, payload: &PushPayload) -> CheckOutcome;
}

/// Enforces the `<prefix>-<identifier>` naming convention.
pub struct BranchNamingCheck {
    rules: BranchingRules,
}

impl BranchNamingCheck {
    pub fn new(rules: BranchingRules) -> Self {
        Self { rules }
    }
}

impl PushCheck for BranchNamingCheck {
    fn name(&self) -> &'static str {
        "branch-naming"
    }

    fn check(&self, payload: &PushPayload) -> CheckOutcome {
        let Some(branch) = payload.branch() else {
            return CheckOutcome::Malformed(MISSING_REF.to_string());
        };

        let violations = check_branch_name(branch, &self.rules);
        if violations.is_empty() {
            CheckOutcome::Passed
        } else {
            CheckOutcome::Violated(violations.iter().map(ToString::to_string).collect())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: CheckOutcome,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.outcome == CheckOutcome::Passed
    }
}

/// Combined result of every check run against one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub branch: Option<String>,
    pub checks: Vec<CheckResult>,
}

impl PolicyResult {
    fn from_checks(branch: Option<String>, checks: Vec<CheckResult>) -> Self {
        let malformed = checks.iter().find_map(|c| match &c.outcome {
            CheckOutcome::Malformed(reason) => Some(reason.clone()),
            _ => None,
        });
        let failure_reason = malformed.or_else(|| {
            let violations = Self::describe(&checks);
            (!violations.is_empty()).then_some(violations)
        });

        Self {
            passed: failure_reason.is_none(),
            failure_reason,
            branch,
            checks,
        }
    }

    /// True when at least one check could not run on the payload.
    pub fn is_malformed(&self) -> bool {
        self.checks
            .iter()
            .any(|c| matches!(c.outcome, CheckOutcome::Malformed(_)))
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed())
    }

    /// Failing checks rendered as `name: violation; violation`, comma separated.
    pub fn violation_summary(&self) -> String {
        Self::describe(&self.checks)
    }

    fn describe(checks: &[CheckResult]) -> String {
        checks
            .iter()
            .filter_map(|c| match &c.outcome {
                CheckOutcome::Violated(v) => Some(format!("{}: {}", c.name, v.join("; "))),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The ordered list of checks a push must pass.
pub struct PushPolicy {
    checks: Vec<Box<dyn PushCheck>>,
}

impl PushPolicy {
    /// Policy with the branch naming check only.
    pub fn new(rules: BranchingRules) -> Self {
        Self {
            checks: vec![Box::new(BranchNamingCheck::new(rules))],
        }
    }

    pub fn with_check(mut self, check: impl PushCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Runs every check; none short-circuits the others.
    pub fn validate(&self, payload: &PushPayload) -> PolicyResult {
        let results = self
            .checks
            .iter()
            .map(|check| CheckResult {
                name: check.name(),
                outcome: check.check(payload),
            })
            .collect();

        PolicyResult::from_checks(payload.branch().map(String::from), results)
    }
}
