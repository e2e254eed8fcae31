use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Validation severity. Only critical failures block progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationLevel::Critical => write!(f, "critical"),
            ValidationLevel::Warning => write!(f, "warning"),
            ValidationLevel::Info => write!(f, "info"),
        }
    }
}

/// Outcome of a single validator invocation.
pub struct RuleVerdict {
    pub passed: bool,
    pub reason: String,
    pub details: Map<String, Value>,
}

impl RuleVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
            details: Map::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

type Validator<I, O> =
    Box<dyn Fn(&I, &O, &Map<String, Value>) -> Result<RuleVerdict> + Send + Sync>;

/// A single named quality gate attached to an agent.
pub struct ValidationRule<I, O> {
    pub name: &'static str,
    pub description: &'static str,
    pub level: ValidationLevel,
    pub enabled: bool,
    validator: Validator<I, O>,
}

impl<I, O> ValidationRule<I, O> {
    pub fn new<F>(
        name: &'static str,
        description: &'static str,
        level: ValidationLevel,
        validator: F,
    ) -> Self
    where
        F: Fn(&I, &O, &Map<String, Value>) -> Result<RuleVerdict> + Send + Sync + 'static,
    {
        Self {
            name,
            description,
            level,
            enabled: true,
            validator: Box::new(validator),
        }
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }
}

/// Record of a rule miss, persisted append-only per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub rule_name: String,
    pub rule_description: String,
    pub level: ValidationLevel,
    pub reason: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Complete validation report for one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstitutionReport {
    pub agent: String,
    pub passed: bool,
    #[serde(default)]
    pub failures: Vec<ValidationFailure>,
    #[serde(default)]
    pub warnings: Vec<ValidationFailure>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("Agent {agent} failed constitution validation: {summary}")]
pub struct ConstitutionViolation {
    pub agent: String,
    pub failures: Vec<ValidationFailure>,
    summary: String,
}

impl ConstitutionViolation {
    pub fn new(agent: &str, failures: Vec<ValidationFailure>) -> Self {
        let summary = failures
            .iter()
            .map(|f| format!("{}: {}", f.rule_name, f.reason))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            agent: agent.to_string(),
            failures,
            summary,
        }
    }
}

/// Ordered rule set for one agent. The agent passes iff no critical rule
/// fails; validator panics are impossible and validator errors degrade to
/// warnings with a synthetic reason.
pub struct AgentConstitution<I, O> {
    pub agent_name: &'static str,
    rules: Vec<ValidationRule<I, O>>,
}

impl<I, O> AgentConstitution<I, O> {
    pub fn new(agent_name: &'static str, rules: Vec<ValidationRule<I, O>>) -> Self {
        Self {
            agent_name,
            rules: rules.into_iter().filter(|r| r.enabled).collect(),
        }
    }

    pub fn validate(
        &self,
        input: &I,
        output: &O,
        context: Map<String, Value>,
    ) -> ConstitutionReport {
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for rule in &self.rules {
            let outcome = (rule.validator)(input, output, &context);
            let (verdict, level) = match outcome {
                Ok(verdict) => (verdict, rule.level),
                Err(err) => {
                    tracing::error!(rule = rule.name, error = %err, "constitution validator error");
                    (
                        RuleVerdict::fail(format!("Validator error: {err}"))
                            .with_detail("error", Value::String(err.to_string())),
                        ValidationLevel::Warning,
                    )
                }
            };
            if verdict.passed {
                continue;
            }
            let mut details = verdict.details;
            details.insert("rule_name".into(), Value::String(rule.name.into()));
            details.insert(
                "rule_description".into(),
                Value::String(rule.description.into()),
            );
            let failure = ValidationFailure {
                rule_name: rule.name.to_string(),
                rule_description: rule.description.to_string(),
                level,
                reason: verdict.reason,
                details,
                timestamp: Utc::now(),
                agent: self.agent_name.to_string(),
                context: context.clone(),
            };
            match level {
                ValidationLevel::Critical => failures.push(failure),
                ValidationLevel::Warning => warnings.push(failure),
                ValidationLevel::Info => {
                    tracing::info!(rule = failure.rule_name, reason = failure.reason, "constitution info");
                }
            }
        }

        let passed = failures.is_empty();
        if !passed {
            tracing::warn!(
                agent = self.agent_name,
                failures = failures.len(),
                warnings = warnings.len(),
                "constitution failed"
            );
        }

        ConstitutionReport {
            agent: self.agent_name.to_string(),
            passed,
            failures,
            warnings,
            timestamp: Utc::now(),
            context,
        }
    }

    /// Validate and convert critical failures into a typed violation.
    pub fn must_pass(
        &self,
        input: &I,
        output: &O,
        context: Map<String, Value>,
    ) -> Result<ConstitutionReport, ConstitutionViolation> {
        let report = self.validate(input, output, context);
        if report.passed {
            Ok(report)
        } else {
            Err(ConstitutionViolation::new(
                self.agent_name,
                report.failures,
            ))
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FailureStatistics {
    pub total_reports: usize,
    pub by_agent: BTreeMap<String, usize>,
    pub by_rule: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
}

/// Append-only JSONL store of constitution reports, one object per line.
/// Writers emit whole lines in a single write; readers skip malformed lines.
pub struct FailureStore {
    failures_file: PathBuf,
}

impl FailureStore {
    pub fn new(store_path: impl AsRef<Path>) -> Result<Self> {
        let store_path = store_path.as_ref();
        std::fs::create_dir_all(store_path)?;
        Ok(Self {
            failures_file: store_path.join("constitution_failures.jsonl"),
        })
    }

    pub fn save(&self, report: &ConstitutionReport) {
        if report.failures.is_empty() && report.warnings.is_empty() {
            return;
        }
        let line = match serde_json::to_string(report) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize constitution report");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failures_file)
            .and_then(|mut f| f.write_all(format!("{line}\n").as_bytes()));
        match result {
            Ok(()) => tracing::info!(
                agent = report.agent,
                failures = report.failures.len(),
                warnings = report.warnings.len(),
                path = %self.failures_file.display(),
                "constitution failure saved"
            ),
            Err(err) => tracing::warn!(error = %err, "failed to persist constitution report"),
        }
    }

    /// Most recent reports, oldest first, optionally filtered by agent.
    /// Read errors and malformed lines yield an empty/partial result.
    pub fn failures(&self, agent: Option<&str>, limit: usize) -> Vec<Value> {
        let Ok(content) = std::fs::read_to_string(&self.failures_file) else {
            return Vec::new();
        };
        let mut reports: Vec<Value> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .filter(|v: &Value| {
                agent.map_or(true, |a| v.get("agent").and_then(|x| x.as_str()) == Some(a))
            })
            .collect();
        if limit > 0 && reports.len() > limit {
            reports.drain(..reports.len() - limit);
        }
        reports
    }

    pub fn statistics(&self) -> FailureStatistics {
        let reports = self.failures(None, 0);
        let mut stats = FailureStatistics {
            total_reports: reports.len(),
            ..Default::default()
        };
        for report in &reports {
            let agent = report
                .get("agent")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            *stats.by_agent.entry(agent.to_string()).or_default() += 1;
            for key in ["failures", "warnings"] {
                for f in report
                    .get(key)
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    let rule = f
                        .get("rule_name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    let level = f
                        .get("level")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    *stats.by_rule.entry(rule.to_string()).or_default() += 1;
                    *stats.by_level.entry(level.to_string()).or_default() += 1;
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_constitution() -> AgentConstitution<u32, u32> {
        AgentConstitution::new(
            "test_agent",
            vec![
                ValidationRule::new(
                    "output_positive",
                    "Output must be positive",
                    ValidationLevel::Critical,
                    |_, output: &u32, _| {
                        Ok(if *output > 0 {
                            RuleVerdict::pass()
                        } else {
                            RuleVerdict::fail("output was zero")
                        })
                    },
                ),
                ValidationRule::new(
                    "output_large",
                    "Output should exceed input",
                    ValidationLevel::Warning,
                    |input: &u32, output: &u32, _| {
                        Ok(if output > input {
                            RuleVerdict::pass()
                        } else {
                            RuleVerdict::fail("output did not grow")
                        })
                    },
                ),
            ],
        )
    }

    #[test]
    fn passes_when_no_critical_failures() {
        let constitution = counting_constitution();
        let report = constitution.validate(&5, &3, Map::new());
        assert!(report.passed);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].rule_name, "output_large");
    }

    #[test]
    fn must_pass_raises_typed_violation() {
        let constitution = counting_constitution();
        let err = constitution.must_pass(&5, &0, Map::new()).unwrap_err();
        assert_eq!(err.agent, "test_agent");
        assert_eq!(err.failures.len(), 1);
        assert!(err.to_string().contains("output_positive"));
    }

    #[test]
    fn validator_errors_become_warnings() {
        let constitution: AgentConstitution<(), ()> = AgentConstitution::new(
            "crashy",
            vec![ValidationRule::new(
                "explodes",
                "Always errors",
                ValidationLevel::Critical,
                |_, _, _| anyhow::bail!("boom"),
            )],
        );
        let report = constitution.validate(&(), &(), Map::new());
        assert!(report.passed);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].reason.contains("boom"));
    }

    #[test]
    fn failure_store_round_trip_and_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FailureStore::new(dir.path().join("_constitution_failures")).unwrap();

        let constitution = counting_constitution();
        let report = constitution.validate(&1, &0, Map::new());
        store.save(&report);

        // Corrupt line in the middle must be skipped.
        std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("_constitution_failures/constitution_failures.jsonl"))
            .unwrap()
            .write_all(b"{not json}\n")
            .unwrap();
        store.save(&report);

        let rows = store.failures(None, 100);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["agent"], "test_agent");

        let stats = store.statistics();
        assert_eq!(stats.total_reports, 2);
        assert_eq!(stats.by_agent["test_agent"], 2);
        assert_eq!(stats.by_rule["output_positive"], 2);
    }

    #[test]
    fn clean_reports_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FailureStore::new(dir.path()).unwrap();
        let constitution = counting_constitution();
        let report = constitution.validate(&1, &5, Map::new());
        store.save(&report);
        assert!(store.failures(None, 10).is_empty());
    }
}
