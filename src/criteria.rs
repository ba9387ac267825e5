//! Success criteria validation.
//!
//! The criteria file is keyed by phase number:
//!
//! ```json
//! {
//!   "0": {
//!     "required_outputs": [".conductor/outputs/discovery_analysis.json"],
//!     "validation_checks": [
//!       {"type": "json_valid", "path": ".conductor/outputs/discovery_analysis.json"},
//!       {"type": "metric_threshold", "file": ".conductor/outputs/discovery_analysis.json",
//!        "metric": "components_found", "min": 5}
//!     ]
//!   }
//! }
//! ```
//!
//! Relative paths resolve against the project directory. Every check runs;
//! failures are collected, not short-circuited. The report is advisory and
//! never changes a phase's status.

use crate::errors::FailureKind;
use crate::phase::{is_yaml, parse_document};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One declarative check over a phase artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationCheck {
    FileExists {
        #[serde(alias = "file")]
        path: PathBuf,
    },
    JsonValid {
        #[serde(alias = "file")]
        path: PathBuf,
    },
    MetricThreshold {
        #[serde(alias = "file")]
        path: PathBuf,
        metric: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exact: Option<Value>,
    },
}

/// Declared criteria for one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    #[serde(default)]
    pub required_outputs: Vec<PathBuf>,
    #[serde(default)]
    pub validation_checks: Vec<ValidationCheck>,
}

/// The success-criteria file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriteriaFile {
    phases: BTreeMap<u32, SuccessCriteria>,
}

impl CriteriaFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read success criteria: {}", path.display()))?;
        Self::parse(&content, is_yaml(path))
            .with_context(|| format!("Failed to parse success criteria: {}", path.display()))
    }

    pub fn parse(content: &str, yaml: bool) -> Result<Self> {
        let doc = parse_document(content, yaml).map_err(anyhow::Error::msg)?;
        let raw: BTreeMap<String, SuccessCriteria> = serde_json::from_value(doc)?;
        let mut phases = BTreeMap::new();
        for (key, criteria) in raw {
            let phase: u32 = key
                .trim()
                .parse()
                .with_context(|| format!("'{}' is not a phase number", key))?;
            phases.insert(phase, criteria);
        }
        Ok(Self { phases })
    }

    pub fn get(&self, phase: u32) -> Option<&SuccessCriteria> {
        self.phases.get(&phase)
    }

    pub fn insert(&mut self, phase: u32, criteria: SuccessCriteria) {
        self.phases.insert(phase, criteria);
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// Advisory outcome of validating one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        (!self.valid).then_some(FailureKind::ValidationFailed)
    }
}

/// Evaluates success criteria against the filesystem.
#[derive(Debug, Clone)]
pub struct CriteriaValidator {
    base_dir: PathBuf,
}

impl CriteriaValidator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn validate(&self, phase: u32, criteria: &SuccessCriteria) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for output in &criteria.required_outputs {
            if !self.resolve(output).exists() {
                errors.push(format!("Required output missing: {}", output.display()));
            }
        }

        for check in &criteria.validation_checks {
            match check {
                ValidationCheck::FileExists { path } => {
                    if !self.resolve(path).exists() {
                        errors.push(format!("File not found: {}", path.display()));
                    }
                }
                ValidationCheck::JsonValid { path } => {
                    if let Err(e) = self.load_document(path) {
                        errors.push(format!("Invalid JSON in {}: {}", path.display(), e));
                    }
                }
                ValidationCheck::MetricThreshold {
                    path,
                    metric,
                    min,
                    max,
                    exact,
                } => {
                    if min.is_none() && max.is_none() && exact.is_none() {
                        warnings.push(format!(
                            "Metric check for '{}' in {} has no min, max or exact bound",
                            metric,
                            path.display()
                        ));
                    }
                    let doc = match self.load_document(path) {
                        Ok(doc) => doc,
                        Err(e) => {
                            errors.push(format!(
                                "Cannot read metric '{}' from {}: {}",
                                metric,
                                path.display(),
                                e
                            ));
                            continue;
                        }
                    };
                    errors.extend(check_metric(&doc, metric, *min, *max, exact.as_ref()));
                }
            }
        }

        let report = ValidationReport::from_findings(errors, warnings);
        if report.valid {
            tracing::debug!(phase, warnings = report.warnings.len(), "success criteria met");
        } else {
            tracing::warn!(phase, errors = report.errors.len(), "success criteria not met");
        }
        report
    }

    fn load_document(&self, path: &Path) -> Result<Value> {
        let full = self.resolve(path);
        let content = std::fs::read_to_string(&full)
            .with_context(|| format!("cannot read {}", full.display()))?;
        parse_document(&content, is_yaml(&full)).map_err(anyhow::Error::msg)
    }
}

/// Look up `metric` as a top-level key, then as a dotted path.
fn lookup_metric<'a>(doc: &'a Value, metric: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(metric) {
        return Some(value);
    }
    if !metric.contains('.') {
        return None;
    }
    metric
        .split('.')
        .try_fold(doc, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(segment),
        })
}

fn check_metric(
    doc: &Value,
    metric: &str,
    min: Option<f64>,
    max: Option<f64>,
    exact: Option<&Value>,
) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(value) = lookup_metric(doc, metric) else {
        errors.push(format!("Metric '{}' not found", metric));
        return errors;
    };

    if let Some(expected) = exact
        && !values_equal(value, expected)
    {
        errors.push(format!(
            "Metric '{}' is {} but must equal {}",
            metric, value, expected
        ));
    }

    if min.is_none() && max.is_none() {
        return errors;
    }
    let Some(number) = value.as_f64() else {
        errors.push(format!("Metric '{}' is not numeric: {}", metric, value));
        return errors;
    };
    if let Some(min) = min
        && number < min
    {
        errors.push(format!(
            "Metric '{}' is {} but must be at least {}",
            metric, value, min
        ));
    }
    if let Some(max) = max
        && number > max
    {
        errors.push(format!(
            "Metric '{}' is {} but must be at most {}",
            metric, value, max
        ));
    }
    errors
}

/// Numbers compare by value so that `5` equals `5.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
