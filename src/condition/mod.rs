// src/condition/mod.rs

//! Pre- and post-condition evaluation.
//!
//! Conditions are pure predicates over a [`JobView`]. The view only hands out
//! shared references, so a predicate cannot mutate the job it inspects.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::dag::OperationDefinition;
use crate::errors::{FlowError, Result};
use crate::job::JobView;

type PredicateFn = dyn Fn(&JobView<'_>) -> anyhow::Result<bool> + Send + Sync;

/// A user-supplied predicate with a name for diagnostics.
#[derive(Clone)]
pub struct NamedPredicate {
    pub name: String,
    func: Arc<PredicateFn>,
}

impl NamedPredicate {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&JobView<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for NamedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedPredicate").field(&self.name).finish()
    }
}

/// A single condition.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Path relative to the job workspace exists.
    FileExists(PathBuf),
    /// The document contains the (dotted) key.
    DocKey(String),
    /// The document value at key equals `value`.
    DocEquals { key: String, value: Value },
    Not(Box<Predicate>),
    Custom(NamedPredicate),
}

impl Predicate {
    pub fn custom(
        name: impl Into<String>,
        func: impl Fn(&JobView<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Predicate::Custom(NamedPredicate::new(name, func))
    }

    pub fn file_exists(path: impl Into<PathBuf>) -> Self {
        Predicate::FileExists(path.into())
    }

    pub fn doc_key(key: impl Into<String>) -> Self {
        Predicate::DocKey(key.into())
    }

    pub fn doc_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::DocEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn check(&self, view: &JobView<'_>) -> anyhow::Result<bool> {
        match self {
            Predicate::FileExists(path) => Ok(view.file_exists(path)),
            Predicate::DocKey(key) => Ok(view.get(key).is_some()),
            Predicate::DocEquals { key, value } => Ok(view.get(key) == Some(value)),
            Predicate::Not(inner) => Ok(!inner.check(view)?),
            Predicate::Custom(named) => (named.func)(view),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::FileExists(path) => write!(f, "file_exists({})", path.display()),
            Predicate::DocKey(key) => write!(f, "doc_key({key})"),
            Predicate::DocEquals { key, value } => write!(f, "doc_equals({key} == {value})"),
            Predicate::Not(inner) => write!(f, "not({inner})"),
            Predicate::Custom(named) => write!(f, "{}", named.name),
        }
    }
}

/// Outcome of evaluating both condition sets of an operation.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub pre_ok: bool,
    pub post_ok: bool,
    /// Set when a predicate failed; both flags are then false.
    pub error: Option<FlowError>,
}

/// Evaluates the condition sets of an operation against a job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// All pre-conditions hold. An empty set is vacuously true.
    pub fn check_pre(&self, view: &JobView<'_>, op: &OperationDefinition) -> Result<bool> {
        all_hold(view, op, "pre", &op.pre)
    }

    /// All post-conditions hold. An empty set is never complete on its own:
    /// such operations finish by explicit marking.
    pub fn check_post(&self, view: &JobView<'_>, op: &OperationDefinition) -> Result<bool> {
        if op.post.is_empty() {
            return Ok(false);
        }
        all_hold(view, op, "post", &op.post)
    }

    pub fn evaluate(&self, view: &JobView<'_>, op: &OperationDefinition) -> Evaluation {
        let result = self
            .check_pre(view, op)
            .and_then(|pre_ok| Ok((pre_ok, self.check_post(view, op)?)));
        match result {
            Ok((pre_ok, post_ok)) => Evaluation {
                pre_ok,
                post_ok,
                error: None,
            },
            Err(err) => Evaluation {
                pre_ok: false,
                post_ok: false,
                error: Some(err),
            },
        }
    }
}

fn all_hold(
    view: &JobView<'_>,
    op: &OperationDefinition,
    kind: &str,
    conditions: &[Predicate],
) -> Result<bool> {
    for condition in conditions {
        let holds = condition
            .check(view)
            .map_err(|err| FlowError::ConditionEvaluation {
                job: view.id().to_string(),
                operation: op.name.clone(),
                condition: format!("{kind} {condition}"),
                message: format!("{err:#}"),
            })?;
        if !holds {
            trace!(job = %view.id(), op = %op.name, condition = %condition, "{kind}-condition false");
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::job::{Document, Job};
    use serde_json::json;

    fn fixture() -> (MockFileSystem, Job, Document) {
        let fs = MockFileSystem::new();
        fs.add_file("ws/j/output.dat", "42");
        let document = json!({"converged": true, "fit": {"n": 3}})
            .as_object()
            .cloned()
            .unwrap();
        (fs, Job::new("j", "ws/j"), document)
    }

    #[test]
    fn builtin_predicates() {
        let (fs, job, document) = fixture();
        let view = JobView::new(&job, &document, &fs);

        assert!(Predicate::file_exists("output.dat").check(&view).unwrap());
        assert!(!Predicate::file_exists("missing").check(&view).unwrap());
        assert!(Predicate::doc_key("fit.n").check(&view).unwrap());
        assert!(Predicate::doc_equals("converged", true).check(&view).unwrap());
        assert!(!Predicate::doc_equals("fit.n", 4).check(&view).unwrap());
        assert!(Predicate::doc_key("nope").negate().check(&view).unwrap());
    }

    #[test]
    fn empty_sets_follow_their_defaults() {
        let (fs, job, document) = fixture();
        let view = JobView::new(&job, &document, &fs);
        let op = OperationDefinition::new("noop");

        let eval = ConditionEvaluator::new().evaluate(&view, &op);
        assert!(eval.pre_ok);
        assert!(!eval.post_ok);
        assert!(eval.error.is_none());
    }

    #[test]
    fn conjunction_short_circuits() {
        let (fs, job, document) = fixture();
        let view = JobView::new(&job, &document, &fs);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let op = OperationDefinition::new("op")
            .with_pre(Predicate::file_exists("missing"))
            .with_pre(Predicate::custom("counted", move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }));

        assert!(!ConditionEvaluator::new().check_pre(&view, &op).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_predicate_is_reported_with_context() {
        let (fs, job, document) = fixture();
        let view = JobView::new(&job, &document, &fs);
        let op = OperationDefinition::new("analyze")
            .with_post(Predicate::custom("parse_report", |v| {
                let text = v.read_file("report.txt")?;
                Ok(!text.is_empty())
            }));

        let eval = ConditionEvaluator::new().evaluate(&view, &op);
        assert!(!eval.pre_ok && !eval.post_ok);
        match eval.error {
            Some(FlowError::ConditionEvaluation {
                operation,
                condition,
                ..
            }) => {
                assert_eq!(operation, "analyze");
                assert_eq!(condition, "post parse_report");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
