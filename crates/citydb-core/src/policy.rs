//! Reportable export errors and the run-wide propagation policy.
//!
//! Every non-fatal problem found while materializing features goes through
//! [`ErrorReporter::report`]. The engine never decides locally whether such a
//! problem aborts the export.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::metrics::ExportMetrics;

/// Run-wide propagation policy for reportable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// The first reportable error aborts the whole export.
    FailFast,
    /// Record every reportable error and keep going.
    LogAndContinue,
}

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Kind of reportable problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Unknown or unsupported object class, or a disabled extension.
    Instantiation,
    /// Data shape violation, e.g. a part whose parent is not part-capable.
    DataIntegrity,
    /// A parent id pointing at a node that was never materialized.
    DanglingReference,
}

impl ReportKind {
    pub fn severity(&self) -> Severity {
        match self {
            ReportKind::Instantiation | ReportKind::DataIntegrity => Severity::Error,
            ReportKind::DanglingReference => Severity::Warning,
        }
    }
}

/// A single reported problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub kind: ReportKind,
    pub object_class_id: Option<i32>,
    pub surrogate_id: Option<i64>,
    pub message: String,
}

impl Report {
    pub fn new(kind: ReportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            object_class_id: None,
            surrogate_id: None,
            message: message.into(),
        }
    }

    pub fn with_object(mut self, object_class_id: Option<i32>, surrogate_id: i64) -> Self {
        self.object_class_id = object_class_id;
        self.surrogate_id = Some(surrogate_id);
        self
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(id) = self.surrogate_id {
            write!(f, " (id {id}")?;
            if let Some(class) = self.object_class_id {
                write!(f, ", class {class}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Central decision point for reportable errors.
pub struct ErrorReporter {
    policy: ErrorPolicy,
    stop: Arc<AtomicBool>,
    metrics: Arc<ExportMetrics>,
    reports: Mutex<Vec<Report>>,
}

impl ErrorReporter {
    /// Create a reporter that raises `stop` when the policy aborts the run.
    pub fn new(policy: ErrorPolicy, stop: Arc<AtomicBool>, metrics: Arc<ExportMetrics>) -> Self {
        Self {
            policy,
            stop,
            metrics,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Record a problem.
    ///
    /// Returns `Err(Error::Aborted)` if the policy is fail-fast and the
    /// report is an error. Warnings never abort.
    pub fn report(&self, report: Report) -> Result<(), Error> {
        let severity = report.kind.severity();
        match severity {
            Severity::Warning => {
                tracing::warn!(
                    kind = ?report.kind,
                    object_class_id = ?report.object_class_id,
                    surrogate_id = ?report.surrogate_id,
                    "{}",
                    report.message
                );
                self.metrics.record_warning();
            }
            Severity::Error => {
                tracing::error!(
                    kind = ?report.kind,
                    object_class_id = ?report.object_class_id,
                    surrogate_id = ?report.surrogate_id,
                    "{}",
                    report.message
                );
                self.metrics.record_error();
            }
        }

        let abort = severity == Severity::Error && self.policy == ErrorPolicy::FailFast;
        let message = report.to_string();
        self.reports.lock().push(report);

        if abort {
            self.stop.store(true, Ordering::SeqCst);
            return Err(Error::Aborted(message));
        }
        Ok(())
    }

    /// All reports recorded so far.
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Number of reports of the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.kind.severity() == severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(policy: ErrorPolicy) -> (ErrorReporter, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        let reporter = ErrorReporter::new(policy, stop.clone(), Arc::new(ExportMetrics::new()));
        (reporter, stop)
    }

    #[test]
    fn test_log_and_continue_records() {
        let (reporter, stop) = reporter(ErrorPolicy::LogAndContinue);
        reporter
            .report(Report::new(ReportKind::Instantiation, "unknown class").with_object(Some(999), 7))
            .unwrap();
        reporter
            .report(Report::new(ReportKind::DanglingReference, "missing parent"))
            .unwrap();

        assert_eq!(reporter.count(Severity::Error), 1);
        assert_eq!(reporter.count(Severity::Warning), 1);
        assert!(!stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fail_fast_aborts_on_error() {
        let (reporter, stop) = reporter(ErrorPolicy::FailFast);
        let result = reporter.report(Report::new(ReportKind::DataIntegrity, "bad part"));
        assert!(matches!(result, Err(Error::Aborted(_))));
        assert!(stop.load(Ordering::SeqCst));
        assert_eq!(reporter.reports().len(), 1);
    }

    #[test]
    fn test_fail_fast_ignores_warnings() {
        let (reporter, stop) = reporter(ErrorPolicy::FailFast);
        reporter
            .report(Report::new(ReportKind::DanglingReference, "missing parent"))
            .unwrap();
        assert!(!stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_report_display() {
        let report = Report::new(ReportKind::Instantiation, "unknown class").with_object(Some(999), 7);
        assert_eq!(report.to_string(), "Instantiation: unknown class (id 7, class 999)");
    }
}
