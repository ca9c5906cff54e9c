use std::{fmt, sync::Arc};

use keystone_shared::{
    log::{debug, error, warn},
    parking_lot::Mutex,
};

use crate::{AssetKey, Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The cache recovered, e.g. by using the hardcoded fallback.
    Warning,
    /// The requested asset couldn't be loaded and the fallback was substituted.
    Error,
}

/// Phase of the pipeline in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Commit,
    /// Loading the default asset of a type failed.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub severity: Severity,
    pub type_tag: &'static str,
    pub key: AssetKey,
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    pub(crate) fn new(severity: Severity, type_tag: &'static str, key: &AssetKey, phase: Phase, error: &Error) -> Self {
        Self {
            severity,
            type_tag,
            key: key.clone(),
            phase,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loading {} asset {} failed during {:?} ({:?}): {}",
            self.type_tag, self.key, self.phase, self.kind, self.message
        )
    }
}

/// Receives the failures of the cache. Every failed asset is reported exactly once on the
/// thread that pumps the cache.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for Arc<R> {
    fn report(&self, report: &ErrorReport) {
        self.as_ref().report(report)
    }
}

/// Writes the reports to the log. This is the default reporter of the cache.
#[derive(Debug, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, report: &ErrorReport) {
        match report.severity {
            Severity::Warning => warn!("{report}"),
            Severity::Error => error!("{report}"),
        }
    }
}

/// Keeps all reports in memory so that they can be inspected later.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all reports in the order in which they were received.
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    /// Returns the reports that concern the given key.
    pub fn reports_for(&self, key: &AssetKey) -> Vec<ErrorReport> {
        self.reports.lock().iter().filter(|report| &report.key == key).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ErrorReport) {
        debug!("Recording report: {report}");
        self.reports.lock().push(report.clone());
    }
}
