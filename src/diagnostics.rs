//! Reporting of arbitration inconsistencies.
//!
//! Some instructions from the embedded UI cannot be carried out, for instance
//! "adopt the competing provider" when no competitor was ever captured. These
//! never throw into the page. They are handled locally (a delegated request is
//! rejected so the dApp does not hang) and reported to a [`DiagnosticsSink`]
//! so the wallet's own telemetry can pick them up.

use crate::correlation::CorrelationId;
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// An instruction the arbitration state could not honour.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Inconsistency {
    /// `adopt_alternative` arrived with no competing provider captured.
    #[error("asked to adopt an alternative provider, but none was detected")]
    AdoptWithoutAlternative,
    /// `delegate_call` arrived with no competing provider captured.
    #[error("asked to delegate request {id} to an alternative provider, but none was detected")]
    DelegateWithoutAlternative {
        /// The request that was rejected instead
        id: CorrelationId,
    },
}

/// Receives inconsistency reports.
pub trait DiagnosticsSink: Debug {
    /// Records one inconsistency.
    fn report(&self, inconsistency: &Inconsistency);
}

/// Writes reports to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn report(&self, inconsistency: &Inconsistency) {
        logwise::error_sync!(
            "arbitration inconsistency: {inconsistency}",
            inconsistency = logwise::privacy::LogIt(inconsistency)
        );
    }
}

/// Keeps reports in memory. Clones share the same list.
///
/// ```
/// use wallet_relay::diagnostics::{DiagnosticsSink, Inconsistency, RecordingDiagnostics};
///
/// let diagnostics = RecordingDiagnostics::new();
/// diagnostics.report(&Inconsistency::AdoptWithoutAlternative);
/// assert_eq!(diagnostics.reports(), vec![Inconsistency::AdoptWithoutAlternative]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct RecordingDiagnostics {
    reports: Rc<RefCell<Vec<Inconsistency>>>,
}

impl RecordingDiagnostics {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far.
    pub fn reports(&self) -> Vec<Inconsistency> {
        self.reports.borrow().clone()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn report(&self, inconsistency: &Inconsistency) {
        LogDiagnostics.report(inconsistency);
        self.reports.borrow_mut().push(inconsistency.clone());
    }
}
