//! Escalation signals routed from the monitors to the controller.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::lock;
use crate::metrics::METRICS;
use crate::obs;

/// Which monitor raised the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSource {
    Detection,
    Visibility,
}

impl fmt::Display for EscalationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationSource::Detection => write!(f, "detection"),
            EscalationSource::Visibility => write!(f, "visibility"),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationKind {
    /// Violation threshold reached for a prohibited class
    ProhibitedObject { class: String, count: u32 },
    /// First hidden transition since the last reset; advisory only
    TabHiddenAdvisory { occurrence: u32 },
    /// Any later hidden transition
    TabHidden { occurrence: u32 },
}

impl EscalationKind {
    /// `false` for advisory signals.
    pub fn is_escalation(&self) -> bool {
        !matches!(self, EscalationKind::TabHiddenAdvisory { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            EscalationKind::ProhibitedObject { .. } => "prohibited_object",
            EscalationKind::TabHiddenAdvisory { .. } => "tab_hidden_advisory",
            EscalationKind::TabHidden { .. } => "tab_hidden",
        }
    }
}

/// A discrete rule-violation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub source: EscalationSource,
    pub kind: EscalationKind,
    pub at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(source: EscalationSource, kind: EscalationKind) -> Self {
        Self {
            source,
            kind,
            at: Utc::now(),
        }
    }

    /// Advisory text for the candidate.
    pub fn message(&self) -> String {
        match &self.kind {
            EscalationKind::ProhibitedObject { class, .. } => format!(
                "A prohibited object ({class}) was detected in view. Remove it to continue the assessment."
            ),
            EscalationKind::TabHiddenAdvisory { .. } | EscalationKind::TabHidden { .. } => {
                "Leaving the assessment tab is not allowed. Further tab switches will submit your assessment."
                    .to_string()
            }
        }
    }
}

/// Single-subscriber outlet for a monitor's signals.
#[derive(Debug, Default)]
pub(crate) struct SignalOutlet {
    tx: Mutex<Option<mpsc::UnboundedSender<Escalation>>>,
}

impl SignalOutlet {
    /// Replace the current subscriber.
    pub(crate) fn subscribe(&self, tx: mpsc::UnboundedSender<Escalation>) {
        *lock(&self.tx) = Some(tx);
    }

    pub(crate) fn unsubscribe(&self) {
        lock(&self.tx).take();
    }

    #[cfg(test)]
    fn is_subscribed(&self) -> bool {
        lock(&self.tx).as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver `escalation`; a missing or closed subscriber drops it.
    pub(crate) fn publish(&self, session_id: &str, escalation: Escalation) -> bool {
        obs::emit_escalation(session_id, &escalation.source.to_string(), escalation.kind.name());
        if escalation.kind.is_escalation() {
            METRICS.inc_escalations();
        }
        match lock(&self.tx).as_ref() {
            Some(tx) => tx.send(escalation).is_ok(),
            None => false,
        }
    }
}
