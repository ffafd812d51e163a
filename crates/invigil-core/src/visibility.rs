//! Tab-switch detection from page visibility transitions.
//!
//! The first hidden transition after a reset raises a transient warning flag
//! and publishes an advisory signal. Every later one publishes an escalation.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, Instrument};

use crate::cancel::{CancelSource, CancelToken};
use crate::config::VisibilityConfig;
use crate::context::{SessionContext, Visibility};
use crate::lock;
use crate::obs;
use crate::signal::{Escalation, EscalationKind, EscalationSource, SignalOutlet};

/// One observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityTransition {
    pub became_hidden: bool,
    /// Hidden transitions seen so far this session; never decrements
    pub occurrence: u32,
}

#[derive(Default)]
struct VisibilityInner {
    run: Option<CancelSource>,
    occurrence: u32,
    since_reset: u32,
    warning: bool,
    warning_generation: u64,
    last_transition: Option<VisibilityTransition>,
}

struct VisibilityShared {
    ctx: SessionContext,
    config: VisibilityConfig,
    inner: Mutex<VisibilityInner>,
    signals: SignalOutlet,
}

/// Watches page visibility and escalates repeated tab switches.
pub struct VisibilityMonitor {
    shared: Arc<VisibilityShared>,
}

impl VisibilityMonitor {
    pub fn new(ctx: SessionContext, config: VisibilityConfig) -> Self {
        Self {
            shared: Arc::new(VisibilityShared {
                ctx,
                config,
                inner: Mutex::new(VisibilityInner::default()),
                signals: SignalOutlet::default(),
            }),
        }
    }

    /// Begin listening. Idempotent while enabled.
    pub fn enable(&self) {
        let token = {
            let mut inner = lock(&self.shared.inner);
            if inner.run.is_some() {
                return;
            }
            let source = CancelSource::new();
            let token = source.token();
            inner.run = Some(source);
            token
        };
        // Subscribe before returning so no transition after enable() is missed.
        let transitions = self.shared.ctx.subscribe_visibility();
        let span = obs::session_span(self.shared.ctx.session_id());
        tokio::spawn(listen(self.shared.clone(), transitions, token).instrument(span));
    }

    /// Stop listening and clear the warning flag.
    pub fn disable(&self) {
        let mut inner = lock(&self.shared.inner);
        if let Some(run) = inner.run.take() {
            run.cancel();
        }
        inner.warning = false;
        inner.warning_generation += 1;
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.shared.inner).run.is_some()
    }

    /// Treat the next hidden transition as the first again.
    ///
    /// The lifetime occurrence index is unaffected.
    pub fn reset_count(&self) {
        lock(&self.shared.inner).since_reset = 0;
    }

    /// Hidden transitions observed this session.
    pub fn hidden_count(&self) -> u32 {
        lock(&self.shared.inner).occurrence
    }

    /// Whether the first-hidden advisory warning is currently raised.
    pub fn is_warning(&self) -> bool {
        lock(&self.shared.inner).warning
    }

    pub fn last_transition(&self) -> Option<VisibilityTransition> {
        lock(&self.shared.inner).last_transition
    }

    pub fn subscribe(&self, tx: mpsc::UnboundedSender<Escalation>) {
        self.shared.signals.subscribe(tx);
    }

    pub fn unsubscribe(&self) {
        self.shared.signals.unsubscribe();
    }
}

impl Drop for VisibilityMonitor {
    fn drop(&mut self) {
        self.disable();
    }
}

async fn listen(
    shared: Arc<VisibilityShared>,
    mut transitions: broadcast::Receiver<Visibility>,
    token: CancelToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            received = transitions.recv() => received,
        };
        match received {
            Ok(visibility) => {
                if token.is_cancelled() {
                    return;
                }
                on_transition(&shared, visibility, &token);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(session_id = %shared.ctx.session_id(), missed = missed, "visibility listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn on_transition(shared: &Arc<VisibilityShared>, visibility: Visibility, token: &CancelToken) {
    let signal = {
        let mut inner = lock(&shared.inner);
        match visibility {
            Visibility::Visible => {
                inner.last_transition = Some(VisibilityTransition {
                    became_hidden: false,
                    occurrence: inner.occurrence,
                });
                None
            }
            Visibility::Hidden => {
                inner.occurrence += 1;
                inner.since_reset += 1;
                let occurrence = inner.occurrence;
                inner.last_transition = Some(VisibilityTransition {
                    became_hidden: true,
                    occurrence,
                });
                if inner.since_reset == 1 {
                    inner.warning = true;
                    inner.warning_generation += 1;
                    let generation = inner.warning_generation;
                    tokio::spawn(
                        clear_warning(shared.clone(), generation, token.clone()).in_current_span(),
                    );
                    Some(EscalationKind::TabHiddenAdvisory { occurrence })
                } else {
                    Some(EscalationKind::TabHidden { occurrence })
                }
            }
        }
    };

    if let Some(kind) = signal {
        shared.signals.publish(
            shared.ctx.session_id(),
            Escalation::new(EscalationSource::Visibility, kind),
        );
    }
}

/// Lower the warning after its duration unless a newer warning replaced it.
async fn clear_warning(shared: Arc<VisibilityShared>, generation: u64, token: CancelToken) {
    tokio::select! {
        biased;
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(shared.config.warning_duration()) => {}
    }
    let mut inner = lock(&shared.inner);
    if inner.warning_generation == generation {
        inner.warning = false;
    }
}
