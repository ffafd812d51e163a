//! Per-session context handed to every component at construction.
//!
//! The host owns the [`PageVisibility`] handle and reports document visibility
//! through it; components only ever see the read side via [`SessionContext`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Identifiers of the assessment being monitored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIds {
    pub session_id: String,
    pub subject_id: String,
    pub submission_id: String,
}

impl SessionIds {
    pub fn new(
        session_id: impl Into<String>,
        subject_id: impl Into<String>,
        submission_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            subject_id: subject_id.into(),
            submission_id: submission_id.into(),
        }
    }
}

/// Document visibility as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Host-side handle publishing visibility changes.
#[derive(Debug)]
pub struct PageVisibility {
    current: watch::Sender<Visibility>,
    transitions: broadcast::Sender<Visibility>,
}

impl PageVisibility {
    /// Publish `visibility`. Returns whether it differed from the current value.
    pub fn set(&self, visibility: Visibility) -> bool {
        let changed = self.current.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            // No subscribers is fine.
            let _ = self.transitions.send(visibility);
        }
        changed
    }

    pub fn set_hidden(&self) -> bool {
        self.set(Visibility::Hidden)
    }

    pub fn set_visible(&self) -> bool {
        self.set(Visibility::Visible)
    }

    pub fn current(&self) -> Visibility {
        *self.current.borrow()
    }
}

/// Read side of the session: identifiers and visibility.
#[derive(Debug, Clone)]
pub struct SessionContext {
    ids: Arc<SessionIds>,
    visibility: watch::Receiver<Visibility>,
    transitions: broadcast::Sender<Visibility>,
}

impl SessionContext {
    /// Create a context and the host handle that drives its visibility.
    pub fn new(ids: SessionIds) -> (Self, PageVisibility) {
        let (current, visibility) = watch::channel(Visibility::Visible);
        let (transitions, _) = broadcast::channel(32);
        let ctx = Self {
            ids: Arc::new(ids),
            visibility,
            transitions: transitions.clone(),
        };
        (
            ctx,
            PageVisibility {
                current,
                transitions,
            },
        )
    }

    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    pub fn session_id(&self) -> &str {
        &self.ids.session_id
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    pub fn is_visible(&self) -> bool {
        self.visibility() == Visibility::Visible
    }

    /// Every transition published after this call.
    pub fn subscribe_visibility(&self) -> broadcast::Receiver<Visibility> {
        self.transitions.subscribe()
    }

    /// Wait until the page is visible.
    ///
    /// Returns `false` if the host handle was dropped while hidden.
    pub async fn wait_visible(&self) -> bool {
        let mut rx = self.visibility.clone();
        let visible = rx.wait_for(|v| *v == Visibility::Visible).await.is_ok();
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> SessionIds {
        SessionIds::new("sess-1", "cand-1", "sub-1")
    }

    #[tokio::test]
    async fn test_duplicate_values_publish_nothing() {
        let (ctx, page) = SessionContext::new(ids());
        let mut rx = ctx.subscribe_visibility();

        assert!(!page.set_visible());
        assert!(page.set_hidden());
        assert!(!page.set_hidden());
        assert!(page.set_visible());

        assert_eq!(rx.recv().await.unwrap(), Visibility::Hidden);
        assert_eq!(rx.recv().await.unwrap(), Visibility::Visible);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_visible_resolves_on_transition() {
        let (ctx, page) = SessionContext::new(ids());
        page.set_hidden();
        assert!(!ctx.is_visible());

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.wait_visible().await }
        });
        tokio::task::yield_now().await;
        page.set_visible();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_visible_reports_dropped_host() {
        let (ctx, page) = SessionContext::new(ids());
        page.set_hidden();
        drop(page);
        assert!(!ctx.wait_visible().await);
    }

    #[test]
    fn test_ids_serialize_camel_case() {
        let json = serde_json::to_value(ids()).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["submissionId"], "sub-1");
    }
}
