//! Seams to the collaborators around the core: who the user is, what they
//! are working on, and where events are rendered.

use super::events::ClientEvent;
use super::history::HistoryEntry;
use std::future::Future;
use std::pin::Pin;

/// The authenticated handle a check-in is published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub handle: String,
    pub avatar_ref: Option<String>,
}

pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Identity;

    /// Token presented to the relay. May prompt the user; callers bound it
    /// with a timeout and treat `None` as unauthenticated.
    fn identity_token(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async { None })
    }
}

/// Activity tags inferred outside the core, at most three, in display order.
pub trait TagSource: Send + Sync {
    fn current_tags(&self) -> Vec<String>;
}

/// Purely reactive consumer of the client event stream.
pub trait DisplaySink: Send + Sync {
    fn on_event(&self, event: &ClientEvent);

    fn on_snapshot(&self, entries: &[HistoryEntry]);
}

/// Identity fixed at startup, typically from configuration.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    identity: Identity,
    token: Option<String>,
}

impl StaticIdentity {
    pub fn new(handle: impl Into<String>, avatar_ref: Option<String>, token: Option<String>) -> Self {
        Self {
            identity: Identity {
                handle: handle.into(),
                avatar_ref,
            },
            token,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn identity_token(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let token = self.token.clone();
        Box::pin(async move { token })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticTags(pub Vec<String>);

impl TagSource for StaticTags {
    fn current_tags(&self) -> Vec<String> {
        self.0.clone()
    }
}
