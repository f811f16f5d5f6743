// src/netlog.rs

//! Structured record of authentication decisions.
//!
//! Events are observational only: nothing in the negotiation reads them back.
//! The default sink forwards every event to the `log` crate; tests swap in a
//! [`CapturingNetLog`] to assert on the sequence of decisions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::Target;

/// One authentication decision worth recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetLogEvent {
    /// A handler could not be built for an offered challenge.
    HandlerCreationFailed {
        target: Target,
        challenge: String,
        reason: String,
    },
    /// A handler was chosen for a response.
    SchemeSelected { target: Target, scheme: String },
    /// A scheme was disabled for the rest of the transaction.
    SchemeDisabled { target: Target, scheme: String },
    /// The identity for a scheme was discarded.
    IdentityInvalidated { target: Target, scheme: String },
    /// The current handler rejected the server's follow-up challenge.
    ChallengeRejected { target: Target, scheme: String },
    /// Canonical name lookup failed; the origin host is used for the SPN.
    CanonicalNameFallback { host: String, reason: String },
    /// A token was produced for the next request.
    TokenGenerated { target: Target, scheme: String },
}

impl fmt::Display for NetLogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetLogEvent::HandlerCreationFailed {
                target,
                challenge,
                reason,
            } => write!(
                f,
                "{} handler for {:?} not created: {}",
                target, challenge, reason
            ),
            NetLogEvent::SchemeSelected { target, scheme } => {
                write!(f, "{} selected scheme {}", target, scheme)
            }
            NetLogEvent::SchemeDisabled { target, scheme } => {
                write!(f, "{} disabled scheme {}", target, scheme)
            }
            NetLogEvent::IdentityInvalidated { target, scheme } => {
                write!(f, "{} invalidated identity for {}", target, scheme)
            }
            NetLogEvent::ChallengeRejected { target, scheme } => {
                write!(f, "{} rejected follow-up challenge for {}", target, scheme)
            }
            NetLogEvent::CanonicalNameFallback { host, reason } => {
                write!(f, "canonical name lookup for {} failed: {}", host, reason)
            }
            NetLogEvent::TokenGenerated { target, scheme } => {
                write!(f, "{} generated {} token", target, scheme)
            }
        }
    }
}

/// A destination for [`NetLogEvent`]s.
pub trait NetLog: Send + Sync {
    fn add_event(&self, event: &NetLogEvent);
}

/// Forwards events to the `log` crate at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NetLog for LogSink {
    fn add_event(&self, event: &NetLogEvent) {
        log::debug!(target: "httpauth::netlog", "{}", event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CapturingNetLog {
    events: Mutex<Vec<NetLogEvent>>,
}

impl CapturingNetLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the events captured so far.
    pub fn events(&self) -> Vec<NetLogEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl NetLog for CapturingNetLog {
    fn add_event(&self, event: &NetLogEvent) {
        log::trace!(target: "httpauth::netlog", "{}", event);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// A cheap handle to a shared [`NetLog`], passed down to controllers and
/// handlers.
#[derive(Clone)]
pub struct BoundNetLog {
    sink: Arc<dyn NetLog>,
}

impl BoundNetLog {
    pub fn new(sink: Arc<dyn NetLog>) -> Self {
        BoundNetLog { sink }
    }

    pub fn add_event(&self, event: NetLogEvent) {
        self.sink.add_event(&event);
    }
}

impl Default for BoundNetLog {
    fn default() -> Self {
        BoundNetLog::new(Arc::new(LogSink))
    }
}

impl fmt::Debug for BoundNetLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundNetLog").finish()
    }
}
