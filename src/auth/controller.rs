// src/auth/controller.rs

//! Per-target authentication state across the round trips of one
//! transaction.
//!
//! ```text
//! NoHandler --challenge--> HaveHandler --identity--> HaveAuth
//!     ^                        |  ^                     |
//!     |                        |  +-----challenge-------+
//!     +--- rejected -----------+
//! HaveAuth --accepted--> Succeeded
//! NoHandler --no usable challenge--> GaveUp
//! ```

use std::sync::Arc;

use http::{HeaderMap, HeaderValue};
use percent_encoding::percent_decode_str;
use url::Url;

use super::{
    choose_best_challenge, handle_challenge_response, origin_of, AuthCache, AuthChallengeInfo,
    AuthCredentials, AuthHandler, AuthHandlerFactory, AuthorizationResult, Identity,
    IdentitySource, RequestInfo, SchemeSet, Target,
};
use crate::error::Severity;
use crate::netlog::{BoundNetLog, NetLogEvent};
use crate::Result;

/// Where a controller stands, derived from its handler and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No scheme has been selected.
    NoHandler,
    /// A scheme is selected but no identity is available yet.
    HaveHandler,
    /// A scheme and an identity are ready; a token can be generated.
    HaveAuth,
    /// The server accepted the last authorization.
    Succeeded,
    /// The last challenge offered nothing usable.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvalidateHandlerAction {
    Handler,
    HandlerAndCachedCredentials,
    HandlerAndDisableScheme,
}

/// Drives authentication for one [`Target`] of one transaction.
///
/// The controller owns its handler. All methods take `&mut self`, so a
/// controller is confined to one task at a time; dropping the future of
/// [`maybe_generate_auth_token`](AuthController::maybe_generate_auth_token)
/// cancels the round.
#[derive(Debug)]
pub struct AuthController {
    target: Target,
    auth_url: Url,
    auth_origin: Url,
    auth_path: String,
    identity: Identity,
    handler: Option<Box<dyn AuthHandler>>,
    auth_token: Option<String>,
    auth_info: Option<AuthChallengeInfo>,
    embedded_identity_used: bool,
    default_credentials_used: bool,
    disabled_schemes: SchemeSet,
    succeeded: bool,
    gave_up: bool,
    cache: Arc<AuthCache>,
    factory: Arc<dyn AuthHandlerFactory>,
    net_log: BoundNetLog,
}

impl AuthController {
    /// `auth_url` is the request URL for a server, or the proxy URL.
    pub fn new(
        target: Target,
        auth_url: &Url,
        cache: Arc<AuthCache>,
        factory: Arc<dyn AuthHandlerFactory>,
    ) -> Self {
        let auth_path = match target {
            Target::Proxy => String::new(),
            Target::Server => auth_url.path().to_owned(),
        };

        AuthController {
            target,
            auth_url: auth_url.clone(),
            auth_origin: origin_of(auth_url),
            auth_path,
            identity: Identity::default(),
            handler: None,
            auth_token: None,
            auth_info: None,
            embedded_identity_used: false,
            default_credentials_used: false,
            disabled_schemes: SchemeSet::new(),
            succeeded: false,
            gave_up: false,
            cache,
            factory,
            net_log: BoundNetLog::default(),
        }
    }

    pub fn with_net_log(mut self, net_log: BoundNetLog) -> Self {
        self.net_log = net_log;
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn state(&self) -> ControllerState {
        if self.succeeded {
            ControllerState::Succeeded
        } else if self.handler.is_none() {
            if self.gave_up {
                ControllerState::GaveUp
            } else {
                ControllerState::NoHandler
            }
        } else if self.have_auth() {
            ControllerState::HaveAuth
        } else {
            ControllerState::HaveHandler
        }
    }

    /// Generate a token for `request` if there is an identity to use, or if
    /// the cache has credentials covering the request path.
    ///
    /// Scheme-fatal and identity-fatal errors are absorbed: the scheme or
    /// identity is discarded and `Ok` is returned with no token, so the
    /// request goes out and the next challenge picks again.
    pub async fn maybe_generate_auth_token(&mut self, request: &RequestInfo) -> Result<()> {
        self.auth_token = None;
        let needs_auth = self.have_auth() || self.select_preemptive_auth();
        if !needs_auth {
            return Ok(());
        }

        let Some(handler) = self.handler.as_mut() else {
            return Ok(());
        };
        let credentials = match self.identity.source {
            IdentitySource::DefaultCredentials => None,
            _ => Some(&self.identity.credentials),
        };
        let result = handler.generate_auth_token(credentials, request).await;

        match result {
            Ok(token) => {
                if let Some(handler) = self.handler.as_ref() {
                    self.net_log.add_event(NetLogEvent::TokenGenerated {
                        target: self.target,
                        scheme: handler.auth_scheme().to_owned(),
                    });
                }
                self.auth_token = Some(token);
                Ok(())
            }
            Err(err) => {
                let scheme = self
                    .handler
                    .as_ref()
                    .map(|h| h.auth_scheme().to_owned())
                    .unwrap_or_default();
                match err.severity() {
                    Severity::SchemeFatal => {
                        log::debug!("{} auth: disabling {}: {}", self.target, scheme, err);
                        self.invalidate_current_handler(
                            InvalidateHandlerAction::HandlerAndDisableScheme,
                        );
                        Ok(())
                    }
                    Severity::IdentityFatal => {
                        log::debug!("{} auth: discarding identity for {}: {}", self.target, scheme, err);
                        self.net_log.add_event(NetLogEvent::IdentityInvalidated {
                            target: self.target,
                            scheme,
                        });
                        self.invalidate_current_handler(
                            InvalidateHandlerAction::HandlerAndCachedCredentials,
                        );
                        Ok(())
                    }
                    Severity::TransactionFatal => {
                        if err.origin().is_some() {
                            Err(err)
                        } else {
                            Err(err.with_origin(self.auth_origin.clone()))
                        }
                    }
                }
            }
        }
    }

    /// Move the pending token into `headers`.
    pub fn add_authorization_header(&mut self, headers: &mut HeaderMap) -> Result<()> {
        if let Some(token) = self.auth_token.take() {
            let mut value = HeaderValue::from_str(&token).map_err(crate::error::failed)?;
            value.set_sensitive(true);
            headers.insert(self.target.authorization_header_name(), value);
        }
        Ok(())
    }

    /// The token that [`add_authorization_header`](Self::add_authorization_header)
    /// would add.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// React to a `401`/`407` response.
    ///
    /// Keeps the current handler if it accepts the new challenge, otherwise
    /// selects a new one. Afterwards either [`have_auth`](Self::have_auth) is
    /// true, or [`auth_info`](Self::auth_info) says what credentials are
    /// needed, or nothing was usable.
    ///
    /// While establishing a tunnel, a proxy response with no usable
    /// challenge is an error: its body cannot be trusted.
    pub fn handle_auth_challenge(
        &mut self,
        headers: &HeaderMap,
        establishing_tunnel: bool,
    ) -> Result<()> {
        self.succeeded = false;
        self.gave_up = false;
        self.auth_token = None;

        if let Some(handler) = self.handler.as_mut() {
            let (result, challenge_used) = handle_challenge_response(
                handler.as_mut(),
                headers,
                self.target,
                &self.disabled_schemes,
            );
            let realm = handler.realm().to_owned();
            let scheme = handler.auth_scheme().to_owned();

            match result {
                AuthorizationResult::Accept => {}
                AuthorizationResult::Invalid => {
                    self.invalidate_current_handler(
                        InvalidateHandlerAction::HandlerAndCachedCredentials,
                    );
                }
                AuthorizationResult::Reject => {
                    self.net_log.add_event(NetLogEvent::ChallengeRejected {
                        target: self.target,
                        scheme,
                    });
                    self.invalidate_current_handler(
                        InvalidateHandlerAction::HandlerAndCachedCredentials,
                    );
                }
                AuthorizationResult::Stale => {
                    let challenge = challenge_used.unwrap_or_default();
                    if self
                        .cache
                        .update_stale_challenge(&self.auth_origin, &realm, &scheme, &challenge)
                    {
                        self.invalidate_current_handler(InvalidateHandlerAction::Handler);
                    } else {
                        // Stale without a cache entry; the credentials are
                        // not known to be good.
                        self.invalidate_current_handler(
                            InvalidateHandlerAction::HandlerAndCachedCredentials,
                        );
                    }
                }
                AuthorizationResult::DifferentRealm => {
                    // A preemptive guess for the wrong realm does not make
                    // the cached credentials wrong for their own realm.
                    let action = if self.identity.source == IdentitySource::PathLookup {
                        InvalidateHandlerAction::Handler
                    } else {
                        InvalidateHandlerAction::HandlerAndCachedCredentials
                    };
                    self.invalidate_current_handler(action);
                }
            }
        }

        self.identity.invalid = true;

        loop {
            if self.handler.is_none() {
                self.handler = choose_best_challenge(
                    self.factory.as_ref(),
                    headers,
                    self.target,
                    &self.auth_origin,
                    &self.disabled_schemes,
                    &self.net_log,
                );
                if let Some(handler) = self.handler.as_ref() {
                    log::debug!(
                        "{} auth: selected {} for {}",
                        self.target,
                        handler.auth_scheme(),
                        self.auth_origin
                    );
                    self.net_log.add_event(NetLogEvent::SchemeSelected {
                        target: self.target,
                        scheme: handler.auth_scheme().to_owned(),
                    });
                }
            }

            let Some(handler) = self.handler.as_ref() else {
                if establishing_tunnel {
                    return Err(crate::error::proxy_auth_unsupported()
                        .with_origin(self.auth_origin.clone()));
                }
                log::debug!("{} auth: no usable challenge from {}", self.target, self.auth_origin);
                self.gave_up = true;
                return Ok(());
            };

            if handler.needs_identity() {
                self.select_next_auth_identity_to_try();
            } else {
                // Later rounds of a handshake keep the identity they started with.
                self.identity.invalid = false;
            }

            if !self.identity.invalid {
                self.auth_info = None;
                return Ok(());
            }

            let allows_explicit = self
                .handler
                .as_ref()
                .map_or(false, |h| h.allows_explicit_credentials());
            if allows_explicit {
                self.populate_auth_challenge();
                return Ok(());
            }

            // Nothing left to try with this scheme.
            self.invalidate_current_handler(InvalidateHandlerAction::HandlerAndDisableScheme);
        }
    }

    /// Supply an identity after [`auth_info`](Self::auth_info) asked for one.
    ///
    /// With an identity already selected, `credentials` is ignored and the
    /// current identity is stored in the cache instead.
    pub fn reset_auth(&mut self, credentials: AuthCredentials) {
        if self.identity.invalid {
            self.identity = Identity {
                source: IdentitySource::External,
                invalid: false,
                credentials,
            };
        } else if !credentials.is_empty() {
            log::debug!("{} auth: identity already selected, ignoring supplied credentials", self.target);
        }

        match self.identity.source {
            IdentitySource::None | IdentitySource::DefaultCredentials => {}
            _ => {
                if let Some(handler) = self.handler.as_ref() {
                    self.cache.add(
                        &self.auth_origin,
                        handler.realm(),
                        handler.auth_scheme(),
                        handler.challenge(),
                        &self.identity.credentials,
                        &self.auth_path,
                    );
                }
            }
        }
    }

    /// The server accepted the last authorization.
    pub fn on_auth_accepted(&mut self) {
        if self.handler.is_some() {
            self.succeeded = true;
        }
    }

    /// A connection-based handshake cannot survive its connection.
    pub fn on_connection_closed(&mut self) {
        if self.handler.as_ref().map_or(false, |h| h.is_connection_based()) {
            self.invalidate_current_handler(InvalidateHandlerAction::Handler);
        }
    }

    pub fn have_auth_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn have_auth(&self) -> bool {
        self.handler.is_some() && !self.identity.invalid
    }

    /// What the embedder needs to prompt for credentials, set when no
    /// identity could be found.
    pub fn auth_info(&self) -> Option<&AuthChallengeInfo> {
        self.auth_info.as_ref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_auth_scheme_disabled(&self, scheme: &str) -> bool {
        self.disabled_schemes.contains(scheme)
    }

    pub fn disable_auth_scheme(&mut self, scheme: &str) {
        if self.disabled_schemes.insert(scheme) {
            self.net_log.add_event(NetLogEvent::SchemeDisabled {
                target: self.target,
                scheme: scheme.to_owned(),
            });
        }
    }

    pub fn disabled_schemes(&self) -> &SchemeSet {
        &self.disabled_schemes
    }

    /// Never use the `user:pass@` part of the URL.
    pub fn disable_embedded_identity(&mut self) {
        self.embedded_identity_used = true;
    }

    fn select_preemptive_auth(&mut self) -> bool {
        if self.handler.is_some() {
            return false;
        }
        // The URL's identity must first be challenged for.
        if !self.auth_url.username().is_empty() {
            return false;
        }

        let Some(entry) = self.cache.lookup_by_path(&self.auth_origin, &self.auth_path) else {
            return false;
        };
        if self.disabled_schemes.contains(entry.scheme()) {
            return false;
        }

        let nonce_count = self
            .cache
            .increment_nonce_count(entry.origin(), entry.realm(), entry.scheme())
            .unwrap_or(entry.nonce_count() + 1);
        let handler = match self.factory.create_preemptive_auth_handler(
            &entry,
            self.target,
            nonce_count,
            &self.net_log,
        ) {
            Ok(handler) => handler,
            Err(e) => {
                log::trace!("{} auth: no preemptive {} handler: {}", self.target, entry.scheme(), e);
                return false;
            }
        };

        log::debug!(
            "{} auth: preemptive {} for {}{}",
            self.target,
            entry.scheme(),
            self.auth_origin,
            self.auth_path
        );
        self.identity = Identity {
            source: IdentitySource::PathLookup,
            invalid: false,
            credentials: entry.credentials().clone(),
        };
        self.handler = Some(handler);
        true
    }

    /// URL identity (servers only, once), then the realm cache, then the
    /// logged-in user (once, if the handler allows it).
    fn select_next_auth_identity_to_try(&mut self) -> bool {
        let Some(handler) = self.handler.as_ref() else {
            return false;
        };

        if self.target == Target::Server
            && !self.auth_url.username().is_empty()
            && !self.embedded_identity_used
        {
            let username = percent_decode_str(self.auth_url.username()).decode_utf8_lossy();
            let password =
                percent_decode_str(self.auth_url.password().unwrap_or_default()).decode_utf8_lossy();
            self.identity = Identity {
                source: IdentitySource::Url,
                invalid: false,
                credentials: AuthCredentials::new(username, password),
            };
            self.embedded_identity_used = true;
            return true;
        }

        if let Some(entry) =
            self.cache
                .lookup_by_realm(&self.auth_origin, handler.realm(), handler.auth_scheme())
        {
            self.identity = Identity {
                source: IdentitySource::RealmLookup,
                invalid: false,
                credentials: entry.credentials().clone(),
            };
            return true;
        }

        if !self.default_credentials_used && handler.allows_default_credentials() {
            self.identity = Identity {
                source: IdentitySource::DefaultCredentials,
                invalid: false,
                credentials: AuthCredentials::default(),
            };
            self.default_credentials_used = true;
            return true;
        }

        false
    }

    fn invalidate_current_handler(&mut self, action: InvalidateHandlerAction) {
        let Some(handler) = self.handler.take() else {
            return;
        };

        match action {
            InvalidateHandlerAction::Handler => {}
            InvalidateHandlerAction::HandlerAndCachedCredentials => {
                self.cache.remove(
                    &self.auth_origin,
                    handler.realm(),
                    handler.auth_scheme(),
                    &self.identity.credentials,
                );
            }
            InvalidateHandlerAction::HandlerAndDisableScheme => {
                self.disable_auth_scheme(handler.auth_scheme());
            }
        }

        self.identity = Identity::default();
    }

    fn populate_auth_challenge(&mut self) {
        self.auth_info = self.handler.as_ref().map(|handler| AuthChallengeInfo {
            is_proxy: self.target == Target::Proxy,
            challenger: self.auth_origin.clone(),
            scheme: handler.auth_scheme().to_owned(),
            realm: handler.realm().to_owned(),
            challenge: handler.challenge().to_owned(),
        });
    }
}
