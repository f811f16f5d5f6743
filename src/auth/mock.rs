// src/auth/mock.rs

//! Scripted handlers for driving an [`AuthController`](super::AuthController)
//! through a known sequence of rounds.
//!
//! A [`MockFactory`] holds a queue of [`MockHandler`] scripts per target.
//! Each challenge pops the first queued script whose scheme matches, so a
//! test lists the handlers it expects in the order they will be built.
//!
//! Tokens are readable strings: `"<scheme> auth_token"` on a first round,
//! with `",<params>"` appended when the challenge had params, and
//! `"<scheme> continuation,<decoded blob>"` after an accepted follow-up
//! challenge.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use base64::Engine as _;
use futures_util::future::FutureExt;
use url::Url;

use super::challenge::{parse_realm, LENIENT_BASE64};
use super::{
    normalize_scheme, AuthCredentials, AuthHandler, AuthHandlerFactory, AuthorizationResult,
    ChallengeTokenizer, CreateReason, HandlerState, RequestInfo, Target, TokenFuture,
    SCHEME_MOCK, SCHEME_NEGOTIATE, SCHEME_NTLM,
};
use crate::netlog::BoundNetLog;
use crate::{Error, Result};

/// The script for one mock handler.
#[derive(Debug)]
pub struct MockHandler {
    scheme: String,
    init_error: Option<Error>,
    generate_async: bool,
    generate_error: Option<Error>,
    allows_default: bool,
    allows_explicit: bool,
    connection_based: Option<bool>,
}

impl MockHandler {
    pub fn new() -> Self {
        MockHandler {
            scheme: SCHEME_MOCK.to_owned(),
            init_error: None,
            generate_async: false,
            generate_error: None,
            allows_default: false,
            allows_explicit: true,
            connection_based: None,
        }
    }

    /// The scheme this handler answers. `ntlm` and `negotiate` default to
    /// connection-based.
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = normalize_scheme(scheme).unwrap_or_default();
        self
    }

    /// Fail creation with `err`.
    pub fn fail_init(mut self, err: Error) -> Self {
        self.init_error = Some(err);
        self
    }

    /// Yield to the runtime before each token completes.
    pub fn generate_async(mut self, asynchronous: bool) -> Self {
        self.generate_async = asynchronous;
        self
    }

    /// Fail the first token generation with `err`.
    pub fn fail_generate(mut self, err: Error) -> Self {
        self.generate_error = Some(err);
        self
    }

    pub fn allows_default_credentials(mut self, allows: bool) -> Self {
        self.allows_default = allows;
        self
    }

    pub fn allows_explicit_credentials(mut self, allows: bool) -> Self {
        self.allows_explicit = allows;
        self
    }

    pub fn connection_based(mut self, connection_based: bool) -> Self {
        self.connection_based = Some(connection_based);
        self
    }

    fn init(
        self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        net_log: &BoundNetLog,
    ) -> Result<MockAuthHandler> {
        if let Some(err) = self.init_error {
            return Err(err);
        }

        let connection_based = self
            .connection_based
            .unwrap_or(matches!(self.scheme.as_str(), SCHEME_NTLM | SCHEME_NEGOTIATE));
        let realm = parse_realm(challenge).unwrap_or_default();

        Ok(MockAuthHandler {
            state: HandlerState::new(&self.scheme, realm, challenge, target, origin, net_log),
            params: challenge.params().to_owned(),
            generate_async: self.generate_async,
            generate_error: self.generate_error,
            allows_default: self.allows_default,
            allows_explicit: self.allows_explicit,
            connection_based,
            first_round: true,
            continuation: None,
        })
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        MockHandler::new()
    }
}

/// A live mock handler, built from a [`MockHandler`] script.
#[derive(Debug)]
pub struct MockAuthHandler {
    state: HandlerState,
    params: String,
    generate_async: bool,
    generate_error: Option<Error>,
    allows_default: bool,
    allows_explicit: bool,
    connection_based: bool,
    first_round: bool,
    continuation: Option<String>,
}

impl AuthHandler for MockAuthHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn handle_another_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult {
        if challenge.scheme() != self.state.auth_scheme() {
            return AuthorizationResult::Invalid;
        }
        let encoded = challenge.base64_param();
        if !self.connection_based || encoded.is_empty() {
            return AuthorizationResult::Reject;
        }
        match LENIENT_BASE64.decode(encoded) {
            Ok(blob) => {
                self.continuation = Some(String::from_utf8_lossy(&blob).into_owned());
                AuthorizationResult::Accept
            }
            Err(_) => AuthorizationResult::Invalid,
        }
    }

    fn generate_auth_token<'a>(
        &'a mut self,
        _credentials: Option<&'a AuthCredentials>,
        _request: &'a RequestInfo,
    ) -> TokenFuture<'a> {
        async move {
            if self.generate_async {
                tokio::task::yield_now().await;
            }
            if let Some(err) = self.generate_error.take() {
                return Err(err);
            }
            self.first_round = false;

            let continuation = self.continuation.take();
            let scheme = self.state.auth_scheme();
            let token = match continuation {
                Some(blob) => format!("{} continuation,{}", scheme, blob),
                None if self.params.is_empty() => format!("{} auth_token", scheme),
                None => format!("{} auth_token,{}", scheme, self.params),
            };
            Ok(token)
        }
        .boxed()
    }

    fn needs_identity(&self) -> bool {
        self.first_round
    }

    fn allows_default_credentials(&self) -> bool {
        self.allows_default
    }

    fn allows_explicit_credentials(&self) -> bool {
        self.allows_explicit
    }

    fn is_connection_based(&self) -> bool {
        self.connection_based
    }
}

/// Hands out queued [`MockHandler`]s.
///
/// A challenge with no matching script is refused as an unsupported scheme.
#[derive(Debug, Default)]
pub struct MockFactory {
    handlers: Mutex<HashMap<Target, VecDeque<MockHandler>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mock_handler(&self, handler: MockHandler, target: Target) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target)
            .or_default()
            .push_back(handler);
    }

    /// Whether scripts remain for `target`.
    pub fn have_auth_handlers(&self, target: Target) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .map_or(false, |queue| !queue.is_empty())
    }
}

impl AuthHandlerFactory for MockFactory {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        _reason: CreateReason,
        _digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        let script = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.get_mut(&target).and_then(|queue| {
                let index = queue
                    .iter()
                    .position(|script| script.scheme == challenge.scheme())?;
                queue.remove(index)
            })
        };

        let script = script.ok_or_else(|| {
            crate::error::unsupported_scheme(format!(
                "no mock handler queued for {:?}",
                challenge.scheme()
            ))
        })?;
        let handler = script.init(challenge, target, origin, net_log)?;
        Ok(Box::new(handler))
    }
}
