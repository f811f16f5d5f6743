// src/auth/basic.rs

//! The "Basic" scheme (RFC 7617): `base64(username ":" password)`.

use base64::Engine as _;
use futures_util::future::{self, FutureExt};
use url::Url;

use super::challenge::parse_realm;
use super::{
    AuthCredentials, AuthHandler, AuthHandlerFactory, AuthorizationResult, ChallengeTokenizer,
    CreateReason, HandlerState, RequestInfo, Target, TokenFuture, SCHEME_BASIC,
};
use crate::netlog::BoundNetLog;
use crate::Result;

#[derive(Debug)]
pub struct BasicHandler {
    state: HandlerState,
}

impl BasicHandler {
    /// Returns `None` if the challenge is not Basic or its params are
    /// malformed. A missing realm is the empty realm.
    pub fn init_from_challenge(
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        net_log: &BoundNetLog,
    ) -> Option<Self> {
        if challenge.scheme() != SCHEME_BASIC {
            return None;
        }
        let realm = parse_realm(challenge)?;
        Some(BasicHandler {
            state: HandlerState::new(SCHEME_BASIC, realm, challenge, target, origin, net_log),
        })
    }
}

impl AuthHandler for BasicHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn handle_another_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult {
        // Basic has no continuation; a second challenge means the credentials
        // were refused, unless it moved to another realm.
        match parse_realm(challenge) {
            None => AuthorizationResult::Invalid,
            Some(realm) if realm != self.state.realm() => AuthorizationResult::DifferentRealm,
            Some(_) => AuthorizationResult::Reject,
        }
    }

    fn generate_auth_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        _request: &'a RequestInfo,
    ) -> TokenFuture<'a> {
        let token = match credentials {
            Some(credentials) => {
                let pair = format!("{}:{}", credentials.username(), credentials.password());
                Ok(format!(
                    "Basic {}",
                    base64::engine::general_purpose::STANDARD.encode(pair.as_bytes())
                ))
            }
            None => Err(crate::error::missing_credentials(
                "Basic requires explicit credentials",
            )),
        };
        future::ready(token).boxed()
    }
}

/// Builds [`BasicHandler`]s. Preemptive use is allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicFactory;

impl BasicFactory {
    pub fn new() -> Self {
        BasicFactory
    }
}

impl AuthHandlerFactory for BasicFactory {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        _reason: CreateReason,
        _digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        match BasicHandler::init_from_challenge(challenge, target, origin, net_log) {
            Some(handler) => Ok(Box::new(handler)),
            None => Err(crate::error::invalid_response(format!(
                "malformed Basic challenge: {:?}",
                challenge.challenge_text()
            ))),
        }
    }
}
