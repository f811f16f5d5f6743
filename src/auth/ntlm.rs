// src/auth/ntlm.rs

//! The "NTLM" scheme. A three-leg, connection-based handshake whose tokens
//! come from an [`AuthLibrary`].

use std::sync::Arc;

use base64::Engine as _;
use futures_util::future::FutureExt;
use url::Url;

use super::library::Handshake;
use super::negotiate::derive_spn;
use super::{
    AuthCredentials, AuthHandler, AuthHandlerFactory, AuthLibrary, AuthorizationResult,
    ChallengeTokenizer, CreateReason, HandlerState, RequestInfo, Target, TokenFuture,
    UrlSecurityManager, SCHEME_NTLM,
};
use crate::netlog::BoundNetLog;
use crate::Result;

#[derive(Debug)]
pub struct NtlmHandler {
    state: HandlerState,
    handshake: Handshake,
    security: Arc<UrlSecurityManager>,
    library_allows_explicit: bool,
}

impl NtlmHandler {
    /// The initial challenge must be a bare `NTLM`.
    pub fn init_from_challenge(
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        library: &dyn AuthLibrary,
        security: Arc<UrlSecurityManager>,
        net_log: &BoundNetLog,
    ) -> Option<Self> {
        let mut handshake = Handshake::new(SCHEME_NTLM, library.new_context(SCHEME_NTLM, false));
        if handshake.parse_challenge(challenge) != AuthorizationResult::Accept {
            return None;
        }

        Some(NtlmHandler {
            state: HandlerState::new(SCHEME_NTLM, String::new(), challenge, target, origin, net_log),
            handshake,
            security,
            library_allows_explicit: library.allows_explicit_credentials(),
        })
    }
}

impl AuthHandler for NtlmHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn handle_another_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult {
        self.handshake.parse_challenge(challenge)
    }

    fn generate_auth_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        _request: &'a RequestInfo,
    ) -> TokenFuture<'a> {
        async move {
            let spn = derive_spn(self.state.origin(), None, false)?;
            let token = self.handshake.generate(credentials, &spn).await?;
            Ok(format!(
                "NTLM {}",
                base64::engine::general_purpose::STANDARD.encode(token)
            ))
        }
        .boxed()
    }

    fn needs_identity(&self) -> bool {
        !self.handshake.is_established()
    }

    fn allows_default_credentials(&self) -> bool {
        match self.state.target() {
            Target::Proxy => self.security.ntlm_ambient_credentials(),
            Target::Server => self
                .security
                .can_use_ambient_credentials_for_ntlm(self.state.origin()),
        }
    }

    fn allows_explicit_credentials(&self) -> bool {
        self.library_allows_explicit
            && (self.state.target() == Target::Proxy
                || self
                    .security
                    .can_use_explicit_credentials_for_ntlm(self.state.origin()))
    }

    fn is_connection_based(&self) -> bool {
        true
    }

    fn encrypts_identity(&self) -> bool {
        true
    }
}

/// Builds [`NtlmHandler`]s. Never preemptive, since the handshake needs a
/// fresh connection-bound context.
#[derive(Debug, Clone)]
pub struct NtlmFactory {
    library: Arc<dyn AuthLibrary>,
    security: Arc<UrlSecurityManager>,
}

impl NtlmFactory {
    pub fn new(library: Arc<dyn AuthLibrary>, security: Arc<UrlSecurityManager>) -> Self {
        NtlmFactory { library, security }
    }
}

impl AuthHandlerFactory for NtlmFactory {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        reason: CreateReason,
        _digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        if reason == CreateReason::Preemptive {
            return Err(crate::error::unsupported_scheme(
                "NTLM cannot be used preemptively",
            ));
        }
        if !self.library.init() {
            return Err(crate::error::unsupported_scheme(
                "NTLM security library is unavailable",
            ));
        }

        NtlmHandler::init_from_challenge(
            challenge,
            target,
            origin,
            self.library.as_ref(),
            self.security.clone(),
            net_log,
        )
        .map(|handler| Box::new(handler) as Box<dyn AuthHandler>)
        .ok_or_else(|| {
            crate::error::invalid_response(format!(
                "unexpected NTLM challenge: {:?}",
                challenge.challenge_text()
            ))
        })
    }
}
