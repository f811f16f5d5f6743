// src/auth/handler.rs

use std::fmt;

use futures_util::future::BoxFuture;
use http::Method;
use url::Url;

use super::{scheme_priority, AuthCredentials, AuthorizationResult, ChallengeTokenizer, Target};
use crate::netlog::BoundNetLog;
use crate::Result;

/// The future returned by [`AuthHandler::generate_auth_token`].
///
/// It borrows the handler. Dropping it before completion cancels the
/// generation; the handler must not be used for this round afterwards.
pub type TokenFuture<'a> = BoxFuture<'a, Result<String>>;

/// Why a handler is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateReason {
    /// In response to a challenge in a 401/407.
    Challenge,
    /// From a cache entry, before any challenge was seen.
    Preemptive,
}

/// The parts of the outgoing request a handler may need for its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub url: Url,
}

impl RequestInfo {
    pub fn new(method: Method, url: Url) -> Self {
        RequestInfo { method, url }
    }

    /// Build from an `http::Request`, whose URI must be absolute.
    ///
    /// `CONNECT` requests carry only an authority; they are treated as
    /// `https://authority/`, which is what a tunnel is for.
    pub fn from_request<B>(request: &http::Request<B>) -> Result<Self> {
        let uri = request.uri();
        let url = if request.method() == Method::CONNECT {
            let authority = uri
                .authority()
                .ok_or_else(|| crate::error::failed("CONNECT request without authority"))?;
            Url::parse(&format!("https://{}/", authority))
        } else {
            Url::parse(&uri.to_string())
        }
        .map_err(crate::error::failed)?;

        Ok(RequestInfo::new(request.method().clone(), url))
    }
}

/// State every handler carries once it has been initialized from a
/// challenge.
#[derive(Debug, Clone)]
pub struct HandlerState {
    auth_scheme: String,
    realm: String,
    challenge: String,
    target: Target,
    origin: Url,
    net_log: BoundNetLog,
}

impl HandlerState {
    pub fn new(
        auth_scheme: &str,
        realm: String,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        net_log: &BoundNetLog,
    ) -> Self {
        HandlerState {
            auth_scheme: auth_scheme.to_owned(),
            realm,
            challenge: challenge.challenge_text().to_owned(),
            target,
            origin: origin.clone(),
            net_log: net_log.clone(),
        }
    }

    pub fn auth_scheme(&self) -> &str {
        &self.auth_scheme
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn net_log(&self) -> &BoundNetLog {
        &self.net_log
    }

    pub fn score(&self) -> u8 {
        scheme_priority(&self.auth_scheme)
    }
}

/// One instance of an authentication scheme, bound to a single challenge.
///
/// Handlers are built by an [`AuthHandlerFactory`](super::AuthHandlerFactory)
/// and owned by exactly one controller.
pub trait AuthHandler: Send + fmt::Debug {
    fn state(&self) -> &HandlerState;

    /// React to a further challenge of the same scheme.
    fn handle_another_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult;

    /// Produce the value of the next authorization header.
    ///
    /// `credentials` is `None` only when default credentials are used, which
    /// requires [`allows_default_credentials`](AuthHandler::allows_default_credentials).
    fn generate_auth_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        request: &'a RequestInfo,
    ) -> TokenFuture<'a>;

    /// Whether the controller must find an identity before the next token.
    fn needs_identity(&self) -> bool {
        true
    }

    /// Whether the logged-in user may be used without asking.
    fn allows_default_credentials(&self) -> bool {
        false
    }

    fn allows_explicit_credentials(&self) -> bool {
        true
    }

    /// Whether the handshake is bound to one connection.
    fn is_connection_based(&self) -> bool {
        false
    }

    /// Whether the identity is protected on the wire.
    fn encrypts_identity(&self) -> bool {
        false
    }

    fn auth_scheme(&self) -> &str {
        self.state().auth_scheme()
    }

    fn realm(&self) -> &str {
        self.state().realm()
    }

    fn challenge(&self) -> &str {
        self.state().challenge()
    }

    fn target(&self) -> Target {
        self.state().target()
    }

    fn origin(&self) -> &Url {
        self.state().origin()
    }

    fn score(&self) -> u8 {
        self.state().score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_info_from_absolute_request() {
        let request = http::Request::get("http://www.example.com/a/b?c=d")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&request).unwrap();
        assert_eq!(info.method, Method::GET);
        assert_eq!(info.url.as_str(), "http://www.example.com/a/b?c=d");
    }

    #[test]
    fn request_info_from_connect() {
        let request = http::Request::builder()
            .method(Method::CONNECT)
            .uri("www.example.com:443")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&request).unwrap();
        assert_eq!(info.url.as_str(), "https://www.example.com/");
    }

    #[test]
    fn request_info_rejects_relative_uri() {
        let request = http::Request::get("/only/a/path").body(()).unwrap();
        assert!(RequestInfo::from_request(&request).is_err());
    }

    #[test]
    fn state_score_follows_scheme() {
        let origin = Url::parse("http://www.example.com").unwrap();
        let challenge = ChallengeTokenizer::new("Digest realm=\"x\"");
        let state = HandlerState::new(
            "digest",
            "x".into(),
            &challenge,
            Target::Server,
            &origin,
            &BoundNetLog::default(),
        );
        assert_eq!(state.score(), 2);
        assert_eq!(state.challenge(), "Digest realm=\"x\"");
    }
}
