// src/auth/mod.rs

//! HTTP authentication negotiation.
//!
//! A response carrying `401 Unauthorized` or `407 Proxy Authentication
//! Required` lists one or more challenges. This module turns those challenges
//! into handlers, picks the strongest one, and drives it until the server
//! accepts the request or every usable scheme has been tried:
//!
//! - [`ChallengeTokenizer`] splits a single challenge into scheme and params.
//! - [`AuthHandler`] implementations produce `Authorization` header values
//!   for Basic, Digest, NTLM and Negotiate.
//! - [`AuthHandlerRegistry`] maps scheme names to handler factories.
//! - [`AuthController`] keeps the per-target state across round trips.
//! - [`AuthCache`] remembers accepted credentials for reuse.
//! - [`UrlSecurityManager`] decides where ambient credentials may be sent.

use std::fmt;

use http::header::{self, HeaderName};
use http::HeaderMap;
use url::Url;

use crate::netlog::{BoundNetLog, NetLogEvent};

mod basic;
mod cache;
mod challenge;
mod controller;
mod digest;
mod factory;
mod handler;
mod library;
pub mod mock;
mod negotiate;
mod ntlm;
mod scheme_set;
mod security;
pub mod transaction;

pub use self::basic::{BasicFactory, BasicHandler};
pub use self::cache::{AuthCache, Entry};
pub use self::challenge::{normalize_scheme, ChallengeTokenizer, ParamPairs};
pub use self::controller::{AuthController, ControllerState};
pub use self::digest::{
    DigestFactory, DigestHandler, DynamicNonceGenerator, FixedNonceGenerator, NonceGenerator,
};
pub use self::factory::{AuthHandlerFactory, AuthHandlerRegistry, AuthPreferences};
pub use self::handler::{AuthHandler, CreateReason, HandlerState, RequestInfo, TokenFuture};
pub use self::library::{
    AuthLibrary, BlockingAuthLibrary, BlockingSecurityContext, BlockingSecurityLibrary,
    MockAuthLibrary, MockRound, SecurityContext,
};
pub use self::negotiate::{HostResolver, NegotiateFactory, NegotiateHandler};
pub use self::ntlm::{NtlmFactory, NtlmHandler};
pub use self::scheme_set::SchemeSet;
pub use self::security::{AuthFilterAllowlist, UrlSecurityManager};

pub const SCHEME_BASIC: &str = "basic";
pub const SCHEME_DIGEST: &str = "digest";
pub const SCHEME_NTLM: &str = "ntlm";
pub const SCHEME_NEGOTIATE: &str = "negotiate";
pub const SCHEME_MOCK: &str = "mock";

/// Who is asking for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Proxy,
    Server,
}

impl Target {
    /// The response header carrying challenges for this target.
    pub fn challenge_header_name(self) -> HeaderName {
        match self {
            Target::Proxy => header::PROXY_AUTHENTICATE,
            Target::Server => header::WWW_AUTHENTICATE,
        }
    }

    /// The request header carrying credentials for this target.
    pub fn authorization_header_name(self) -> HeaderName {
        match self {
            Target::Proxy => header::PROXY_AUTHORIZATION,
            Target::Server => header::AUTHORIZATION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Proxy => "proxy",
            Target::Server => "server",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed preference order between schemes. Higher wins; unknown schemes
/// score zero so that any known scheme beats them.
pub fn scheme_priority(scheme: &str) -> u8 {
    match scheme {
        SCHEME_NEGOTIATE => 4,
        SCHEME_NTLM => 3,
        SCHEME_DIGEST => 2,
        SCHEME_BASIC => 1,
        _ => 0,
    }
}

/// A handler's verdict on a follow-up challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// Continue the handshake with the same handler.
    Accept,
    /// The server refused; the identity was wrong.
    Reject,
    /// The server refused only because the nonce expired.
    Stale,
    /// The challenge could not be understood.
    Invalid,
    /// The server wants credentials for another realm.
    DifferentRealm,
}

/// A username and password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthCredentials {
    username: String,
    password: String,
}

impl AuthCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthCredentials {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the current identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentitySource {
    #[default]
    None,
    /// Found in the cache by request path, before any challenge.
    PathLookup,
    /// Embedded in the request URL.
    Url,
    /// Found in the cache by realm after a challenge.
    RealmLookup,
    /// Supplied by the embedder, usually from a prompt.
    External,
    /// The platform's logged-in user.
    DefaultCredentials,
}

/// The identity a controller will present with the next token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub source: IdentitySource,
    pub invalid: bool,
    pub credentials: AuthCredentials,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            source: IdentitySource::None,
            invalid: true,
            credentials: AuthCredentials::default(),
        }
    }
}

/// What an embedder needs to prompt for credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallengeInfo {
    pub is_proxy: bool,
    pub challenger: Url,
    pub scheme: String,
    pub realm: String,
    pub challenge: String,
}

/// `scheme://host:port/` of a URL, without userinfo.
pub(crate) fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    let _ = origin.set_username("");
    let _ = origin.set_password(None);
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Pick the strongest usable challenge among those in `headers`.
///
/// Challenges whose scheme is in `disabled`, and challenges no handler can
/// be built for, are skipped. Among the rest the highest score wins, and the
/// first one seen wins a tie.
pub fn choose_best_challenge(
    factory: &dyn AuthHandlerFactory,
    headers: &HeaderMap,
    target: Target,
    origin: &Url,
    disabled: &SchemeSet,
    net_log: &BoundNetLog,
) -> Option<Box<dyn AuthHandler>> {
    let mut best: Option<Box<dyn AuthHandler>> = None;

    for value in headers.get_all(target.challenge_header_name()) {
        let challenge = ChallengeTokenizer::from_header(value);
        if disabled.contains(challenge.scheme()) {
            continue;
        }

        let handler = match factory.create_auth_handler(
            &challenge,
            target,
            origin,
            CreateReason::Challenge,
            1,
            net_log,
        ) {
            Ok(handler) => handler,
            Err(e) => {
                log::trace!("unable to create handler for {:?}: {}", challenge.challenge_text(), e);
                net_log.add_event(NetLogEvent::HandlerCreationFailed {
                    target,
                    challenge: challenge.challenge_text().to_owned(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match best {
            Some(ref current) if current.score() >= handler.score() => {}
            _ => best = Some(handler),
        }
    }

    best
}

/// Let an existing handler react to the challenges of a new response.
///
/// Only challenges of the handler's own scheme are considered. `Invalid`
/// results are skipped so a later well-formed challenge can still be used.
/// Returns the verdict and the challenge text that produced it. The text is
/// `None` when the scheme is disabled or no challenge of the scheme was
/// usable; that case is reported as `Reject`.
pub fn handle_challenge_response(
    handler: &mut dyn AuthHandler,
    headers: &HeaderMap,
    target: Target,
    disabled: &SchemeSet,
) -> (AuthorizationResult, Option<String>) {
    let scheme = handler.auth_scheme().to_owned();
    if disabled.contains(&scheme) {
        return (AuthorizationResult::Reject, None);
    }

    for value in headers.get_all(target.challenge_header_name()) {
        let challenge = ChallengeTokenizer::from_header(value);
        if challenge.scheme() != scheme {
            continue;
        }
        match handler.handle_another_challenge(&challenge) {
            AuthorizationResult::Invalid => continue,
            result => return (result, Some(challenge.challenge_text().to_owned())),
        }
    }

    // Finding no matches is equivalent to rejection.
    (AuthorizationResult::Reject, None)
}
