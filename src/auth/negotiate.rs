// src/auth/negotiate.rs

//! HTTP Negotiate protocol implementation (RFC 4559).
//!
//! Negotiate wraps Kerberos or NTLM in SPNEGO. Tokens come from an
//! [`AuthLibrary`]; this module owns the per-handshake state machine:
//!
//! ```text
//! Initialize -> InitializeComplete
//!     -> ResolveCanonicalName -> ResolveCanonicalNameComplete
//!     -> GenerateAuthToken -> GenerateAuthTokenComplete
//! ```
//!
//! Only the first round runs the whole machine. Later rounds of the same
//! handshake jump straight to `GenerateAuthToken` with the SPN already known.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use futures_util::future::{BoxFuture, FutureExt};
use url::Url;

use super::library::Handshake;
use super::{
    AuthCredentials, AuthHandler, AuthHandlerFactory, AuthLibrary, AuthorizationResult,
    ChallengeTokenizer, CreateReason, HandlerState, RequestInfo, Target, TokenFuture,
    UrlSecurityManager, SCHEME_NEGOTIATE,
};
use crate::netlog::{BoundNetLog, NetLogEvent};
use crate::Result;

/// Resolves a host to its canonical DNS name, used to build the SPN.
pub trait HostResolver: Send + Sync + fmt::Debug {
    fn resolve_canonical_name<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Derive the Service Principal Name (SPN) for an origin.
///
/// For HTTP authentication, the SPN format is "HTTP/<hostname>", using the
/// canonical name when one was resolved. The port is appended only when
/// `use_port` is set and the origin uses a non-default port.
///
/// # Examples
/// ```ignore
/// assert_eq!(derive_spn(&"http://example.com/path".parse()?, None, false)?, "HTTP/example.com");
/// assert_eq!(derive_spn(&"https://server.corp.com:8080/".parse()?, None, true)?, "HTTP/server.corp.com:8080");
/// ```
pub(crate) fn derive_spn(origin: &Url, canonical_name: Option<&str>, use_port: bool) -> Result<String> {
    let host = match canonical_name {
        Some(name) => name,
        None => origin
            .host_str()
            .ok_or_else(|| crate::error::failed("URL has no host for SPN"))?,
    };

    match origin.port() {
        Some(port) if use_port => Ok(format!("HTTP/{}:{}", host, port)),
        _ => Ok(format!("HTTP/{}", host)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Initialize,
    InitializeComplete,
    ResolveCanonicalName,
    ResolveCanonicalNameComplete,
    GenerateAuthToken,
    GenerateAuthTokenComplete,
}

#[derive(Debug, Clone, Copy, Default)]
struct Options {
    disable_cname_lookup: bool,
    use_port: bool,
}

#[derive(Debug)]
pub struct NegotiateHandler {
    state: HandlerState,
    handshake: Handshake,
    library: Arc<dyn AuthLibrary>,
    resolver: Option<Arc<dyn HostResolver>>,
    security: Arc<UrlSecurityManager>,
    options: Options,
    already_called: bool,
    credentials: Option<AuthCredentials>,
    next_state: State,
    resolved: Option<Result<String>>,
    spn: String,
    auth_token: Option<Vec<u8>>,
}

impl NegotiateHandler {
    fn init_from_challenge(
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        factory: &NegotiateFactory,
        net_log: &BoundNetLog,
    ) -> Option<Self> {
        if challenge.scheme() != SCHEME_NEGOTIATE {
            return None;
        }

        // Libraries that cannot take a username and password are useless
        // where ambient credentials are not allowed.
        let allows_default = target == Target::Proxy
            || factory.security.can_use_ambient_credentials_for_negotiate(origin);
        if !factory.library.allows_explicit_credentials() && !allows_default {
            log::debug!("negotiate: no usable credentials for {}", origin);
            return None;
        }

        let delegate = factory.security.can_delegate(origin);
        let mut handshake = Handshake::new(
            SCHEME_NEGOTIATE,
            factory.library.new_context(SCHEME_NEGOTIATE, delegate),
        );
        if handshake.parse_challenge(challenge) != AuthorizationResult::Accept {
            return None;
        }

        Some(NegotiateHandler {
            state: HandlerState::new(
                SCHEME_NEGOTIATE,
                String::new(),
                challenge,
                target,
                origin,
                net_log,
            ),
            handshake,
            library: factory.library.clone(),
            resolver: factory.resolver.clone(),
            security: factory.security.clone(),
            options: factory.options,
            already_called: false,
            credentials: None,
            next_state: State::None,
            resolved: None,
            spn: String::new(),
            auth_token: None,
        })
    }

    /// The SPN used by this handshake, once the first round has run.
    pub fn spn(&self) -> &str {
        &self.spn
    }

    async fn do_loop(&mut self) -> Result<String> {
        loop {
            let state = std::mem::replace(&mut self.next_state, State::None);
            match state {
                State::Initialize => self.do_initialize()?,
                State::InitializeComplete => self.do_initialize_complete(),
                State::ResolveCanonicalName => self.do_resolve_canonical_name().await,
                State::ResolveCanonicalNameComplete => self.do_resolve_canonical_name_complete()?,
                State::GenerateAuthToken => self.do_generate_auth_token().await?,
                State::GenerateAuthTokenComplete => return self.do_generate_auth_token_complete(),
                State::None => {
                    return Err(crate::error::failed("negotiate handler has no pending step"));
                }
            }
        }
    }

    fn do_initialize(&mut self) -> Result<()> {
        self.next_state = State::InitializeComplete;
        if !self.library.init() {
            return Err(crate::error::unsupported_scheme(
                "Negotiate security library is unavailable",
            ));
        }
        Ok(())
    }

    fn do_initialize_complete(&mut self) {
        self.next_state = State::ResolveCanonicalName;
    }

    async fn do_resolve_canonical_name(&mut self) {
        self.next_state = State::ResolveCanonicalNameComplete;
        self.resolved = None;
        if self.options.disable_cname_lookup {
            return;
        }
        let Some(resolver) = self.resolver.clone() else {
            return;
        };
        let host = self.state.origin().host_str().unwrap_or_default().to_owned();
        self.resolved = Some(resolver.resolve_canonical_name(&host).await);
    }

    fn do_resolve_canonical_name_complete(&mut self) -> Result<()> {
        let canonical_name = match self.resolved.take() {
            Some(Ok(name)) => Some(name),
            Some(Err(e)) => {
                // Fall back to the host name in the origin.
                let host = self.state.origin().host_str().unwrap_or_default().to_owned();
                log::debug!("canonical name lookup for {} failed: {}", host, e);
                self.state.net_log().add_event(NetLogEvent::CanonicalNameFallback {
                    host,
                    reason: e.to_string(),
                });
                None
            }
            None => None,
        };

        self.spn = derive_spn(
            self.state.origin(),
            canonical_name.as_deref(),
            self.options.use_port,
        )?;
        self.already_called = true;
        self.next_state = State::GenerateAuthToken;
        Ok(())
    }

    async fn do_generate_auth_token(&mut self) -> Result<()> {
        self.next_state = State::GenerateAuthTokenComplete;
        let token = self
            .handshake
            .generate(self.credentials.as_ref(), &self.spn)
            .await?;
        self.auth_token = Some(token);
        Ok(())
    }

    fn do_generate_auth_token_complete(&mut self) -> Result<String> {
        let token = self
            .auth_token
            .take()
            .ok_or_else(|| crate::error::failed("negotiate produced no token"))?;
        Ok(format!(
            "Negotiate {}",
            base64::engine::general_purpose::STANDARD.encode(token)
        ))
    }
}

impl AuthHandler for NegotiateHandler {
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
            if credentials.is_none() && !self.allows_default_credentials() {
                return Err(crate::error::missing_credentials(
                    "ambient credentials are not allowed for this origin",
                ));
            }

            // A first round dropped before the SPN was known starts over.
            if self.already_called {
                self.next_state = State::GenerateAuthToken;
            } else {
                self.credentials = credentials.cloned();
                self.next_state = State::Initialize;
            }
            self.do_loop().await
        }
        .boxed()
    }

    fn needs_identity(&self) -> bool {
        !self.handshake.is_established()
    }

    fn allows_default_credentials(&self) -> bool {
        match self.state.target() {
            Target::Proxy => true,
            Target::Server => self
                .security
                .can_use_ambient_credentials_for_negotiate(self.state.origin()),
        }
    }

    fn allows_explicit_credentials(&self) -> bool {
        self.library.allows_explicit_credentials()
    }

    fn is_connection_based(&self) -> bool {
        true
    }

    fn encrypts_identity(&self) -> bool {
        true
    }
}

/// Builds [`NegotiateHandler`]s.
///
/// A library that fails to initialize is remembered, and every later
/// challenge is refused without asking it again.
#[derive(Debug)]
pub struct NegotiateFactory {
    library: Arc<dyn AuthLibrary>,
    resolver: Option<Arc<dyn HostResolver>>,
    security: Arc<UrlSecurityManager>,
    options: Options,
    is_unsupported: AtomicBool,
}

impl NegotiateFactory {
    pub fn new(library: Arc<dyn AuthLibrary>, security: Arc<UrlSecurityManager>) -> Self {
        NegotiateFactory {
            library,
            resolver: None,
            security,
            options: Options::default(),
            is_unsupported: AtomicBool::new(false),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use the origin host as-is for the SPN.
    pub fn disable_cname_lookup(mut self, disable: bool) -> Self {
        self.options.disable_cname_lookup = disable;
        self
    }

    /// Include non-default ports in the SPN.
    pub fn use_port(mut self, use_port: bool) -> Self {
        self.options.use_port = use_port;
        self
    }
}

impl AuthHandlerFactory for NegotiateFactory {
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
                "Negotiate cannot be used preemptively",
            ));
        }
        if self.is_unsupported.load(Ordering::Relaxed) || !self.library.init() {
            self.is_unsupported.store(true, Ordering::Relaxed);
            return Err(crate::error::unsupported_scheme(
                "Negotiate security library is unavailable",
            ));
        }

        NegotiateHandler::init_from_challenge(challenge, target, origin, self, net_log)
            .map(|handler| Box::new(handler) as Box<dyn AuthHandler>)
            .ok_or_else(|| {
                crate::error::invalid_response(format!(
                    "unusable Negotiate challenge: {:?}",
                    challenge.challenge_text()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::future;

    use super::*;
    use crate::auth::{AuthFilterAllowlist, MockAuthLibrary};
    use crate::netlog::CapturingNetLog;

    #[derive(Debug, Default)]
    struct MockResolver {
        calls: AtomicUsize,
        fail: bool,
        stall_first: bool,
    }

    impl HostResolver for MockResolver {
        fn resolve_canonical_name<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<String>> {
            let previous = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall_first && previous == 0 {
                return future::pending().boxed();
            }
            let result = if self.fail {
                Err(crate::error::failed("NXDOMAIN"))
            } else {
                Ok(format!("{}.canonical.corp", host))
            };
            future::ready(result).boxed()
        }
    }

    fn request(url: &str) -> RequestInfo {
        RequestInfo::new(http::Method::GET, Url::parse(url).unwrap())
    }

    fn create(
        factory: &NegotiateFactory,
        challenge: &str,
        target: Target,
        origin: &str,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        factory.create_auth_handler(
            &ChallengeTokenizer::new(challenge),
            target,
            &Url::parse(origin).unwrap(),
            CreateReason::Challenge,
            1,
            net_log,
        )
    }

    #[test]
    fn test_derive_spn() {
        let url = Url::parse("http://example.com/path").unwrap();
        assert_eq!(derive_spn(&url, None, false).unwrap(), "HTTP/example.com");

        let url = Url::parse("https://server.corp.com:8080/api").unwrap();
        assert_eq!(derive_spn(&url, None, false).unwrap(), "HTTP/server.corp.com");
        assert_eq!(derive_spn(&url, None, true).unwrap(), "HTTP/server.corp.com:8080");
        assert_eq!(
            derive_spn(&url, Some("canonical.corp.com"), false).unwrap(),
            "HTTP/canonical.corp.com"
        );

        // default ports are never appended
        let url = Url::parse("https://server.corp.com:443/").unwrap();
        assert_eq!(derive_spn(&url, None, true).unwrap(), "HTTP/server.corp.com");
    }

    #[tokio::test]
    async fn resolves_canonical_name_once() {
        let library = MockAuthLibrary::new();
        let resolver = Arc::new(MockResolver::default());
        let factory = NegotiateFactory::new(Arc::new(library.clone()), Arc::default())
            .with_resolver(resolver.clone())
            .use_port(true);

        let mut handler = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://alias:8080",
            &BoundNetLog::default(),
        )
        .unwrap();
        assert_eq!(handler.score(), 4);
        assert!(handler.needs_identity());
        assert!(handler.allows_default_credentials());

        let request = request("http://alias:8080/");
        let token = handler.generate_auth_token(None, &request).await.unwrap();
        // "negotiate:1"
        assert_eq!(token, "Negotiate bmVnb3RpYXRlOjE=");

        assert_eq!(
            handler.handle_another_challenge(&ChallengeTokenizer::new("Negotiate Zm9v")),
            AuthorizationResult::Accept
        );
        assert!(!handler.needs_identity());
        let token = handler.generate_auth_token(None, &request).await.unwrap();
        // "negotiate:2:foo"
        assert_eq!(token, "Negotiate bmVnb3RpYXRlOjI6Zm9v");

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        let rounds = library.rounds();
        assert_eq!(rounds.len(), 2);
        assert!(rounds.iter().all(|r| r.spn == "HTTP/alias.canonical.corp:8080"));
    }

    #[tokio::test]
    async fn dropped_first_round_resolves_again() {
        let library = MockAuthLibrary::new();
        let resolver = Arc::new(MockResolver {
            stall_first: true,
            ..MockResolver::default()
        });
        let factory = NegotiateFactory::new(Arc::new(library.clone()), Arc::default())
            .with_resolver(resolver.clone());

        let mut handler =
            create(&factory, "Negotiate", Target::Server, "http://alias", &BoundNetLog::default())
                .unwrap();
        let request = request("http://alias/");

        // cancelled while the canonical name is being looked up
        assert!(handler.generate_auth_token(None, &request).now_or_never().is_none());
        assert!(library.rounds().is_empty());

        let token = handler.generate_auth_token(None, &request).await.unwrap();
        assert_eq!(token, "Negotiate bmVnb3RpYXRlOjE=");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(library.rounds()[0].spn, "HTTP/alias.canonical.corp");
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_origin_host() {
        let library = MockAuthLibrary::new();
        let capture = Arc::new(CapturingNetLog::new());
        let net_log = BoundNetLog::new(capture.clone());
        let factory = NegotiateFactory::new(Arc::new(library.clone()), Arc::default())
            .with_resolver(Arc::new(MockResolver {
                calls: AtomicUsize::new(0),
                fail: true,
                stall_first: false,
            }));

        let mut handler =
            create(&factory, "Negotiate", Target::Server, "http://intranet", &net_log).unwrap();
        let request = request("http://intranet/");
        handler.generate_auth_token(None, &request).await.unwrap();

        assert_eq!(library.rounds()[0].spn, "HTTP/intranet");
        assert!(capture.events().iter().any(|event| matches!(
            event,
            NetLogEvent::CanonicalNameFallback { host, .. } if host == "intranet"
        )));
    }

    #[tokio::test]
    async fn cname_lookup_can_be_disabled() {
        let library = MockAuthLibrary::new();
        let resolver = Arc::new(MockResolver::default());
        let factory = NegotiateFactory::new(Arc::new(library.clone()), Arc::default())
            .with_resolver(resolver.clone())
            .disable_cname_lookup(true);

        let mut handler = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://intranet",
            &BoundNetLog::default(),
        )
        .unwrap();
        handler
            .generate_auth_token(None, &request("http://intranet/"))
            .await
            .unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(library.rounds()[0].spn, "HTTP/intranet");
    }

    #[tokio::test]
    async fn ambient_credentials_follow_policy() {
        let factory = NegotiateFactory::new(Arc::new(MockAuthLibrary::new()), Arc::default());
        let mut handler = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://www.example.com",
            &BoundNetLog::default(),
        )
        .unwrap();
        assert!(!handler.allows_default_credentials());
        let err = handler
            .generate_auth_token(None, &request("http://www.example.com/"))
            .await
            .unwrap_err();
        assert!(err.is_scheme_fatal());

        let proxy = create(
            &factory,
            "Negotiate",
            Target::Proxy,
            "http://proxy.example.com:3128",
            &BoundNetLog::default(),
        )
        .unwrap();
        assert!(proxy.allows_default_credentials());
    }

    #[test]
    fn ambient_only_library_requires_allowed_origin() {
        let factory = NegotiateFactory::new(
            Arc::new(MockAuthLibrary::new().without_explicit_credentials()),
            Arc::default(),
        );
        let err = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://www.example.com",
            &BoundNetLog::default(),
        )
        .unwrap_err();
        assert!(err.is_invalid_response());

        let handler = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://intranet",
            &BoundNetLog::default(),
        )
        .unwrap();
        assert!(!handler.allows_explicit_credentials());
    }

    #[tokio::test]
    async fn delegation_follows_allowlist() {
        let library = MockAuthLibrary::new();
        let security = UrlSecurityManager::new()
            .with_delegate_allowlist(AuthFilterAllowlist::new("sso"));
        let factory = NegotiateFactory::new(Arc::new(library.clone()), Arc::new(security));

        let mut handler =
            create(&factory, "Negotiate", Target::Server, "http://sso", &BoundNetLog::default())
                .unwrap();
        handler
            .generate_auth_token(None, &request("http://sso/"))
            .await
            .unwrap();
        assert!(library.rounds()[0].delegate);
    }

    #[test]
    fn challenge_parsing() {
        let factory = NegotiateFactory::new(Arc::new(MockAuthLibrary::new()), Arc::default());
        let err = create(
            &factory,
            "Negotiate Zm9v",
            Target::Server,
            "http://intranet",
            &BoundNetLog::default(),
        )
        .unwrap_err();
        assert!(err.is_invalid_response());

        let mut handler = create(
            &factory,
            "Negotiate",
            Target::Server,
            "http://intranet",
            &BoundNetLog::default(),
        )
        .unwrap();
        // no token has been sent yet, so a bare challenge is still the first leg
        assert_eq!(
            handler.handle_another_challenge(&ChallengeTokenizer::new("Negotiate")),
            AuthorizationResult::Accept
        );
        assert_eq!(
            handler.handle_another_challenge(&ChallengeTokenizer::new("NTLM")),
            AuthorizationResult::Invalid
        );
    }

    #[test]
    fn unsupported_library_is_remembered() {
        let factory = NegotiateFactory::new(Arc::new(MockAuthLibrary::unavailable()), Arc::default());
        for _ in 0..2 {
            let err = create(
                &factory,
                "Negotiate",
                Target::Server,
                "http://intranet",
                &BoundNetLog::default(),
            )
            .unwrap_err();
            assert!(err.is_unsupported_scheme());
        }
        assert!(factory.is_unsupported.load(Ordering::Relaxed));

        let err = factory
            .create_auth_handler(
                &ChallengeTokenizer::new("Negotiate"),
                Target::Server,
                &Url::parse("http://intranet").unwrap(),
                CreateReason::Preemptive,
                1,
                &BoundNetLog::default(),
            )
            .unwrap_err();
        assert!(err.is_unsupported_scheme());
    }
}
