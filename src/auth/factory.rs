// src/auth/factory.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use url::Url;

use super::{
    normalize_scheme, AuthFilterAllowlist, AuthHandler, AuthLibrary, BasicFactory,
    ChallengeTokenizer, CreateReason, DigestFactory, Entry, HostResolver, NegotiateFactory,
    NtlmFactory, Target, UrlSecurityManager, SCHEME_BASIC, SCHEME_DIGEST, SCHEME_NEGOTIATE,
    SCHEME_NTLM,
};
use crate::netlog::BoundNetLog;
use crate::Result;

/// Builds handlers for challenges.
///
/// An `Err` means "no handler for this challenge"; callers skip it and move
/// on to the next challenge.
pub trait AuthHandlerFactory: Send + Sync + fmt::Debug {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        reason: CreateReason,
        digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>>;

    /// Tokenize `challenge` and create a handler for it.
    fn create_auth_handler_from_string(
        &self,
        challenge: &str,
        target: Target,
        origin: &Url,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        self.create_auth_handler(
            &ChallengeTokenizer::new(challenge),
            target,
            origin,
            CreateReason::Challenge,
            1,
            net_log,
        )
    }

    /// Recreate a handler from a cache entry, before any challenge.
    ///
    /// The stored challenge must still name the entry's scheme.
    fn create_preemptive_auth_handler(
        &self,
        entry: &Entry,
        target: Target,
        digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        let challenge = ChallengeTokenizer::new(entry.auth_challenge());
        if challenge.scheme() != entry.scheme() {
            return Err(crate::error::invalid_response(format!(
                "cached challenge {:?} is not {}",
                entry.auth_challenge(),
                entry.scheme()
            )));
        }
        self.create_auth_handler(
            &challenge,
            target,
            entry.origin(),
            CreateReason::Preemptive,
            digest_nonce_count,
            net_log,
        )
    }
}

/// Dispatches to one factory per scheme.
///
/// Built once from configuration and shared by every controller. An
/// unregistered scheme gets no handler.
#[derive(Debug, Default, Clone)]
pub struct AuthHandlerRegistry {
    factories: HashMap<String, Arc<dyn AuthHandlerFactory>>,
}

impl AuthHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for `prefs`.
    ///
    /// NTLM and Negotiate are only registered when a security `library` is
    /// given. `resolver` enables canonical name lookups for Negotiate SPNs.
    pub fn from_preferences(
        prefs: &AuthPreferences,
        library: Option<Arc<dyn AuthLibrary>>,
        resolver: Option<Arc<dyn HostResolver>>,
    ) -> Self {
        let security = Arc::new(prefs.url_security_manager());
        let mut registry = AuthHandlerRegistry::new();

        for name in &prefs.auth_schemes {
            let Some(scheme) = normalize_scheme(name) else {
                log::warn!("ignoring invalid auth scheme {:?} in preferences", name);
                continue;
            };

            let factory: Arc<dyn AuthHandlerFactory> = match scheme.as_str() {
                SCHEME_BASIC => Arc::new(BasicFactory::new()),
                SCHEME_DIGEST => Arc::new(DigestFactory::new()),
                SCHEME_NTLM | SCHEME_NEGOTIATE => {
                    let Some(library) = library.clone() else {
                        log::debug!("no security library, {} is not registered", scheme);
                        continue;
                    };
                    if scheme == SCHEME_NTLM {
                        Arc::new(NtlmFactory::new(library, security.clone()))
                    } else {
                        let mut factory = NegotiateFactory::new(library, security.clone())
                            .disable_cname_lookup(prefs.negotiate_disable_cname_lookup)
                            .use_port(prefs.negotiate_enable_port);
                        if let Some(resolver) = resolver.clone() {
                            factory = factory.with_resolver(resolver);
                        }
                        Arc::new(factory)
                    }
                }
                _ => {
                    log::warn!("ignoring unknown auth scheme {:?} in preferences", name);
                    continue;
                }
            };
            registry.register_scheme_factory(&scheme, Some(factory));
        }

        registry
    }

    /// Register `factory` for `scheme`, replacing any previous one. `None`
    /// unregisters the scheme.
    pub fn register_scheme_factory(
        &mut self,
        scheme: &str,
        factory: Option<Arc<dyn AuthHandlerFactory>>,
    ) {
        let scheme = scheme.to_ascii_lowercase();
        match factory {
            Some(factory) => {
                self.factories.insert(scheme, factory);
            }
            None => {
                self.factories.remove(&scheme);
            }
        }
    }

    pub fn get_scheme_factory(&self, scheme: &str) -> Option<&Arc<dyn AuthHandlerFactory>> {
        self.factories.get(&scheme.to_ascii_lowercase())
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.get_scheme_factory(scheme).is_some()
    }
}

impl AuthHandlerFactory for AuthHandlerRegistry {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        reason: CreateReason,
        digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        if challenge.scheme().is_empty() {
            return Err(crate::error::invalid_response(format!(
                "challenge without a scheme: {:?}",
                challenge.challenge_text()
            )));
        }

        match self.factories.get(challenge.scheme()) {
            Some(factory) => factory.create_auth_handler(
                challenge,
                target,
                origin,
                reason,
                digest_nonce_count,
                net_log,
            ),
            None => Err(crate::error::unsupported_scheme(format!(
                "{} is not registered",
                challenge.scheme()
            ))),
        }
    }
}

/// User-facing authentication settings.
///
/// Allowlists use the syntax of [`AuthFilterAllowlist`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AuthPreferences {
    /// Schemes to register. Order does not affect selection.
    pub auth_schemes: Vec<String>,
    /// Use the origin host as-is for Negotiate SPNs.
    pub negotiate_disable_cname_lookup: bool,
    /// Include non-default ports in Negotiate SPNs.
    pub negotiate_enable_port: bool,
    /// Servers that may receive ambient credentials.
    pub server_allowlist: Option<String>,
    /// Servers that may receive delegated credentials.
    pub delegate_allowlist: Option<String>,
    /// Servers that may receive explicit NTLM credentials.
    pub ntlm_explicit_allowlist: Option<String>,
    pub ntlm_ambient_credentials: bool,
}

impl Default for AuthPreferences {
    fn default() -> Self {
        AuthPreferences {
            auth_schemes: [SCHEME_BASIC, SCHEME_DIGEST, SCHEME_NTLM, SCHEME_NEGOTIATE]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            negotiate_disable_cname_lookup: false,
            negotiate_enable_port: false,
            server_allowlist: None,
            delegate_allowlist: None,
            ntlm_explicit_allowlist: None,
            ntlm_ambient_credentials: true,
        }
    }
}

impl AuthPreferences {
    pub fn is_scheme_allowed(&self, scheme: &str) -> bool {
        self.auth_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    }

    pub fn url_security_manager(&self) -> UrlSecurityManager {
        let mut manager =
            UrlSecurityManager::new().with_ntlm_ambient_credentials(self.ntlm_ambient_credentials);
        if let Some(ref list) = self.server_allowlist {
            manager = manager.with_server_allowlist(AuthFilterAllowlist::new(list));
        }
        if let Some(ref list) = self.delegate_allowlist {
            manager = manager.with_delegate_allowlist(AuthFilterAllowlist::new(list));
        }
        if let Some(ref list) = self.ntlm_explicit_allowlist {
            manager = manager.with_ntlm_explicit_allowlist(AuthFilterAllowlist::new(list));
        }
        manager
    }
}
