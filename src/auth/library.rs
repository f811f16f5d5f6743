// src/auth/library.rs

//! Security libraries behind the connection-based schemes.
//!
//! NTLM and Negotiate tokens are opaque: a platform library (SSPI, GSSAPI)
//! produces them from the server's last token, the target SPN and either
//! explicit credentials or the logged-in user. [`AuthLibrary`] is the seam
//! to such a library. [`BlockingAuthLibrary`] adapts a synchronous one by
//! running each step on tokio's blocking pool, and [`MockAuthLibrary`] is a
//! scripted stand-in for tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use futures_util::future::{self, BoxFuture, FutureExt};

use super::challenge::LENIENT_BASE64;
use super::{AuthCredentials, AuthorizationResult, ChallengeTokenizer};
use crate::{Error, Result};

/// Entry point of a security library.
pub trait AuthLibrary: Send + Sync + fmt::Debug {
    /// Whether the library can be used at all on this system.
    fn init(&self) -> bool {
        true
    }

    /// Whether contexts accept a username and password. GSSAPI style
    /// libraries only use the ambient ticket cache.
    fn allows_explicit_credentials(&self) -> bool {
        true
    }

    /// Start a context for one handshake of `scheme` (`"ntlm"` or
    /// `"negotiate"`).
    fn new_context(&self, scheme: &str, delegate: bool) -> Box<dyn SecurityContext>;
}

/// One in-progress handshake inside a security library.
pub trait SecurityContext: Send + fmt::Debug {
    /// Produce the next token. `server_token` is `None` on the first round.
    ///
    /// `credentials` is `None` when the logged-in user should be used.
    fn generate_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        spn: &'a str,
        server_token: Option<&'a [u8]>,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Round bookkeeping shared by the NTLM and Negotiate handlers.
#[derive(Debug)]
pub(crate) struct Handshake {
    scheme: &'static str,
    context: Box<dyn SecurityContext>,
    established: bool,
    server_token: Option<Vec<u8>>,
    credentials: Option<AuthCredentials>,
}

impl Handshake {
    pub(crate) fn new(scheme: &'static str, context: Box<dyn SecurityContext>) -> Self {
        Handshake {
            scheme,
            context,
            established: false,
            server_token: None,
            credentials: None,
        }
    }

    /// Has a token already been produced in this handshake.
    pub(crate) fn is_established(&self) -> bool {
        self.established
    }

    pub(crate) fn parse_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult {
        if challenge.scheme() != self.scheme {
            return AuthorizationResult::Invalid;
        }

        let encoded = challenge.base64_param();
        if encoded.is_empty() {
            // A bare challenge after our token means the server refused it.
            return if self.established {
                AuthorizationResult::Reject
            } else {
                AuthorizationResult::Accept
            };
        }

        // A server token only makes sense as a reply to one of ours.
        if !self.established {
            return AuthorizationResult::Invalid;
        }

        match LENIENT_BASE64.decode(encoded) {
            Ok(token) => {
                self.server_token = Some(token);
                AuthorizationResult::Accept
            }
            Err(e) => {
                log::debug!("{} challenge token is not base64: {}", self.scheme, e);
                AuthorizationResult::Invalid
            }
        }
    }

    /// Credentials are captured on the first round and reused for the rest
    /// of the handshake.
    pub(crate) async fn generate(
        &mut self,
        credentials: Option<&AuthCredentials>,
        spn: &str,
    ) -> Result<Vec<u8>> {
        if !self.established {
            self.credentials = credentials.cloned();
        }
        let token = self
            .context
            .generate_token(self.credentials.as_ref(), spn, self.server_token.as_deref())
            .await?;
        self.established = true;
        self.server_token = None;
        Ok(token)
    }
}

/// A synchronous security library, e.g. a thin FFI binding.
pub trait BlockingSecurityLibrary: Send + Sync + fmt::Debug + 'static {
    fn init(&self) -> bool {
        true
    }

    fn allows_explicit_credentials(&self) -> bool {
        true
    }

    fn new_context(&self, scheme: &str, delegate: bool) -> Box<dyn BlockingSecurityContext>;
}

/// A synchronous context. Each step may block.
pub trait BlockingSecurityContext: Send + 'static {
    fn step(
        &mut self,
        credentials: Option<&AuthCredentials>,
        spn: &str,
        server_token: Option<&[u8]>,
    ) -> Result<Vec<u8>>;
}

/// Runs a [`BlockingSecurityLibrary`] on the blocking thread pool.
///
/// A cancelled round leaves the context with the worker thread; the next
/// round fails with an invalid-handle error, which discards the identity.
#[derive(Debug)]
pub struct BlockingAuthLibrary<L> {
    inner: Arc<L>,
}

impl<L: BlockingSecurityLibrary> BlockingAuthLibrary<L> {
    pub fn new(library: L) -> Self {
        BlockingAuthLibrary {
            inner: Arc::new(library),
        }
    }
}

impl<L: BlockingSecurityLibrary> AuthLibrary for BlockingAuthLibrary<L> {
    fn init(&self) -> bool {
        self.inner.init()
    }

    fn allows_explicit_credentials(&self) -> bool {
        self.inner.allows_explicit_credentials()
    }

    fn new_context(&self, scheme: &str, delegate: bool) -> Box<dyn SecurityContext> {
        Box::new(BlockingContext {
            context: Some(self.inner.new_context(scheme, delegate)),
        })
    }
}

struct BlockingContext {
    context: Option<Box<dyn BlockingSecurityContext>>,
}

impl fmt::Debug for BlockingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingContext")
            .field("available", &self.context.is_some())
            .finish()
    }
}

impl SecurityContext for BlockingContext {
    fn generate_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        spn: &'a str,
        server_token: Option<&'a [u8]>,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        let Some(mut context) = self.context.take() else {
            return future::ready(Err(crate::error::invalid_handle(
                "security context was lost by a cancelled round",
            )))
            .boxed();
        };

        let credentials = credentials.cloned();
        let spn = spn.to_owned();
        let server_token = server_token.map(<[u8]>::to_vec);

        async move {
            let (context, result) = tokio::task::spawn_blocking(move || {
                let result = context.step(credentials.as_ref(), &spn, server_token.as_deref());
                (context, result)
            })
            .await
            .map_err(crate::error::unexpected_library_status)?;

            self.context = Some(context);
            result
        }
        .boxed()
    }
}

/// One recorded call into a [`MockAuthLibrary`] context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRound {
    pub scheme: String,
    pub spn: String,
    pub delegate: bool,
    pub username: Option<String>,
    pub server_token: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockShared {
    failures: Mutex<VecDeque<Error>>,
    rounds: Mutex<Vec<MockRound>>,
    asynchronous: AtomicBool,
}

/// A scripted security library.
///
/// Tokens are `"<scheme>:<round>"`, followed by `":<server token>"` when the
/// server sent one, so a test can see exactly what was fed in.
#[derive(Debug, Clone)]
pub struct MockAuthLibrary {
    available: bool,
    allows_explicit: bool,
    shared: Arc<MockShared>,
}

impl MockAuthLibrary {
    pub fn new() -> Self {
        MockAuthLibrary {
            available: true,
            allows_explicit: true,
            shared: Arc::default(),
        }
    }

    /// A library that fails to initialize.
    pub fn unavailable() -> Self {
        MockAuthLibrary {
            available: false,
            ..MockAuthLibrary::new()
        }
    }

    /// Only ambient credentials, like GSSAPI.
    pub fn without_explicit_credentials(mut self) -> Self {
        self.allows_explicit = false;
        self
    }

    /// Complete each round only after yielding to the runtime.
    pub fn set_async(&self, asynchronous: bool) {
        self.shared.asynchronous.store(asynchronous, Ordering::SeqCst);
    }

    /// The next round, in any context, fails with `err`.
    pub fn fail_next(&self, err: Error) {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    pub fn rounds(&self) -> Vec<MockRound> {
        self.shared
            .rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockAuthLibrary {
    fn default() -> Self {
        MockAuthLibrary::new()
    }
}

impl AuthLibrary for MockAuthLibrary {
    fn init(&self) -> bool {
        self.available
    }

    fn allows_explicit_credentials(&self) -> bool {
        self.allows_explicit
    }

    fn new_context(&self, scheme: &str, delegate: bool) -> Box<dyn SecurityContext> {
        Box::new(MockSecurityContext {
            scheme: scheme.to_owned(),
            delegate,
            round: 0,
            shared: self.shared.clone(),
        })
    }
}

#[derive(Debug)]
struct MockSecurityContext {
    scheme: String,
    delegate: bool,
    round: u32,
    shared: Arc<MockShared>,
}

impl SecurityContext for MockSecurityContext {
    fn generate_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        spn: &'a str,
        server_token: Option<&'a [u8]>,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            if self.shared.asynchronous.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }

            self.shared
                .rounds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(MockRound {
                    scheme: self.scheme.clone(),
                    spn: spn.to_owned(),
                    delegate: self.delegate,
                    username: credentials.map(|c| c.username().to_owned()),
                    server_token: server_token.map(<[u8]>::to_vec),
                });

            let failure = self
                .shared
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            if let Some(err) = failure {
                return Err(err);
            }

            self.round += 1;
            let mut token = format!("{}:{}", self.scheme, self.round).into_bytes();
            if let Some(server_token) = server_token {
                token.push(b':');
                token.extend_from_slice(server_token);
            }
            Ok(token)
        }
        .boxed()
    }
}
