// src/lib.rs

#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # httpauth
//!
//! HTTP authentication negotiation for clients: the part between receiving a
//! `401`/`407` and sending the request again with an `Authorization` header.
//!
//! - Parses `WWW-Authenticate` / `Proxy-Authenticate` challenges.
//! - Picks the strongest offered scheme (Negotiate > NTLM > Digest > Basic).
//! - Drives multi-round handshakes through a pluggable security library.
//! - Remembers credentials per origin, realm and path for preemptive use.
//! - Triages failures so that a broken scheme falls through to the next one.
//!
//! The transport is not part of this crate. [`execute_with_auth`] takes a
//! closure that sends one request and returns its response.
//!
//! ```no_run
//! # async fn run() -> httpauth::Result<()> {
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use httpauth::{AuthCache, AuthCredentials, AuthHandlerRegistry, AuthPreferences, AuthSession};
//!
//! let registry = AuthHandlerRegistry::from_preferences(&AuthPreferences::default(), None, None);
//! let session = AuthSession::new(Arc::new(registry), Arc::new(AuthCache::new()));
//!
//! let request = http::Request::get("http://intranet.example/report")
//!     .body(Bytes::new())
//!     .map_err(httpauth::error::failed)?;
//!
//! let mut prompt = |_: &httpauth::AuthChallengeInfo| Some(AuthCredentials::new("alice", "secret"));
//! let response = httpauth::execute_with_auth(&session, request, None, &mut prompt, |req| async move {
//!     // hand `req` to an HTTP client here
//!     # let _ = req;
//!     http::Response::builder()
//!         .status(200)
//!         .body(())
//!         .map_err(httpauth::error::transport)
//! })
//! .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod netlog;

pub use self::auth::{
    choose_best_challenge, handle_challenge_response, AuthCache, AuthChallengeInfo,
    AuthController, AuthCredentials, AuthHandler, AuthHandlerFactory, AuthHandlerRegistry,
    AuthLibrary, AuthPreferences, AuthorizationResult, ChallengeTokenizer, ControllerState,
    CreateReason, HandlerState, HostResolver, Identity, IdentitySource, RequestInfo, SchemeSet,
    SecurityContext, Target, UrlSecurityManager,
};
pub use self::auth::transaction::{execute_with_auth, AuthSession, CredentialSource};
pub use self::error::{Error, Result, Severity};
