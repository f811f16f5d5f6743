// src/auth/transaction.rs

//! Runs one request through as many authentication rounds as the proxy and
//! server ask for.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use url::Url;

use super::{AuthCache, AuthChallengeInfo, AuthController, AuthCredentials, AuthHandlerFactory, RequestInfo, Target};
use crate::netlog::BoundNetLog;
use crate::Result;

/// Maximum number of requests sent for one call to [`execute_with_auth`].
pub const MAX_ROUNDTRIPS: usize = 10;

/// Supplies credentials when no stored identity is left to try.
///
/// Returning `None` gives up; the challenge response is then returned to
/// the caller as-is.
pub trait CredentialSource: Send {
    fn credentials_for(&mut self, challenge: &AuthChallengeInfo) -> Option<AuthCredentials>;
}

impl<F> CredentialSource for F
where
    F: FnMut(&AuthChallengeInfo) -> Option<AuthCredentials> + Send,
{
    fn credentials_for(&mut self, challenge: &AuthChallengeInfo) -> Option<AuthCredentials> {
        self(challenge)
    }
}

/// What outlives a single transaction: the handler factory and the cache.
#[derive(Debug, Clone)]
pub struct AuthSession {
    factory: Arc<dyn AuthHandlerFactory>,
    cache: Arc<AuthCache>,
    net_log: BoundNetLog,
}

impl AuthSession {
    pub fn new(factory: Arc<dyn AuthHandlerFactory>, cache: Arc<AuthCache>) -> Self {
        AuthSession {
            factory,
            cache,
            net_log: BoundNetLog::default(),
        }
    }

    pub fn with_net_log(mut self, net_log: BoundNetLog) -> Self {
        self.net_log = net_log;
        self
    }

    pub fn cache(&self) -> &Arc<AuthCache> {
        &self.cache
    }

    pub fn server_controller(&self, url: &Url) -> AuthController {
        self.controller(Target::Server, url)
    }

    pub fn proxy_controller(&self, proxy: &Url) -> AuthController {
        self.controller(Target::Proxy, proxy)
    }

    fn controller(&self, target: Target, url: &Url) -> AuthController {
        AuthController::new(target, url, self.cache.clone(), self.factory.clone())
            .with_net_log(self.net_log.clone())
    }
}

/// Execute `request`, answering `407` and `401` challenges until the
/// response is something else.
///
/// `execute_fn` sends one request. The request URI must be absolute.
/// `CONNECT` requests only authenticate to `proxy`, and a `407` without a
/// usable challenge fails the tunnel.
///
/// When no identity is left and `credentials` returns `None`, or no
/// challenge is usable, the last `401`/`407` is returned unchanged.
pub async fn execute_with_auth<B, F, Fut>(
    session: &AuthSession,
    request: Request<Bytes>,
    proxy: Option<&Url>,
    credentials: &mut dyn CredentialSource,
    mut execute_fn: F,
) -> Result<Response<B>>
where
    F: FnMut(Request<Bytes>) -> Fut,
    Fut: Future<Output = Result<Response<B>>>,
{
    let info = RequestInfo::from_request(&request)?;
    let establishing_tunnel = request.method() == Method::CONNECT;

    let mut server = session.server_controller(&info.url);
    let mut proxy_controller = proxy.map(|proxy| session.proxy_controller(proxy));

    for round in 1..=MAX_ROUNDTRIPS {
        let mut attempt = clone_request(&request);

        if let Some(controller) = proxy_controller.as_mut() {
            controller.maybe_generate_auth_token(&info).await?;
            controller.add_authorization_header(attempt.headers_mut())?;
        }
        if !establishing_tunnel {
            server.maybe_generate_auth_token(&info).await?;
            server.add_authorization_header(attempt.headers_mut())?;
        }

        log::trace!("auth round {} for {} {}", round, info.method, info.url);
        let response = execute_fn(attempt).await?;
        let status = response.status();

        let controller = if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            match proxy_controller.as_mut() {
                Some(controller) => controller,
                None => return Ok(response),
            }
        } else {
            if let Some(controller) = proxy_controller.as_mut() {
                controller.on_auth_accepted();
            }
            if status != StatusCode::UNAUTHORIZED || establishing_tunnel {
                server.on_auth_accepted();
                return Ok(response);
            }
            &mut server
        };

        let tunnel_challenge = establishing_tunnel && controller.target() == Target::Proxy;
        controller.handle_auth_challenge(response.headers(), tunnel_challenge)?;

        if controller.have_auth() {
            // Stores a URL or cached identity for the next transaction.
            controller.reset_auth(AuthCredentials::default());
            continue;
        }

        let Some(challenge) = controller.auth_info().cloned() else {
            log::debug!("{} auth: no usable challenge, returning {}", controller.target(), status);
            return Ok(response);
        };

        match credentials.credentials_for(&challenge) {
            Some(supplied) => controller.reset_auth(supplied),
            None => {
                log::debug!(
                    "{} auth: no credentials for {} realm {:?}",
                    controller.target(),
                    challenge.scheme,
                    challenge.realm
                );
                return Ok(response);
            }
        }
    }

    Err(crate::error::too_many_rounds(MAX_ROUNDTRIPS).with_origin(info.url))
}

/// Bodies are `Bytes`, so every round can resend the same request.
fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut clone = Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}
