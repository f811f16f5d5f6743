// src/auth/digest.rs

//! The "Digest" scheme (RFC 2617), MD5 and MD5-sess with `qop=auth`.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use rand::Rng;
use url::Url;

use super::{
    AuthCredentials, AuthHandler, AuthHandlerFactory, AuthorizationResult, ChallengeTokenizer,
    CreateReason, HandlerState, RequestInfo, Target, TokenFuture, SCHEME_DIGEST,
};
use crate::netlog::BoundNetLog;
use crate::Result;

/// Length of a generated client nonce, in hex characters.
const CNONCE_LENGTH: usize = 16;

/// Source of client nonces (`cnonce`).
pub trait NonceGenerator: Send + Sync + fmt::Debug {
    fn generate_nonce(&self) -> String;
}

/// Random 16 hex character nonces.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicNonceGenerator;

impl NonceGenerator for DynamicNonceGenerator {
    fn generate_nonce(&self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut rng = rand::thread_rng();
        (0..CNONCE_LENGTH)
            .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
            .collect()
    }
}

/// Always the same nonce. For tests.
#[derive(Debug, Clone)]
pub struct FixedNonceGenerator {
    nonce: String,
}

impl FixedNonceGenerator {
    pub fn new(nonce: impl Into<String>) -> Self {
        FixedNonceGenerator {
            nonce: nonce.into(),
        }
    }
}

impl NonceGenerator for FixedNonceGenerator {
    fn generate_nonce(&self) -> String {
        self.nonce.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    /// Not sent by the server; behaves like MD5 but is not echoed back.
    Unspecified,
    Md5,
    Md5Sess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    Unspecified,
    Auth,
}

#[derive(Debug)]
pub struct DigestHandler {
    state: HandlerState,
    nonce: String,
    domain: String,
    opaque: String,
    stale: bool,
    algorithm: Algorithm,
    qop: Qop,
    nonce_count: u32,
    nonce_generator: Arc<dyn NonceGenerator>,
}

impl DigestHandler {
    /// Returns `None` if the challenge is not Digest, has no nonce, names an
    /// unsupported algorithm, or has malformed params.
    pub fn init_from_challenge(
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        nonce_count: u32,
        nonce_generator: Arc<dyn NonceGenerator>,
        net_log: &BoundNetLog,
    ) -> Option<Self> {
        if challenge.scheme() != SCHEME_DIGEST {
            return None;
        }

        let mut handler = DigestHandler {
            state: HandlerState::new(SCHEME_DIGEST, String::new(), challenge, target, origin, net_log),
            nonce: String::new(),
            domain: String::new(),
            opaque: String::new(),
            stale: false,
            algorithm: Algorithm::Unspecified,
            qop: Qop::Unspecified,
            nonce_count,
            nonce_generator,
        };

        let mut realm = String::new();
        let mut pairs = challenge.param_pairs();
        for (name, value) in pairs.by_ref() {
            if name.eq_ignore_ascii_case("realm") {
                realm = value.into_owned();
            } else if !handler.parse_challenge_property(name, &value) {
                return None;
            }
        }
        if !pairs.valid() || handler.nonce.is_empty() {
            return None;
        }

        handler.state = HandlerState::new(SCHEME_DIGEST, realm, challenge, target, origin, net_log);
        Some(handler)
    }

    fn parse_challenge_property(&mut self, name: &str, value: &str) -> bool {
        if name.eq_ignore_ascii_case("nonce") {
            self.nonce = value.to_owned();
        } else if name.eq_ignore_ascii_case("domain") {
            self.domain = value.to_owned();
        } else if name.eq_ignore_ascii_case("opaque") {
            self.opaque = value.to_owned();
        } else if name.eq_ignore_ascii_case("stale") {
            self.stale = value.eq_ignore_ascii_case("true");
        } else if name.eq_ignore_ascii_case("algorithm") {
            if value.eq_ignore_ascii_case("md5") {
                self.algorithm = Algorithm::Md5;
            } else if value.eq_ignore_ascii_case("md5-sess") {
                self.algorithm = Algorithm::Md5Sess;
            } else {
                log::debug!("unknown digest algorithm {:?}", value);
                return false;
            }
        } else if name.eq_ignore_ascii_case("qop") {
            // qop may list several options; only "auth" is supported.
            self.qop = Qop::Unspecified;
            if value
                .split(',')
                .any(|qop| qop.trim().eq_ignore_ascii_case("auth"))
            {
                self.qop = Qop::Auth;
            }
        } else {
            log::trace!("ignoring digest challenge property {:?}", name);
        }
        true
    }

    /// The nonce the server last issued.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Whether the challenge said the previous nonce merely expired.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// The protection space advertised by the server, unparsed.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Method and request-uri to sign. Tunnels through a proxy sign
    /// `CONNECT host:port`.
    fn request_method_and_path(&self, request: &RequestInfo) -> (String, String) {
        let url = &request.url;
        if self.state.target() == Target::Proxy && url.scheme() == "https" {
            let host = url.host_str().unwrap_or_default();
            let port = url.port_or_known_default().unwrap_or(443);
            return ("CONNECT".to_owned(), format!("{}:{}", host, port));
        }

        let mut path = url.path().to_owned();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        (request.method.as_str().to_owned(), path)
    }

    fn assemble_response_digest(
        &self,
        method: &str,
        path: &str,
        credentials: &AuthCredentials,
        cnonce: &str,
        nc: &str,
    ) -> String {
        let mut ha1 = md5_hex(&format!(
            "{}:{}:{}",
            credentials.username(),
            self.state.realm(),
            credentials.password()
        ));
        if self.algorithm == Algorithm::Md5Sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }

        let ha2 = md5_hex(&format!("{}:{}", method, path));

        let mut nc_part = format!("{}:", self.nonce);
        if self.qop != Qop::Unspecified {
            nc_part.push_str(&format!("{}:{}:{}:", nc, cnonce, qop_to_str(self.qop)));
        }

        md5_hex(&format!("{}:{}{}", ha1, nc_part, ha2))
    }

    fn assemble_credentials(
        &self,
        method: &str,
        path: &str,
        credentials: &AuthCredentials,
        cnonce: &str,
        nonce_count: u32,
    ) -> String {
        // the nonce-count is an 8 digit hex string.
        let nc = format!("{:08x}", nonce_count);

        let mut authorization = format!(
            "Digest username={}, realm={}, nonce={}, uri={}",
            quote(credentials.username()),
            quote(self.state.realm()),
            quote(&self.nonce),
            quote(path),
        );

        if self.algorithm != Algorithm::Unspecified {
            authorization.push_str(", algorithm=");
            authorization.push_str(algorithm_to_str(self.algorithm));
        }
        let response = self.assemble_response_digest(method, path, credentials, cnonce, &nc);
        authorization.push_str(&format!(", response=\"{}\"", response));

        if !self.opaque.is_empty() {
            authorization.push_str(", opaque=");
            authorization.push_str(&quote(&self.opaque));
        }
        if self.qop != Qop::Unspecified {
            // TODO: Support "auth-int" once request bodies are exposed to handlers.
            authorization.push_str(&format!(
                ", qop={}, nc={}, cnonce={}",
                qop_to_str(self.qop),
                nc,
                quote(cnonce)
            ));
        }

        authorization
    }
}

impl AuthHandler for DigestHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn handle_another_challenge(&mut self, challenge: &ChallengeTokenizer) -> AuthorizationResult {
        // The handler itself is not mutated, so a rejection leaves the realm
        // as it was.
        if challenge.scheme() != SCHEME_DIGEST {
            return AuthorizationResult::Invalid;
        }

        let mut realm = String::new();
        let mut pairs = challenge.param_pairs();
        for (name, value) in pairs.by_ref() {
            if name.eq_ignore_ascii_case("stale") {
                if value.eq_ignore_ascii_case("true") {
                    return AuthorizationResult::Stale;
                }
            } else if name.eq_ignore_ascii_case("realm") {
                realm = value.into_owned();
            }
        }
        if !pairs.valid() {
            return AuthorizationResult::Invalid;
        }

        if realm != self.state.realm() {
            AuthorizationResult::DifferentRealm
        } else {
            AuthorizationResult::Reject
        }
    }

    fn generate_auth_token<'a>(
        &'a mut self,
        credentials: Option<&'a AuthCredentials>,
        request: &'a RequestInfo,
    ) -> TokenFuture<'a> {
        let Some(credentials) = credentials else {
            return future::ready(Err(crate::error::missing_credentials(
                "Digest requires explicit credentials",
            )))
            .boxed();
        };

        let cnonce = self.nonce_generator.generate_nonce();
        let (method, path) = self.request_method_and_path(request);
        let token = self.assemble_credentials(&method, &path, credentials, &cnonce, self.nonce_count);
        self.nonce_count = self.nonce_count.wrapping_add(1);

        future::ready(Ok(token)).boxed()
    }

    fn encrypts_identity(&self) -> bool {
        true
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn algorithm_to_str(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::Unspecified => "",
        Algorithm::Md5 => "MD5",
        Algorithm::Md5Sess => "MD5-sess",
    }
}

fn qop_to_str(qop: Qop) -> &'static str {
    match qop {
        Qop::Unspecified => "",
        Qop::Auth => "auth",
    }
}

/// Builds [`DigestHandler`]s. Preemptive use continues the cached nonce with
/// the next nonce count.
#[derive(Debug, Clone)]
pub struct DigestFactory {
    nonce_generator: Arc<dyn NonceGenerator>,
}

impl DigestFactory {
    pub fn new() -> Self {
        DigestFactory::with_nonce_generator(Arc::new(DynamicNonceGenerator))
    }

    pub fn with_nonce_generator(nonce_generator: Arc<dyn NonceGenerator>) -> Self {
        DigestFactory { nonce_generator }
    }
}

impl Default for DigestFactory {
    fn default() -> Self {
        DigestFactory::new()
    }
}

impl AuthHandlerFactory for DigestFactory {
    fn create_auth_handler(
        &self,
        challenge: &ChallengeTokenizer,
        target: Target,
        origin: &Url,
        _reason: CreateReason,
        digest_nonce_count: u32,
        net_log: &BoundNetLog,
    ) -> Result<Box<dyn AuthHandler>> {
        DigestHandler::init_from_challenge(
            challenge,
            target,
            origin,
            digest_nonce_count,
            self.nonce_generator.clone(),
            net_log,
        )
        .map(|handler| Box::new(handler) as Box<dyn AuthHandler>)
        .ok_or_else(|| {
            crate::error::invalid_response(format!(
                "malformed Digest challenge: {:?}",
                challenge.challenge_text()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(challenge: &str, target: Target, cnonce: &str) -> Option<DigestHandler> {
        DigestHandler::init_from_challenge(
            &ChallengeTokenizer::new(challenge),
            target,
            &Url::parse("http://www.example.com").unwrap(),
            1,
            Arc::new(FixedNonceGenerator::new(cnonce)),
            &BoundNetLog::default(),
        )
    }

    async fn token(handler: &mut DigestHandler, method: http::Method, url: &str, user: &str, pass: &str) -> String {
        let request = RequestInfo::new(method, Url::parse(url).unwrap());
        let credentials = AuthCredentials::new(user, pass);
        handler
            .generate_auth_token(Some(&credentials), &request)
            .await
            .unwrap()
    }

    #[test]
    fn parse_challenge() {
        let h = handler(
            "Digest nonce=\"xyz\", realm=\"Thunder Bluff\", opaque=\"o\", \
             domain=\"/a /b\", stale=TRUE, algorithm=md5-sess, qop=\"auth-int,auth\"",
            Target::Server,
            "c",
        )
        .unwrap();
        assert_eq!(h.realm(), "Thunder Bluff");
        assert_eq!(h.nonce(), "xyz");
        assert_eq!(h.opaque, "o");
        assert_eq!(h.domain(), "/a /b");
        assert!(h.is_stale());
        assert_eq!(h.algorithm, Algorithm::Md5Sess);
        assert_eq!(h.qop, Qop::Auth);
        assert_eq!(h.score(), 2);
        assert!(h.encrypts_identity());

        let h = handler("Digest nonce=\"xyz\", qop=\"auth-int\"", Target::Server, "c").unwrap();
        assert_eq!(h.qop, Qop::Unspecified);
        assert_eq!(h.realm(), "");
    }

    #[test]
    fn parse_challenge_failures() {
        let cases = [
            // Missing nonce.
            "Digest realm=\"Thunder Bluff\"",
            // Unsupported algorithm.
            "Digest nonce=\"xyz\", algorithm=sha-999",
            // Malformed params.
            "Digest nonce=\"xyz\", realm",
            // Wrong scheme.
            "Basic realm=\"x\"",
        ];
        for challenge in cases {
            assert!(handler(challenge, Target::Server, "c").is_none(), "{}", challenge);
        }
    }

    #[tokio::test]
    async fn assemble_credentials_rfc2617() {
        let mut h = handler(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
            Target::Server,
            "0a4f113b",
        )
        .unwrap();
        let token = token(
            &mut h,
            http::Method::GET,
            "http://www.example.com/dir/index.html",
            "Mufasa",
            "Circle Of Life",
        )
        .await;
        assert_eq!(
            token,
            "Digest username=\"Mufasa\", realm=\"testrealm@host.com\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", uri=\"/dir/index.html\", \
             response=\"6629fae49393a05397450978507c4ef1\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\", \
             qop=auth, nc=00000001, cnonce=\"0a4f113b\""
        );
    }

    #[tokio::test]
    async fn nonce_count_increments() {
        let mut h = handler(
            "Digest realm=\"r\", nonce=\"n\", algorithm=MD5, qop=auth",
            Target::Server,
            "c",
        )
        .unwrap();
        let first = token(&mut h, http::Method::GET, "http://www.example.com/", "u", "p").await;
        let second = token(&mut h, http::Method::GET, "http://www.example.com/", "u", "p").await;
        assert!(first.contains("algorithm=MD5, "));
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }

    #[tokio::test]
    async fn legacy_digest_omits_qop() {
        let mut h = handler("Digest realm=\"r\", nonce=\"n\"", Target::Server, "c").unwrap();
        let token = token(&mut h, http::Method::POST, "http://www.example.com/a?b=c", "u", "p").await;
        assert!(token.starts_with(
            "Digest username=\"u\", realm=\"r\", nonce=\"n\", uri=\"/a?b=c\", response=\""
        ));
        assert!(!token.contains("qop="));
        assert!(!token.contains("algorithm="));
        assert!(!token.contains("opaque="));
    }

    #[tokio::test]
    async fn proxy_tunnel_signs_connect() {
        let mut h = handler("Digest realm=\"r\", nonce=\"n\", qop=auth", Target::Proxy, "c").unwrap();
        let token = token(&mut h, http::Method::GET, "https://secure.example.com/x", "u", "p").await;
        assert!(token.contains("uri=\"secure.example.com:443\""));
    }

    #[tokio::test]
    async fn username_is_quoted() {
        let mut h = handler("Digest realm=\"r\", nonce=\"n\"", Target::Server, "c").unwrap();
        let token = token(&mut h, http::Method::GET, "http://www.example.com/", "a\"b\\c", "p").await;
        assert!(token.starts_with("Digest username=\"a\\\"b\\\\c\""));
    }

    #[tokio::test]
    async fn missing_credentials_are_scheme_fatal() {
        let mut h = handler("Digest realm=\"r\", nonce=\"n\"", Target::Server, "c").unwrap();
        let request = RequestInfo::new(http::Method::GET, Url::parse("http://www.example.com/").unwrap());
        let err = h.generate_auth_token(None, &request).await.unwrap_err();
        assert!(err.is_scheme_fatal());
    }

    #[test]
    fn handle_another_challenge() {
        let mut h = handler("Digest realm=\"Oblivion\", nonce=\"n\"", Target::Server, "c").unwrap();
        let cases = [
            ("Digest realm=\"Oblivion\", nonce=\"n2\"", AuthorizationResult::Reject),
            ("Digest realm=\"Oblivion\", nonce=\"n2\", stale=\"true\"", AuthorizationResult::Stale),
            ("Digest realm=\"Oblivion\", nonce=\"n2\", stale=FALSE", AuthorizationResult::Reject),
            ("Digest realm=\"SpecialPlace\", nonce=\"n2\"", AuthorizationResult::DifferentRealm),
            ("Digest nonce=\"n2\"", AuthorizationResult::DifferentRealm),
            ("Digest realm=\"Oblivion\", garbage", AuthorizationResult::Invalid),
            ("Basic realm=\"Oblivion\"", AuthorizationResult::Invalid),
        ];
        for (challenge, expected) in cases {
            let result = h.handle_another_challenge(&ChallengeTokenizer::new(challenge));
            assert_eq!(result, expected, "{}", challenge);
        }
        assert_eq!(h.realm(), "Oblivion");
    }

    #[test]
    fn dynamic_nonce_shape() {
        let nonce = DynamicNonceGenerator.generate_nonce();
        assert_eq!(nonce.len(), CNONCE_LENGTH);
        assert!(nonce.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
