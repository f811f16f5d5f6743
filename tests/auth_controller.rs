// tests/auth_controller.rs

use std::sync::Arc;

use http::header::{AUTHORIZATION, PROXY_AUTHENTICATE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use httpauth::auth::mock::{MockFactory, MockHandler};
use httpauth::netlog::{BoundNetLog, CapturingNetLog, NetLogEvent};
use httpauth::{
    AuthCache, AuthController, AuthCredentials, AuthHandlerRegistry, AuthPreferences,
    ControllerState, Error, IdentitySource, RequestInfo, Target,
};

fn url() -> Url {
    Url::parse("http://example.com").unwrap()
}

fn request() -> RequestInfo {
    RequestInfo::new(Method::GET, url())
}

fn challenges(name: HeaderName, values: &[&'static str]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for value in values {
        headers.append(name.clone(), HeaderValue::from_static(value));
    }
    headers
}

struct Round {
    challenges: &'static [&'static str],
    authorization: &'static str,
}

struct Case {
    name: &'static str,
    rounds: Vec<Round>,
    // (scheme, handler creation fails)
    handlers: Vec<(&'static str, bool)>,
}

fn round(challenges: &'static [&'static str], authorization: &'static str) -> Round {
    Round {
        challenges,
        authorization,
    }
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "picks the only supported scheme",
            rounds: vec![round(
                &["Basic realm=\"BasicRealm\""],
                "basic auth_token,realm=\"BasicRealm\"",
            )],
            handlers: vec![("basic", false)],
        },
        Case {
            name: "no supported schemes",
            rounds: vec![round(&["Fake realm=\"FooBar\""], "")],
            handlers: vec![],
        },
        Case {
            name: "digest over basic",
            rounds: vec![round(
                &[
                    "Basic realm=\"FooBar\"",
                    "Fake realm=\"FooBar\"",
                    "nonce=\"aaaaaaaaaa\"",
                    "Digest realm=\"DigestRealm\", nonce=\"aaaaaaaaaa\"",
                ],
                "digest auth_token,realm=\"DigestRealm\", nonce=\"aaaaaaaaaa\"",
            )],
            handlers: vec![("digest", false)],
        },
        Case {
            name: "empty header",
            rounds: vec![round(&[""], "")],
            handlers: vec![],
        },
        Case {
            name: "negotiate over ntlm",
            rounds: vec![round(&["NTLM", "Negotiate"], "negotiate auth_token")],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "second challenge for basic",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(&["Basic second_round"], "basic auth_token,second_round"),
            ],
            handlers: vec![("basic", false), ("basic", false)],
        },
        Case {
            name: "second challenge is missing",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(&[], ""),
            ],
            handlers: vec![("basic", false)],
        },
        Case {
            name: "second challenge is empty",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(&[""], ""),
            ],
            handlers: vec![("basic", false)],
        },
        Case {
            name: "second challenge has preferred scheme",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(&["Basic second_round", "Negotiate"], "negotiate auth_token"),
            ],
            handlers: vec![("basic", false), ("negotiate", false)],
        },
        Case {
            name: "multiple challenges for the same scheme",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(
                    &["Basic second_round_1", "Basic second_round_2"],
                    "basic auth_token,second_round_1",
                ),
            ],
            handlers: vec![("basic", false), ("basic", false)],
        },
        Case {
            name: "failed handler falls through to next challenge of same scheme",
            rounds: vec![
                round(&["Basic first_round"], "basic auth_token,first_round"),
                round(
                    &["Basic second_round_1", "Basic second_round_2"],
                    "basic auth_token,second_round_2",
                ),
            ],
            handlers: vec![("basic", false), ("basic", true), ("basic", false)],
        },
        Case {
            name: "continuation",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Negotiate Zm9v"], "negotiate continuation,foo"),
            ],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "continuation uses first matching challenge",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Negotiate Zm9v", "Negotiate"], "negotiate continuation,foo"),
            ],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "empty first challenge restarts handshake",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Negotiate", "Negotiate Y29udGludWF0aW9u"], "negotiate auth_token"),
            ],
            handlers: vec![("negotiate", false), ("negotiate", false)],
        },
        Case {
            name: "rejection via empty challenge",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Negotiate"], "negotiate auth_token"),
            ],
            handlers: vec![("negotiate", false), ("negotiate", false), ("negotiate", false)],
        },
        Case {
            name: "rejection via scheme change",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Basic foo"], "basic auth_token,foo"),
            ],
            handlers: vec![("negotiate", false), ("basic", false)],
        },
        Case {
            name: "empty second challenge for connection based scheme",
            rounds: vec![round(&["Negotiate"], "negotiate auth_token"), round(&[""], "")],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "missing second challenge for connection based scheme",
            rounds: vec![round(&["Negotiate"], "negotiate auth_token"), round(&[], "")],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "picks matching challenge among others",
            rounds: vec![
                round(&["Negotiate"], "negotiate auth_token"),
                round(&["Basic foo", "Negotiate YmFy"], "negotiate continuation,bar"),
            ],
            handlers: vec![("negotiate", false)],
        },
        Case {
            name: "keeps handshake over preferred scheme",
            rounds: vec![
                round(&["NTLM"], "ntlm auth_token"),
                round(&["Negotiate", "NTLM YmFy"], "ntlm continuation,bar"),
            ],
            handlers: vec![("ntlm", false)],
        },
        Case {
            name: "falls through invalid headers",
            rounds: vec![round(
                &["Basic abc;", "Digest abc;", "Basic valid"],
                "basic auth_token,valid",
            )],
            handlers: vec![("digest", true), ("basic", true), ("basic", false)],
        },
    ]
}

async fn run_case(case: &Case, asynchronous: bool) {
    let factory = Arc::new(MockFactory::new());
    for &(scheme, init_fails) in &case.handlers {
        let mut handler = MockHandler::new().scheme(scheme).generate_async(asynchronous);
        if init_fails {
            handler = handler.fail_init(httpauth::error::invalid_credentials("scripted"));
        }
        factory.add_mock_handler(handler, Target::Server);
    }

    let mut controller = AuthController::new(
        Target::Server,
        &url(),
        Arc::new(AuthCache::new()),
        factory.clone(),
    );

    for round in &case.rounds {
        let headers = challenges(WWW_AUTHENTICATE, round.challenges);
        controller.handle_auth_challenge(&headers, false).unwrap();

        if !controller.have_auth_handler() {
            assert_eq!(round.authorization, "", "{}", case.name);
            continue;
        }
        if !controller.have_auth() {
            controller.reset_auth(AuthCredentials::new("a", "b"));
        }

        controller.maybe_generate_auth_token(&request()).await.unwrap();
        let mut request_headers = HeaderMap::new();
        controller.add_authorization_header(&mut request_headers).unwrap();
        let authorization = request_headers
            .get(AUTHORIZATION)
            .map(|value| value.to_str().unwrap())
            .unwrap_or_default();
        assert_eq!(authorization, round.authorization, "{}", case.name);
    }

    assert!(
        !factory.have_auth_handlers(Target::Server),
        "{}: unused handlers",
        case.name
    );
}

#[tokio::test]
async fn challenge_response_sync() {
    let _ = env_logger::try_init();
    for case in cases() {
        run_case(&case, false).await;
    }
}

#[tokio::test]
async fn challenge_response_async() {
    for case in cases() {
        run_case(&case, true).await;
    }
}

/// A proxy controller whose only handler fails token generation with `err`.
async fn single_round(err: Error, asynchronous: bool) -> (AuthController, httpauth::Result<()>, Arc<AuthCache>) {
    let factory = Arc::new(MockFactory::new());
    factory.add_mock_handler(
        MockHandler::new().generate_async(asynchronous).fail_generate(err),
        Target::Proxy,
    );
    let cache = Arc::new(AuthCache::new());
    let mut controller = AuthController::new(Target::Proxy, &url(), cache.clone(), factory);

    controller
        .handle_auth_challenge(&challenges(PROXY_AUTHENTICATE, &["MOCK foo"]), false)
        .unwrap();
    assert!(controller.have_auth_handler());
    assert!(!controller.have_auth());
    controller.reset_auth(AuthCredentials::new("a", "b"));
    assert!(controller.have_auth());
    assert_eq!(cache.len(), 1);

    let result = controller.maybe_generate_auth_token(&request()).await;
    (controller, result, cache)
}

#[tokio::test]
async fn scheme_fatal_errors_disable_the_scheme() {
    for asynchronous in [false, true] {
        let errors = [
            httpauth::error::unexpected_library_status("status"),
            httpauth::error::missing_credentials("none"),
        ];
        for err in errors {
            let (controller, result, _) = single_round(err, asynchronous).await;
            assert!(result.is_ok());
            assert!(controller.is_auth_scheme_disabled("mock"));
            assert!(controller.auth_token().is_none());
            assert!(!controller.have_auth_handler());
        }
    }
}

#[tokio::test]
async fn identity_fatal_errors_keep_the_scheme() {
    for asynchronous in [false, true] {
        let err = httpauth::error::invalid_credentials("rejected");
        let (controller, result, cache) = single_round(err, asynchronous).await;
        assert!(result.is_ok());
        assert!(!controller.is_auth_scheme_disabled("mock"));
        assert!(!controller.have_auth_handler());
        assert_eq!(controller.identity().source, IdentitySource::None);
        assert!(cache.is_empty());
    }
}

#[tokio::test]
async fn transaction_fatal_errors_are_returned() {
    let err = httpauth::error::transport("connection reset");
    let (controller, result, _) = single_round(err, true).await;
    let err = result.unwrap_err();
    assert!(err.is_transport());
    assert!(err.is_transaction_fatal());
    assert_eq!(err.origin(), Some(&Url::parse("http://example.com/").unwrap()));
    assert!(!controller.is_auth_scheme_disabled("mock"));
}

#[tokio::test]
async fn no_explicit_credentials_allowed() {
    let capture = Arc::new(CapturingNetLog::new());
    let factory = Arc::new(MockFactory::new());
    let headers = challenges(WWW_AUTHENTICATE, &["Ernie", "Bert"]);

    // Ernie takes the default identity.
    factory.add_mock_handler(
        MockHandler::new()
            .scheme("ernie")
            .allows_default_credentials(true)
            .allows_explicit_credentials(false),
        Target::Server,
    );

    let mut controller = AuthController::new(
        Target::Server,
        &url(),
        Arc::new(AuthCache::new()),
        factory.clone(),
    )
    .with_net_log(BoundNetLog::new(capture.clone()));

    controller.handle_auth_challenge(&headers, false).unwrap();
    assert!(controller.have_auth());
    assert_eq!(controller.identity().source, IdentitySource::DefaultCredentials);
    assert!(!factory.have_auth_handlers(Target::Server));
    controller.maybe_generate_auth_token(&request()).await.unwrap();
    assert_eq!(controller.auth_token(), Some("ernie auth_token"));

    // Ernie is rejected; the default identity is spent and Ernie cannot
    // prompt, so it is disabled and Bert is used. Bert is built twice: once
    // while Ernie still wins the tie, once after Ernie is disabled.
    factory.add_mock_handler(
        MockHandler::new()
            .scheme("ernie")
            .allows_default_credentials(true)
            .allows_explicit_credentials(false),
        Target::Server,
    );
    for _ in 0..2 {
        factory.add_mock_handler(
            MockHandler::new()
                .scheme("bert")
                .allows_default_credentials(false)
                .allows_explicit_credentials(true),
            Target::Server,
        );
    }

    controller.handle_auth_challenge(&headers, false).unwrap();
    assert!(controller.have_auth_handler());
    assert!(!controller.have_auth());
    assert_eq!(controller.auth_info().unwrap().scheme, "bert");
    controller.reset_auth(AuthCredentials::new("Hello", ""));
    assert!(controller.have_auth());
    assert!(controller.is_auth_scheme_disabled("ernie"));
    assert!(!controller.is_auth_scheme_disabled("bert"));
    assert!(!factory.have_auth_handlers(Target::Server));

    controller.maybe_generate_auth_token(&request()).await.unwrap();
    assert_eq!(controller.auth_token(), Some("bert auth_token"));

    let events = capture.events();
    assert!(events.contains(&NetLogEvent::SchemeDisabled {
        target: Target::Server,
        scheme: "ernie".into(),
    }));
    assert!(events.contains(&NetLogEvent::SchemeSelected {
        target: Target::Server,
        scheme: "bert".into(),
    }));
}

#[tokio::test]
async fn basic_round_trip_through_the_registry() {
    let registry = AuthHandlerRegistry::from_preferences(&AuthPreferences::default(), None, None);
    let cache = Arc::new(AuthCache::new());
    let page = Url::parse("http://example.com/private/page.html").unwrap();
    let mut controller = AuthController::new(Target::Server, &page, cache.clone(), Arc::new(registry.clone()));
    let request = RequestInfo::new(Method::GET, page.clone());

    controller
        .handle_auth_challenge(
            &challenges(WWW_AUTHENTICATE, &["Negotiate", "NTLM", "Basic realm=\"private\""]),
            false,
        )
        .unwrap();
    // no security library is configured, so only Basic is usable
    assert_eq!(controller.auth_info().unwrap().realm, "private");
    assert_eq!(controller.state(), ControllerState::HaveHandler);

    controller.reset_auth(AuthCredentials::new("foo", "bar"));
    controller.maybe_generate_auth_token(&request).await.unwrap();
    assert_eq!(controller.auth_token(), Some("Basic Zm9vOmJhcg=="));
    controller.on_auth_accepted();
    assert_eq!(controller.state(), ControllerState::Succeeded);

    // a second transaction to the same directory authenticates up front
    let sibling = Url::parse("http://example.com/private/other.html").unwrap();
    let mut next = AuthController::new(Target::Server, &sibling, cache, Arc::new(registry));
    next.maybe_generate_auth_token(&RequestInfo::new(Method::GET, sibling))
        .await
        .unwrap();
    assert_eq!(next.auth_token(), Some("Basic Zm9vOmJhcg=="));
    assert_eq!(next.identity().source, IdentitySource::PathLookup);
}
