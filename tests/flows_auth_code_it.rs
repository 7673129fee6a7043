#![cfg(feature = "test")]

// std
use std::{
	io::{Read, Write},
	net::{TcpListener, TcpStream},
	thread,
	time::Duration as StdDuration,
};
// crates.io
use httpmock::prelude::*;
// self
use graph_broker::{_preludet::*, flows::PkceCodeChallengeMethod};

const TOKEN_PATH: &str = "/common/oauth2/v2.0/token";
const TOKEN_BODY: &str = "{\"access_token\":\"access-login\",\"refresh_token\":\"refresh-login\",\"token_type\":\"Bearer\",\"expires_in\":3600,\"scope\":\"offline_access User.Read\"}";

fn free_redirect_uri() -> String {
	let listener = TcpListener::bind("127.0.0.1:0").expect("Ephemeral port should bind.");
	let port = listener.local_addr().expect("Bound listener should expose its address.").port();

	format!("http://127.0.0.1:{port}/auth/callback")
}

fn browser_get(redirect_uri: &str, target: &str) -> String {
	let base = Url::parse(redirect_uri).expect("Redirect URI should parse.");
	let addr = format!(
		"{}:{}",
		base.host_str().expect("Redirect URI should carry a host."),
		base.port().expect("Redirect URI should carry a port.")
	);
	let mut stream = TcpStream::connect(addr).expect("Redirect receiver should accept connections.");

	write!(stream, "GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n")
		.expect("Callback request should be written.");

	let mut response = String::new();

	stream.read_to_string(&mut response).expect("Callback response should be readable.");

	response
}

#[tokio::test]
async fn exchange_code_stores_the_record_and_rejects_replay() {
	let server = MockServer::start_async().await;
	let rig = build_test_coordinator(&server.base_url(), "http://localhost:3000/auth/callback");
	let request = rig.auth.build_authorization_request();

	assert_eq!(request.code_challenge_method, PkceCodeChallengeMethod::S256);
	assert_eq!(request.state.len(), 32);

	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(TOKEN_PATH)
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", "authorization_code")
				.form_urlencoded_tuple("code", "code-123")
				.form_urlencoded_tuple("client_id", TEST_CLIENT_ID);
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;

	rig.auth
		.exchange_code("code-123", &request.state)
		.await
		.expect("Authorization code exchange should succeed.");

	let record = rig.store.record().expect("Exchange should persist a record.");

	assert_eq!(record.access_token.expose(), "access-login");
	assert_eq!(record.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-login"));
	assert_eq!(record.scope, "offline_access User.Read");
	assert!(record.expires_at > OffsetDateTime::now_utc() + Duration::minutes(59));
	assert_eq!(rig.auth.pending_flows(), 0);

	let err = rig
		.auth
		.exchange_code("code-123", &request.state)
		.await
		.expect_err("Replaying a consumed state should fail.");

	assert!(matches!(err, Error::StateMismatch));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn forged_state_never_reaches_the_token_endpoint() {
	let server = MockServer::start_async().await;
	let rig = build_test_coordinator(&server.base_url(), "http://localhost:3000/auth/callback");
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;

	rig.auth.build_authorization_request();

	let err = rig
		.auth
		.exchange_code("code-123", "not-a-state-we-issued")
		.await
		.expect_err("Forged state should fail.");

	assert!(matches!(err, Error::StateMismatch));
	assert!(rig.store.record().is_none());

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn rejected_code_consumes_the_pending_flow() {
	let server = MockServer::start_async().await;
	let rig = build_test_coordinator(&server.base_url(), "http://localhost:3000/auth/callback");
	let request = rig.auth.build_authorization_request();
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\",\"error_description\":\"AADSTS70008: expired code\"}");
		})
		.await;
	let err = rig
		.auth
		.exchange_code("stale-code", &request.state)
		.await
		.expect_err("Rejected codes should fail the exchange.");

	assert!(matches!(err, Error::InvalidGrant { ref reason } if reason.contains("AADSTS70008")));
	assert_eq!(rig.auth.pending_flows(), 0);
	assert!(rig.store.record().is_none());

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn login_round_trips_through_the_redirect_receiver() {
	let server = MockServer::start_async().await;
	let redirect_uri = free_redirect_uri();
	let rig = build_test_coordinator(&server.base_url(), &redirect_uri);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(TOKEN_PATH)
				.form_urlencoded_tuple("grant_type", "authorization_code")
				.form_urlencoded_tuple("code", "browser-code");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let browser_redirect = redirect_uri.clone();
	let (tx, rx) = std::sync::mpsc::channel();

	rig.auth
		.login_with(StdDuration::from_secs(10), move |authorize_url| {
			let state = authorize_url
				.query_pairs()
				.find(|(key, _)| key == "state")
				.map(|(_, value)| value.into_owned())
				.expect("Authorize URL should carry a state.");

			thread::spawn(move || {
				let miss = browser_get(&browser_redirect, "/favicon.ico");
				let hit = browser_get(
					&browser_redirect,
					&format!("/auth/callback?code=browser-code&state={state}"),
				);

				let _ = tx.send((miss, hit));
			});
		})
		.await
		.expect("Interactive login should succeed.");

	let (miss, hit) = rx.recv().expect("Browser thread should report its responses.");

	assert!(miss.starts_with("HTTP/1.1 404"));
	assert!(hit.starts_with("HTTP/1.1 200"));
	assert_eq!(
		rig.store.access_token().map(|secret| secret.expose().to_owned()),
		Some("access-login".into())
	);
	assert_eq!(rig.auth.pending_flows(), 0);

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn login_surfaces_authorization_errors() {
	let redirect_uri = free_redirect_uri();
	let rig = build_test_coordinator("http://127.0.0.1:9", &redirect_uri);
	let browser_redirect = redirect_uri.clone();
	let err = rig
		.auth
		.login_with(StdDuration::from_secs(10), move |_| {
			thread::spawn(move || {
				browser_get(
					&browser_redirect,
					"/auth/callback?error=access_denied&error_description=User%20declined",
				);
			});
		})
		.await
		.expect_err("Authorization errors should fail the login.");

	assert!(matches!(
		err,
		Error::Authorization { ref error, ref description }
			if error == "access_denied" && description == "User declined"
	));
	assert_eq!(rig.auth.pending_flows(), 0);
}

#[tokio::test]
async fn login_times_out_without_a_callback() {
	let rig = build_test_coordinator("http://127.0.0.1:9", &free_redirect_uri());
	let err = rig
		.auth
		.login_with(StdDuration::from_millis(200), |_| {})
		.await
		.expect_err("Login without a callback should time out.");

	assert!(matches!(err, Error::LoginTimedOut));
	assert_eq!(err.to_string(), "Login timed out or was cancelled.");
	assert_eq!(rig.auth.pending_flows(), 0);
}
