//! One-shot loopback listener that captures the authorization redirect.
//!
//! The receiver runs on a dedicated OS thread with its own deadline and reports over a
//! `tokio::sync::oneshot` channel. Dropping the waiting future closes the channel, and the
//! worker stops at its next poll.

// std
use std::{
	io::{BufRead, BufReader, ErrorKind, Write},
	net::{SocketAddr, TcpListener, TcpStream},
	thread,
	time::{Duration as StdDuration, Instant},
};
// crates.io
use tokio::sync::oneshot;
use url::Host;
// self
use crate::{_prelude::*, error::ConfigError};

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(25);
const READ_TIMEOUT: StdDuration = StdDuration::from_secs(5);
const MAX_HEADER_LINES: usize = 100;
const UNKNOWN_ERROR: &str = "Unknown error";

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication successful!</h1>\
	<p>You can close this tab.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authentication failed.</h1>\
	<p>You can close this tab.</p></body></html>";
const MISSING_CODE_PAGE: &str = "<html><body><h1>Missing authorization code.</h1></body></html>";

/// Parameters captured from a successful redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct CallbackParams {
	/// Authorization code to exchange.
	pub code: String,
	/// Returned anti-CSRF state.
	pub state: String,
}
impl Debug for CallbackParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CallbackParams")
			.field("code", &"<redacted>")
			.field("state", &self.state)
			.finish()
	}
}

/// Listener bound to the redirect URI's host and port.
#[derive(Debug)]
pub struct RedirectReceiver {
	listener: TcpListener,
	path: String,
}
impl RedirectReceiver {
	/// Binds the listener for `redirect_uri`, which must be a plain `http` URI with a host.
	pub fn bind(redirect_uri: &Url) -> Result<Self, ConfigError> {
		let invalid = |reason| ConfigError::InvalidRedirect { uri: redirect_uri.to_string(), reason };

		if redirect_uri.scheme() != "http" {
			return Err(invalid("the redirect receiver only serves plain http"));
		}

		let host = match redirect_uri.host() {
			Some(Host::Domain(domain)) => domain.to_owned(),
			Some(Host::Ipv4(ip)) => ip.to_string(),
			Some(Host::Ipv6(ip)) => ip.to_string(),
			None => return Err(invalid("missing host")),
		};
		let port = redirect_uri.port_or_known_default().ok_or_else(|| invalid("missing port"))?;
		let address = format!("{host}:{port}");
		let listener = TcpListener::bind((host.as_str(), port))
			.and_then(|listener| listener.set_nonblocking(true).map(|()| listener))
			.map_err(|source| ConfigError::RedirectBind { address, source })?;
		let path = match redirect_uri.path() {
			"" => "/".to_owned(),
			path => path.to_owned(),
		};

		tracing::debug!(path = %path, "Redirect receiver listening.");

		Ok(Self { listener, path })
	}

	/// Socket address the listener is bound to.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.listener.local_addr().ok()
	}

	/// Waits for one callback on the configured path, or fails once `timeout` elapses.
	pub async fn wait(self, timeout: StdDuration) -> Result<CallbackParams> {
		let (tx, rx) = oneshot::channel();
		let deadline = Instant::now() + timeout;

		thread::Builder::new()
			.name("graph-broker-redirect".into())
			.spawn(move || {
				let outcome = self.serve(deadline, &tx);

				let _ = tx.send(outcome);
			})
			.map_err(crate::error::TransportError::Io)?;

		rx.await.unwrap_or(Err(Error::LoginTimedOut))
	}

	fn serve(
		&self,
		deadline: Instant,
		tx: &oneshot::Sender<Result<CallbackParams>>,
	) -> Result<CallbackParams> {
		loop {
			if tx.is_closed() {
				tracing::debug!("Redirect receiver cancelled.");

				return Err(Error::LoginTimedOut);
			}
			if Instant::now() >= deadline {
				tracing::debug!("Redirect receiver timed out.");

				return Err(Error::LoginTimedOut);
			}

			match self.listener.accept() {
				Ok((stream, _)) =>
					if let Some(outcome) = handle_connection(stream, &self.path, deadline) {
						return outcome;
					},
				Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
				Err(e) => {
					tracing::debug!(error = %e, "Redirect receiver failed to accept a connection.");
					thread::sleep(POLL_INTERVAL);
				},
			}
		}
	}
}

/// Serves one request; `None` means "keep listening".
fn handle_connection(
	mut stream: TcpStream,
	expected_path: &str,
	deadline: Instant,
) -> Option<Result<CallbackParams>> {
	// Reads never outlive the login deadline.
	let read_timeout = deadline.saturating_duration_since(Instant::now()).min(READ_TIMEOUT);

	if read_timeout.is_zero() {
		return None;
	}

	let _ = stream.set_nonblocking(false);
	let _ = stream.set_read_timeout(Some(read_timeout));

	let target = read_request_target(&stream)?;
	let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(&target)) else {
		respond(&mut stream, "400 Bad Request", MISSING_CODE_PAGE);

		return None;
	};

	if url.path() != expected_path {
		respond(&mut stream, "404 Not Found", "");

		return None;
	}

	let mut code = None;
	let mut state = None;
	let mut error = None;
	let mut description = None;

	for (key, value) in url.query_pairs() {
		match key.as_ref() {
			"code" => code = Some(value.into_owned()),
			"state" => state = Some(value.into_owned()),
			"error" => error = Some(value.into_owned()),
			"error_description" => description = Some(value.into_owned()),
			_ => {},
		}
	}

	if let Some(error) = error {
		respond(&mut stream, "200 OK", FAILURE_PAGE);

		return Some(Err(Error::Authorization {
			error,
			description: description.unwrap_or_else(|| UNKNOWN_ERROR.into()),
		}));
	}

	match (code, state) {
		(Some(code), Some(state)) if !code.is_empty() && !state.is_empty() => {
			respond(&mut stream, "200 OK", SUCCESS_PAGE);

			Some(Ok(CallbackParams { code, state }))
		},
		_ => {
			respond(&mut stream, "400 Bad Request", MISSING_CODE_PAGE);

			None
		},
	}
}

fn read_request_target(stream: &TcpStream) -> Option<String> {
	let mut reader = BufReader::new(stream);
	let mut request_line = String::new();

	reader.read_line(&mut request_line).ok()?;

	let mut parts = request_line.split_whitespace();
	let target = match (parts.next(), parts.next()) {
		(Some("GET"), Some(target)) => target.to_owned(),
		_ => return None,
	};

	for _ in 0..MAX_HEADER_LINES {
		let mut line = String::new();

		match reader.read_line(&mut line) {
			Ok(0) | Err(_) => break,
			Ok(_) if line.trim_end().is_empty() => break,
			Ok(_) => {},
		}
	}

	Some(target)
}

fn respond(stream: &mut TcpStream, status: &str, page: &str) {
	let response = format!(
		"HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\
		 Connection: close\r\n\r\n{page}",
		page.len()
	);

	let _ = stream.write_all(response.as_bytes());
	let _ = stream.flush();
}

#[cfg(test)]
mod tests {
	// std
	use std::io::Read;
	// self
	use super::*;

	fn get(addr: SocketAddr, target: &str) -> String {
		let mut stream = TcpStream::connect(addr).expect("Receiver should accept connections.");

		write!(stream, "GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n")
			.expect("Request should be written.");

		let mut response = String::new();

		stream.read_to_string(&mut response).expect("Response should be readable.");

		response
	}

	fn receiver() -> (RedirectReceiver, SocketAddr) {
		let redirect = Url::parse("http://127.0.0.1:0/auth/callback").expect("Redirect should parse.");
		let receiver = RedirectReceiver::bind(&redirect).expect("Receiver should bind.");
		let addr = receiver.local_addr().expect("Receiver should expose its address.");

		(receiver, addr)
	}

	#[tokio::test]
	async fn foreign_paths_get_404_and_the_callback_is_still_captured() {
		let (receiver, addr) = receiver();
		let browser = thread::spawn(move || {
			let miss = get(addr, "/favicon.ico");
			let bare = get(addr, "/auth/callback");
			let hit = get(addr, "/auth/callback?code=abc&state=xyz");

			(miss, bare, hit)
		});
		let params = receiver
			.wait(StdDuration::from_secs(10))
			.await
			.expect("Receiver should capture the callback.");
		let (miss, bare, hit) = browser.join().expect("Browser thread should finish.");

		assert!(miss.starts_with("HTTP/1.1 404"));
		assert!(bare.starts_with("HTTP/1.1 400"));
		assert!(hit.starts_with("HTTP/1.1 200"));
		assert_eq!(params, CallbackParams { code: "abc".into(), state: "xyz".into() });
	}

	#[tokio::test]
	async fn error_callbacks_carry_code_and_description() {
		let (receiver, addr) = receiver();
		let browser = thread::spawn(move || get(addr, "/auth/callback?error=access_denied"));
		let err = receiver
			.wait(StdDuration::from_secs(10))
			.await
			.expect_err("Error callbacks should fail the login.");

		browser.join().expect("Browser thread should finish.");

		assert!(matches!(
			err,
			Error::Authorization { ref error, ref description }
				if error == "access_denied" && description == UNKNOWN_ERROR
		));
	}

	#[tokio::test]
	async fn silence_until_the_deadline_times_out() {
		let (receiver, _) = receiver();
		let err = receiver
			.wait(StdDuration::from_millis(100))
			.await
			.expect_err("No callback should time out.");

		assert!(matches!(err, Error::LoginTimedOut));
	}

	#[tokio::test]
	async fn a_silent_connection_cannot_outlast_the_deadline() {
		let (receiver, addr) = receiver();
		let _idle = TcpStream::connect(addr).expect("Receiver should accept connections.");
		let started = Instant::now();
		let err = receiver
			.wait(StdDuration::from_millis(300))
			.await
			.expect_err("An idle connection should not produce a callback.");

		assert!(matches!(err, Error::LoginTimedOut));
		assert!(started.elapsed() < READ_TIMEOUT);
	}

	#[test]
	fn non_http_redirects_are_rejected() {
		let redirect = Url::parse("https://localhost:3000/cb").expect("Redirect should parse.");

		assert!(matches!(
			RedirectReceiver::bind(&redirect),
			Err(ConfigError::InvalidRedirect { .. })
		));
	}
}
