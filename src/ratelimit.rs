//! Sliding-window admission control with cooperative backoff after remote throttling.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time::{self, Instant};
// self
use crate::_prelude::*;

/// Default admission ceiling per window.
pub const DEFAULT_MAX_REQUESTS: usize = 10_000;
/// Default window length.
pub const DEFAULT_WINDOW: StdDuration = StdDuration::from_secs(600);
/// Upper bound for the exponential backoff delay.
pub const MAX_BACKOFF: StdDuration = StdDuration::from_secs(60);
/// Upper bound for a server-supplied delay.
pub const MAX_HINTED_BACKOFF: StdDuration = crate::http::MAX_RETRY_AFTER;

#[derive(Debug, Default)]
struct WindowState {
	admissions: VecDeque<Instant>,
	backoff_until: Option<Instant>,
	consecutive_throttles: u32,
}
impl WindowState {
	fn prune(&mut self, now: Instant, window: StdDuration) {
		while self
			.admissions
			.front()
			.is_some_and(|admitted| now.saturating_duration_since(*admitted) >= window)
		{
			self.admissions.pop_front();
		}
	}
}

/// Process-wide limiter shared by every request pipeline in a context.
///
/// Admission history and backoff are separate state: a throttling event pushes the backoff
/// deadline forward but never discards recorded admissions.
#[derive(Debug)]
pub struct RateLimiter {
	max_requests: usize,
	window: StdDuration,
	state: Mutex<WindowState>,
}
impl RateLimiter {
	/// Creates a limiter admitting at most `max_requests` per rolling `window`.
	pub fn new(max_requests: usize, window: StdDuration) -> Self {
		Self { max_requests, window, state: Mutex::new(WindowState::default()) }
	}

	/// Configured ceiling.
	pub fn max_requests(&self) -> usize {
		self.max_requests
	}

	/// Configured window length.
	pub fn window(&self) -> StdDuration {
		self.window
	}

	/// Waits out any active backoff, then admits the call or fails without recording it.
	pub async fn acquire(&self) -> Result<()> {
		let backoff_until = self.state.lock().backoff_until;

		if let Some(until) = backoff_until.filter(|until| *until > Instant::now()) {
			tracing::debug!(
				wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
				"Waiting out rate limit backoff."
			);
			time::sleep_until(until).await;
		}

		let mut state = self.state.lock();
		let now = Instant::now();

		state.prune(now, self.window);

		if state.admissions.len() >= self.max_requests {
			tracing::warn!(
				max_requests = self.max_requests,
				window_secs = self.window.as_secs(),
				"Local rate limit reached."
			);

			return Err(Error::RateLimited {
				max_requests: self.max_requests,
				window_secs: self.window.as_secs(),
			});
		}

		state.admissions.push_back(now);

		Ok(())
	}

	/// Records a throttling response and returns how long the caller should wait.
	///
	/// A positive `retry_after` is used as-is; otherwise the delay doubles per consecutive
	/// throttle (2s, 4s, ...) up to [`MAX_BACKOFF`].
	pub fn handle_429(&self, retry_after: Option<StdDuration>) -> StdDuration {
		let mut state = self.state.lock();

		state.consecutive_throttles = state.consecutive_throttles.saturating_add(1);

		let delay = match retry_after.filter(|delay| !delay.is_zero()) {
			Some(hint) => hint.min(MAX_HINTED_BACKOFF),
			None => StdDuration::from_secs(2_u64.saturating_pow(state.consecutive_throttles))
				.min(MAX_BACKOFF),
		};
		let now = Instant::now();
		let candidate = now.checked_add(delay).unwrap_or_else(|| now + MAX_HINTED_BACKOFF);

		state.backoff_until = Some(match state.backoff_until {
			Some(existing) if existing > candidate => existing,
			_ => candidate,
		});

		tracing::warn!(
			consecutive = state.consecutive_throttles,
			delay_ms = delay.as_millis() as u64,
			"Remote service throttled the request; backing off."
		);

		delay
	}

	/// Clears throttling state after a fully successful call.
	pub fn reset_backoff(&self) {
		let mut state = self.state.lock();

		state.consecutive_throttles = 0;
		state.backoff_until = None;
	}

	/// Number of admissions currently inside the window.
	pub fn in_flight_window(&self) -> usize {
		let mut state = self.state.lock();

		state.prune(Instant::now(), self.window);

		state.admissions.len()
	}

	/// Consecutive throttling responses since the last reset.
	pub fn consecutive_throttles(&self) -> u32 {
		self.state.lock().consecutive_throttles
	}

	/// Active backoff deadline, if any.
	pub fn backoff_until(&self) -> Option<Instant> {
		self.state.lock().backoff_until
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn the_call_past_the_ceiling_fails_without_recording() {
		let limiter = RateLimiter::new(3, StdDuration::from_secs(10));

		for _ in 0..3 {
			limiter.acquire().await.expect("Calls under the ceiling should be admitted.");
		}

		let err = limiter.acquire().await.expect_err("The fourth call should be rejected.");

		assert!(matches!(err, Error::RateLimited { max_requests: 3, window_secs: 10 }));
		assert_eq!(limiter.in_flight_window(), 3);

		time::advance(StdDuration::from_secs(10)).await;

		assert_eq!(limiter.in_flight_window(), 0);
		limiter.acquire().await.expect("The window should slide after it elapses.");
	}

	#[tokio::test(start_paused = true)]
	async fn exponential_backoff_grows_to_the_cap_and_resets() {
		let limiter = RateLimiter::default();
		let delays: Vec<u64> = (0..7).map(|_| limiter.handle_429(None).as_secs()).collect();

		assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
		assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
		assert_eq!(limiter.consecutive_throttles(), 7);

		limiter.reset_backoff();

		assert_eq!(limiter.consecutive_throttles(), 0);
		assert!(limiter.backoff_until().is_none());
		assert_eq!(limiter.handle_429(None), StdDuration::from_secs(2));
	}

	#[tokio::test(start_paused = true)]
	async fn server_hints_win_and_the_deadline_never_moves_backward() {
		let limiter = RateLimiter::default();

		assert_eq!(limiter.handle_429(Some(StdDuration::from_secs(30))), StdDuration::from_secs(30));

		let first = limiter.backoff_until().expect("Backoff should be active.");

		assert_eq!(limiter.handle_429(Some(StdDuration::from_secs(1))), StdDuration::from_secs(1));
		assert_eq!(limiter.backoff_until(), Some(first));
		assert_eq!(limiter.handle_429(Some(StdDuration::ZERO)), StdDuration::from_secs(8));
	}

	#[tokio::test(start_paused = true)]
	async fn oversized_server_hints_are_capped() {
		let limiter = RateLimiter::default();
		let started = Instant::now();

		assert_eq!(limiter.handle_429(Some(StdDuration::MAX)), MAX_HINTED_BACKOFF);
		assert_eq!(limiter.backoff_until(), Some(started + MAX_HINTED_BACKOFF));
	}

	#[tokio::test(start_paused = true)]
	async fn acquire_waits_for_the_backoff_to_elapse() {
		let limiter = RateLimiter::default();
		let started = Instant::now();

		limiter.handle_429(Some(StdDuration::from_secs(5)));
		limiter.acquire().await.expect("Admission should succeed after the backoff.");

		assert!(started.elapsed() >= StdDuration::from_secs(5));
		assert_eq!(limiter.in_flight_window(), 1);
	}
}
