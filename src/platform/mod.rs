//! Platform support primitives.
//!
//! These are the small pieces everything else is built on: a bounded worker
//! pool for running deferred work, a timer thread for deadlines and resend
//! periods, and a resettable event flag used to signal between threads. All
//! of them are plain `std::sync` constructions; none of them know anything
//! about sockets or patterns.
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub(crate) mod taskq;
pub(crate) mod timer;

pub(crate) use self::taskq::TaskQueue;
pub(crate) use self::timer::{Timer, TimerToken};

/// A resettable event flag.
///
/// Used by dialers to learn that an established pipe has gone away and by
/// endpoint teardown to interrupt a reconnect backoff sleep.
pub(crate) struct Flag
{
	state: Mutex<bool>,
	cv: Condvar,
}

impl Flag
{
	pub(crate) fn new() -> Flag
	{
		Flag { state: Mutex::new(false), cv: Condvar::new() }
	}

	/// Raises the flag, waking all waiters.
	pub(crate) fn set(&self)
	{
		let mut s = self.state.lock().unwrap();
		*s = true;
		self.cv.notify_all();
	}

	/// Blocks until the flag is raised, then lowers it again.
	pub(crate) fn wait_and_clear(&self)
	{
		let mut s = self.state.lock().unwrap();
		while !*s {
			s = self.cv.wait(s).unwrap();
		}
		*s = false;
	}

	/// Waits up to `dur` for the flag to be raised.
	///
	/// Returns `true` if the flag was raised. The flag is not lowered; a
	/// raised flag stays visible to the next waiter.
	pub(crate) fn wait_timeout(&self, dur: Duration) -> bool
	{
		let mut s = self.state.lock().unwrap();
		let deadline = std::time::Instant::now() + dur;
		while !*s {
			let now = std::time::Instant::now();
			if now >= deadline {
				return false;
			}
			let (ns, _) = self.cv.wait_timeout(s, deadline - now).unwrap();
			s = ns;
		}
		true
	}
}
