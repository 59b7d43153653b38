//! A timer thread for deadlines and periodic work.
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use crate::error::Result;

type TimerFn = Box<dyn FnOnce() + Send>;

/// Identifies a scheduled timer entry so that it can be canceled.
///
/// Entries are keyed by their expiry instant plus a serial number, which
/// keeps entries with identical expiries distinct.
#[derive(Clone, Debug)]
pub(crate) struct TimerToken
{
	when: Instant,
	id: u64,
}

struct State
{
	entries: BTreeMap<(Instant, u64), TimerFn>,
	next_id: u64,
	shutdown: bool,
}

struct Inner
{
	state: Mutex<State>,
	cv: Condvar,
}

/// A single background thread that fires scheduled callbacks in expiry
/// order.
///
/// Callbacks run on the timer thread and must be brief and non-blocking;
/// anything long-running belongs on a task queue instead.
pub(crate) struct Timer
{
	inner: Arc<Inner>,
	thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer
{
	pub(crate) fn new() -> Result<Timer>
	{
		let inner = Arc::new(Inner {
			state: Mutex::new(State {
				entries: BTreeMap::new(),
				next_id: 1,
				shutdown: false,
			}),
			cv: Condvar::new(),
		});

		let worker = Arc::clone(&inner);
		let handle = thread::Builder::new()
			.name("nanolink-timer".to_string())
			.spawn(move || run(&worker))?;

		Ok(Timer { inner, thread: Mutex::new(Some(handle)) })
	}

	/// Schedules `f` to run at (or shortly after) `when`.
	pub(crate) fn schedule(&self, when: Instant, f: TimerFn) -> TimerToken
	{
		let mut state = self.inner.state.lock().unwrap();
		let id = state.next_id;
		state.next_id += 1;
		state.entries.insert((when, id), f);
		self.inner.cv.notify_all();
		TimerToken { when, id }
	}

	/// Removes a scheduled entry.
	///
	/// Returns `true` if the entry had not yet fired. A `false` return
	/// means the callback has run or is about to run.
	pub(crate) fn cancel(&self, token: &TimerToken) -> bool
	{
		let mut state = self.inner.state.lock().unwrap();
		state.entries.remove(&(token.when, token.id)).is_some()
	}

	/// Stops the timer thread. Entries that have not fired are dropped.
	pub(crate) fn shutdown(&self)
	{
		{
			let mut state = self.inner.state.lock().unwrap();
			state.shutdown = true;
			state.entries.clear();
			self.inner.cv.notify_all();
		}

		let handle = { self.thread.lock().unwrap().take() };
		if let Some(h) = handle {
			let _ = h.join();
		}
	}
}

impl Drop for Timer
{
	fn drop(&mut self)
	{
		self.shutdown();
	}
}

fn run(inner: &Inner)
{
	let mut state = inner.state.lock().unwrap();
	loop {
		if state.shutdown {
			break;
		}

		let next = state.entries.keys().next().cloned();
		match next {
			Some(key) => {
				let now = Instant::now();
				if key.0 <= now {
					// The remove is infallible: we hold the lock and
					// just observed the key.
					if let Some(cb) = state.entries.remove(&key) {
						drop(state);
						cb();
						state = inner.state.lock().unwrap();
					}
				}
				else {
					let (ns, _) = inner.cv.wait_timeout(state, key.0 - now).unwrap();
					state = ns;
				}
			}
			None => {
				state = inner.cv.wait(state).unwrap();
			}
		}
	}
}

#[cfg(test)]
mod tests
{
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;

	#[test]
	fn entries_fire_in_expiry_order()
	{
		let timer = Timer::new().unwrap();
		let order = Arc::new(Mutex::new(Vec::new()));
		let now = Instant::now();

		let o1 = Arc::clone(&order);
		timer.schedule(now + Duration::from_millis(60), Box::new(move || {
			o1.lock().unwrap().push(2);
		}));
		let o2 = Arc::clone(&order);
		timer.schedule(now + Duration::from_millis(10), Box::new(move || {
			o2.lock().unwrap().push(1);
		}));

		thread::sleep(Duration::from_millis(150));
		assert_eq!(*order.lock().unwrap(), vec![1, 2]);
		timer.shutdown();
	}

	#[test]
	fn canceled_entry_does_not_fire()
	{
		let timer = Timer::new().unwrap();
		let count = Arc::new(AtomicUsize::new(0));

		let c = Arc::clone(&count);
		let token = timer.schedule(Instant::now() + Duration::from_millis(40), Box::new(move || {
			c.fetch_add(1, Ordering::SeqCst);
		}));

		assert!(timer.cancel(&token));
		assert!(!timer.cancel(&token));

		thread::sleep(Duration::from_millis(100));
		assert_eq!(count.load(Ordering::SeqCst), 0);
		timer.shutdown();
	}
}
