//! Library initialization and the global runtime.
//!
//! The runtime owns the background workers shared by every socket: the
//! completion task queue, the timer thread, and the resolver pool. It is
//! created by `init`, torn down by `fini`, and re-creatable afterwards,
//! which keeps the library testable. Entry points that need the runtime
//! (opening a socket, creating an AIO, resolving a name) call `init`
//! themselves, so most applications never have to.
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lazy_static::lazy_static;

use crate::error::Result;
use crate::platform::{TaskQueue, Timer, TimerToken};
use crate::transport;

/// Number of worker threads servicing AIO completion callbacks.
const TASKQ_CONCURRENCY: usize = 4;

/// Number of worker threads servicing name resolution.
///
/// Names are typically resolved at connection setup rather than in steady
/// state, so a small fixed pool is concurrent enough while staying
/// portable.
const RESOLV_CONCURRENCY: usize = 4;

pub(crate) struct Runtime
{
	pub(crate) taskq: TaskQueue,
	pub(crate) timer: Timer,
	pub(crate) resolver: TaskQueue,
}

lazy_static! {
	static ref RUNTIME: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);
}

/// Initializes the library.
///
/// This brings up the background workers and registers the built-in
/// transports. It is idempotent, and it is called implicitly by any entry
/// point that needs the runtime, so calling it explicitly is only required
/// when the application wants initialization failures surfaced at a known
/// point.
pub fn init() -> Result<()>
{
	{
		let mut rt = RUNTIME.lock().unwrap();
		if rt.is_none() {
			*rt = Some(Arc::new(Runtime {
				taskq: TaskQueue::new("nanolink-task", TASKQ_CONCURRENCY)?,
				timer: Timer::new()?,
				resolver: TaskQueue::new("nanolink-resolv", RESOLV_CONCURRENCY)?,
			}));
		}
	}

	transport::sys_init()
}

/// Tears the library back down.
///
/// All sockets should be closed before calling this. The transports are
/// finalized first, then the background workers are stopped; queued
/// completions are drained before the task queue exits. Calling `fini`
/// without a prior `init` is harmless, and `init` works again afterwards.
pub fn fini()
{
	transport::sys_fini();

	let rt = { RUNTIME.lock().unwrap().take() };
	if let Some(rt) = rt {
		rt.timer.shutdown();
		rt.resolver.shutdown();
		rt.taskq.shutdown();
	}
}

/// Returns a handle to the runtime, if it is up.
pub(crate) fn runtime() -> Option<Arc<Runtime>>
{
	RUNTIME.lock().unwrap().clone()
}

/// Runs `f` on a completion worker.
///
/// If the runtime is gone the closure runs inline on the calling thread,
/// so a completion is never lost to a late teardown.
pub(crate) fn dispatch(f: Box<dyn FnOnce() + Send>)
{
	match runtime() {
		Some(rt) => {
			rt.taskq.dispatch(f);
		}
		None => f(),
	}
}

/// Schedules `f` on the timer thread, if the runtime is up.
pub(crate) fn schedule(when: Instant, f: Box<dyn FnOnce() + Send>) -> Option<TimerToken>
{
	runtime().map(|rt| rt.timer.schedule(when, f))
}

/// Cancels a timer entry, if the runtime is up.
///
/// Returns `true` if the entry was removed before firing, meaning the
/// caller now owns whatever completion the entry would have produced.
pub(crate) fn timer_cancel(token: &TimerToken) -> bool
{
	match runtime() {
		Some(rt) => rt.timer.cancel(token),
		None => false,
	}
}
