//! Asynchronous I/O operations.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::error;

use crate::addr::SocketAddr;
use crate::error::{Error, Result};
use crate::init;
use crate::message::Message;
use crate::platform::TimerToken;

/// A hook registered by the provider of an in-flight operation.
///
/// Cancellation is cooperative: the hook is invoked synchronously by
/// `cancel`, `stop`, or deadline expiry, and it must either claim the
/// operation from the provider (in which case it calls `finish` with the
/// given error) or leave the completion to whoever already owns it. Exactly
/// one of the two ever finishes the operation.
pub(crate) type CancelFn = Box<dyn FnOnce(&Aio, Error) + Send>;

type Callback = Box<dyn Fn(Aio, AioResult) + Send + Sync>;

/// The kind of operation an AIO is currently running.
///
/// This determines which `AioResult` variant the completion callback is
/// handed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OpKind
{
	Send,
	Recv,
	Sleep,
	Resolve,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Run
{
	Idle,
	Active,
	Finished,
}

struct State
{
	run: Run,
	stopped: bool,
	busy: bool,
	gen: u64,
	kind: OpKind,
	cancel: Option<CancelFn>,
	timeout: Option<Duration>,
	deadline: Option<TimerToken>,
	sleeper: Option<TimerToken>,
	pending_abort: Option<Error>,
	result: Result<usize>,
	msg: Option<Message>,
	addrs: Vec<SocketAddr>,
}

struct Inner
{
	state: Mutex<State>,
	cv: Condvar,
	callback: Callback,
}

/// An asynchronous I/O handle.
///
/// Asynchronous operations are performed without blocking calling
/// application threads. Instead the application registers a "callback"
/// function to be executed when the operation is complete (whether
/// successfully or not). This callback will be executed exactly once per
/// started operation, on a worker of the library's completion task queue,
/// never on the thread that started the operation.
///
/// The callback must not perform any blocking operations and must complete
/// its execution quickly. If the callback does block, this can lead
/// ultimately to an apparent "hang" or deadlock in the application.
///
/// At most one operation runs on an AIO at a time; starting a second one
/// while the first is in flight fails with `Error::TryAgain`. Once an
/// operation completes the handle can be reused for the next one.
#[derive(Clone)]
pub struct Aio
{
	inner: Arc<Inner>,
}

impl Aio
{
	/// Creates a new asynchronous I/O handle.
	///
	/// The provided callback will be called on every single I/O event,
	/// successful or not.
	///
	/// ## Panicking
	///
	/// If the callback function panics, the program aborts. The completion
	/// workers cannot recover from a poisoned callback, and unwinding
	/// through them would silently swallow the panic. The user is
	/// responsible for either having a callback that never panics or
	/// catching and handling the panic within the callback.
	pub fn new<F>(callback: F) -> Aio
	where
		F: Fn(Aio, AioResult) + Send + Sync + 'static,
	{
		// The completion workers have to exist before anything can
		// finish, mirroring the C convention of every allocation entry
		// point initializing the library.
		if let Err(e) = init::init() {
			error!("implicit library initialization failed: {}", e);
		}

		Aio {
			inner: Arc::new(Inner {
				state: Mutex::new(State {
					run: Run::Idle,
					stopped: false,
					busy: false,
					gen: 0,
					kind: OpKind::Sleep,
					cancel: None,
					timeout: None,
					deadline: None,
					sleeper: None,
					pending_abort: None,
					result: Ok(0),
					msg: None,
					addrs: Vec::new(),
				}),
				cv: Condvar::new(),
				callback: Box::new(callback),
			}),
		}
	}

	/// Sets the timeout of asynchronous operations.
	///
	/// This causes a timer to be started when an operation is started. If
	/// the timer expires before the operation is completed, the operation
	/// is aborted with `Error::TimedOut`.
	///
	/// It is only valid to set this while no operation is in flight.
	pub fn set_timeout(&self, dur: Option<Duration>) -> Result<()>
	{
		let mut s = self.inner.state.lock().unwrap();
		if s.run == Run::Active {
			return Err(Error::IncorrectState);
		}

		s.timeout = dur;
		Ok(())
	}

	/// Performs an asynchronous sleep operation.
	///
	/// If the sleep finishes completely, it will never return an error. If
	/// a timeout has been set and it is shorter than the duration of the
	/// sleep operation, the sleep operation will end early with
	/// `Error::TimedOut`.
	///
	/// This function returns immediately. If there is already an operation
	/// in progress, it returns `Error::TryAgain`.
	pub fn sleep(&self, dur: Duration) -> Result<()>
	{
		let hook: CancelFn = Box::new(|aio, err| {
			let token = {
				let mut s = aio.inner.state.lock().unwrap();
				match s.sleeper.take() {
					Some(t) => Some(t),
					None => {
						// The timer is not armed yet; leave a note
						// for the arming code below.
						s.pending_abort = Some(err);
						None
					}
				}
			};

			if let Some(t) = token {
				if init::timer_cancel(&t) {
					aio.finish(Err(err), 0);
				}
			}
		});

		let gen = self.start(OpKind::Sleep, hook)?;

		let weak = Arc::downgrade(&self.inner);
		let token = init::schedule(
			Instant::now() + dur,
			Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					Aio { inner }.finish_gen(gen, Ok(()), 0);
				}
			}),
		);

		let token = match token {
			Some(t) => t,
			None => {
				self.finish(Err(Error::Closed), 0);
				return Ok(());
			}
		};

		let aborted = {
			let mut s = self.inner.state.lock().unwrap();
			match s.pending_abort.take() {
				Some(err) => Some(err),
				None if s.run == Run::Active && s.gen == gen => {
					s.sleeper = Some(token.clone());
					None
				}
				None => {
					// Already finished; the timer entry is stale.
					drop(s);
					init::timer_cancel(&token);
					return Ok(());
				}
			}
		};

		if let Some(err) = aborted {
			if init::timer_cancel(&token) {
				self.finish(Err(err), 0);
			}
		}

		Ok(())
	}

	/// Blocks the current thread until the current asynchronous operation
	/// completes.
	///
	/// This includes the execution of the completion callback. If there is
	/// no operation running then this function returns immediately. It
	/// should **not** be called from within the completion callback.
	pub fn wait(&self)
	{
		let mut s = self.inner.state.lock().unwrap();
		while s.busy {
			s = self.inner.cv.wait(s).unwrap();
		}
	}

	/// Cancels the currently running operation.
	///
	/// Cancellation is cooperative and idempotent: the provider's cancel
	/// hook is invoked synchronously and arranges the single completion
	/// (normally with `Error::Canceled`). Cancelling an operation that has
	/// already completed is a no-op.
	pub fn cancel(&self)
	{
		let hook = { self.inner.state.lock().unwrap().cancel.take() };
		if let Some(h) = hook {
			h(self, Error::Canceled);
		}
	}

	/// Cancels the current operation and bars any future ones.
	///
	/// Unlike `cancel`, this waits for the in-flight completion callback
	/// to return, after which the AIO can never be started again.
	pub fn stop(&self)
	{
		let hook = {
			let mut s = self.inner.state.lock().unwrap();
			s.stopped = true;
			s.cancel.take()
		};
		if let Some(h) = hook {
			h(self, Error::Canceled);
		}

		self.wait();
	}

	/// Returns the result of the last completed operation.
	///
	/// On success the value is the operation's count: bytes moved for a
	/// send or receive, addresses produced for a resolve.
	pub fn result(&self) -> Result<usize>
	{
		self.inner.state.lock().unwrap().result.clone()
	}

	/// Returns the address list produced by the last resolve operation.
	pub fn addresses(&self) -> Vec<SocketAddr>
	{
		self.inner.state.lock().unwrap().addrs.clone()
	}

	/// Begins an operation on this AIO on behalf of a provider.
	///
	/// On success the provider owns the AIO until it calls `finish`, and
	/// the returned generation number identifies this particular start for
	/// deadline bookkeeping. Fails with `Error::Canceled` if the AIO has
	/// been stopped, `Error::TryAgain` if an operation is already in
	/// flight, and `Error::TimedOut` if the configured deadline has
	/// already elapsed.
	pub(crate) fn start(&self, kind: OpKind, cancel: CancelFn) -> Result<u64>
	{
		let (gen, deadline) = {
			let mut s = self.inner.state.lock().unwrap();
			if s.stopped {
				return Err(Error::Canceled);
			}
			if s.run == Run::Active {
				return Err(Error::TryAgain);
			}
			if s.timeout == Some(Duration::from_millis(0)) {
				return Err(Error::TimedOut);
			}

			s.run = Run::Active;
			s.busy = true;
			s.gen += 1;
			s.kind = kind;
			s.cancel = Some(cancel);
			s.pending_abort = None;
			s.result = Ok(0);
			s.msg = None;

			(s.gen, s.timeout.map(|d| Instant::now() + d))
		};

		if let Some(when) = deadline {
			let weak = Arc::downgrade(&self.inner);
			let token = init::schedule(
				when,
				Box::new(move || {
					if let Some(inner) = weak.upgrade() {
						Aio { inner }.expire(gen);
					}
				}),
			);

			if let Some(token) = token {
				let mut s = self.inner.state.lock().unwrap();
				if s.gen == gen && s.run == Run::Active {
					s.deadline = Some(token);
				}
				else {
					drop(s);
					init::timer_cancel(&token);
				}
			}
		}

		Ok(gen)
	}

	/// Completes the operation started on this AIO.
	///
	/// The run state moves to finished, the cancel hook is cleared, and
	/// the completion callback is dispatched onto the task queue. Calling
	/// this on an AIO with no operation in flight is a no-op, which makes
	/// the inevitable race between cancellation and completion harmless.
	pub(crate) fn finish(&self, rv: Result<()>, count: usize)
	{
		self.finish_impl(None, rv, count);
	}

	fn finish_gen(&self, gen: u64, rv: Result<()>, count: usize)
	{
		self.finish_impl(Some(gen), rv, count);
	}

	fn finish_impl(&self, gen: Option<u64>, rv: Result<()>, count: usize)
	{
		let (done, deadline, sleeper) = {
			let mut s = self.inner.state.lock().unwrap();
			if s.run != Run::Active {
				return;
			}
			if let Some(g) = gen {
				if s.gen != g {
					return;
				}
			}

			s.run = Run::Finished;
			s.cancel = None;
			s.result = match rv {
				Ok(()) => Ok(count),
				Err(e) => Err(e),
			};

			(s.gen, s.deadline.take(), s.sleeper.take())
		};

		if let Some(t) = deadline {
			init::timer_cancel(&t);
		}
		if let Some(t) = sleeper {
			init::timer_cancel(&t);
		}

		let aio = self.clone();
		init::dispatch(Box::new(move || aio.run_callback(done)));
	}

	/// Places a message in the AIO's slot.
	///
	/// For a receive this is the arriving message; for a failed send it is
	/// the unsent message handed back to the application.
	pub(crate) fn set_message(&self, msg: Message)
	{
		self.inner.state.lock().unwrap().msg = Some(msg);
	}

	/// Replaces the AIO's address list.
	pub(crate) fn set_addresses(&self, addrs: Vec<SocketAddr>)
	{
		self.inner.state.lock().unwrap().addrs = addrs;
	}

	/// Releases any address list left over from a previous resolve.
	pub(crate) fn clear_addresses(&self)
	{
		self.inner.state.lock().unwrap().addrs = Vec::new();
	}

	/// Fired by the deadline timer.
	fn expire(&self, gen: u64)
	{
		let hook = {
			let mut s = self.inner.state.lock().unwrap();
			if s.gen != gen || s.run != Run::Active {
				return;
			}
			s.deadline = None;
			s.cancel.take()
		};

		if let Some(h) = hook {
			h(self, Error::TimedOut);
		}
	}

	/// Runs the user callback on a completion worker.
	///
	/// The callback is free to start the AIO's next operation; `busy` is
	/// only cleared when it did not, so `wait` blocks until a whole chain
	/// of resubmissions has gone quiet.
	fn run_callback(&self, gen: u64)
	{
		let result = {
			let mut s = self.inner.state.lock().unwrap();
			match (s.kind, s.result.clone()) {
				(OpKind::Send, Ok(_)) => AioResult::SendOk,
				(OpKind::Send, Err(e)) => {
					AioResult::SendErr(s.msg.take().unwrap_or_default(), e)
				}
				(OpKind::Recv, Ok(_)) => {
					AioResult::RecvOk(s.msg.take().unwrap_or_default())
				}
				(OpKind::Recv, Err(e)) => AioResult::RecvErr(e),
				(OpKind::Sleep, Ok(_)) => AioResult::SleepOk,
				(OpKind::Sleep, Err(e)) => AioResult::SleepErr(e),
				(OpKind::Resolve, Ok(_)) => AioResult::ResolveOk(s.addrs.clone()),
				(OpKind::Resolve, Err(e)) => AioResult::ResolveErr(e),
			}
		};

		// See the type-level documentation for why a panicking callback
		// takes the process down with it.
		let rv = catch_unwind(AssertUnwindSafe(|| {
			(self.inner.callback)(self.clone(), result)
		}));
		if rv.is_err() {
			error!("panic in AIO completion callback");
			process::abort();
		}

		let mut s = self.inner.state.lock().unwrap();
		if s.gen == gen {
			s.busy = false;
			self.inner.cv.notify_all();
		}
	}
}

impl fmt::Debug for Aio
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		let s = self.inner.state.lock().unwrap();
		write!(f, "Aio {{ run: {:?}, kind: {:?} }}", s.run, s.kind)
	}
}

impl Hash for Aio
{
	fn hash<H: Hasher>(&self, state: &mut H)
	{
		(Arc::as_ptr(&self.inner) as usize).hash(state)
	}
}

impl PartialEq for Aio
{
	fn eq(&self, other: &Aio) -> bool
	{
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for Aio {}

/// The result of an AIO operation.
#[derive(Clone, Debug)]
#[must_use]
pub enum AioResult
{
	/// The send operation was successful.
	SendOk,

	/// The send operation failed.
	///
	/// This contains the message that was being sent.
	SendErr(Message, Error),

	/// The receive operation was successful.
	RecvOk(Message),

	/// The receive operation failed.
	RecvErr(Error),

	/// The sleep operation was successful.
	SleepOk,

	/// The sleep operation failed.
	///
	/// This is almost always because the sleep was canceled and the error
	/// will usually be `Error::Canceled`.
	SleepErr(Error),

	/// The resolve operation was successful.
	ResolveOk(Vec<SocketAddr>),

	/// The resolve operation failed.
	ResolveErr(Error),
}

impl From<AioResult> for Result<Option<Message>>
{
	fn from(aio_res: AioResult) -> Result<Option<Message>>
	{
		use self::AioResult::*;

		match aio_res {
			SendOk | SleepOk | ResolveOk(_) => Ok(None),
			SendErr(_, e) | RecvErr(e) | SleepErr(e) | ResolveErr(e) => Err(e),
			RecvOk(m) => Ok(Some(m)),
		}
	}
}

#[cfg(test)]
mod tests
{
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::thread;

	use super::*;

	fn counted() -> (Aio, Arc<AtomicUsize>)
	{
		let count = Arc::new(AtomicUsize::new(0));
		let c = Arc::clone(&count);
		let aio = Aio::new(move |_, _| {
			c.fetch_add(1, Ordering::SeqCst);
		});
		(aio, count)
	}

	#[test]
	fn sleep_completes_exactly_once()
	{
		let (aio, count) = counted();
		aio.sleep(Duration::from_millis(10)).unwrap();
		aio.wait();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Ok(0));
	}

	#[test]
	fn canceled_sleep_completes_exactly_once()
	{
		let (aio, count) = counted();
		aio.sleep(Duration::from_secs(30)).unwrap();
		aio.cancel();
		aio.wait();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Err(Error::Canceled));

		// A second cancel must not produce a second completion.
		aio.cancel();
		thread::sleep(Duration::from_millis(20));
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn timeout_aborts_the_operation()
	{
		let (aio, count) = counted();
		aio.set_timeout(Some(Duration::from_millis(20))).unwrap();
		aio.sleep(Duration::from_secs(30)).unwrap();
		aio.wait();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Err(Error::TimedOut));
	}

	#[test]
	fn second_start_fails_with_try_again()
	{
		let (aio, _count) = counted();
		aio.sleep(Duration::from_millis(100)).unwrap();
		assert_eq!(aio.sleep(Duration::from_millis(100)), Err(Error::TryAgain));
		aio.wait();
	}

	#[test]
	fn stopped_aio_cannot_be_started()
	{
		let (aio, count) = counted();
		aio.sleep(Duration::from_secs(30)).unwrap();
		aio.stop();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.sleep(Duration::from_millis(1)), Err(Error::Canceled));
	}

	#[test]
	fn timeout_can_only_change_while_idle()
	{
		let (aio, _count) = counted();
		aio.sleep(Duration::from_millis(100)).unwrap();
		assert_eq!(
			aio.set_timeout(Some(Duration::from_secs(1))),
			Err(Error::IncorrectState)
		);
		aio.wait();
		assert!(aio.set_timeout(None).is_ok());
	}
}
