//! Pattern (protocol) state machines.
//!
//! A pattern is the per-socket state machine giving socket operations
//! their messaging semantics. All pattern state sits behind the owning
//! socket's lock; pattern functions therefore never block and never invoke
//! AIO completions themselves. Instead they record the completions to
//! perform in a list the socket runs after releasing its lock, which keeps
//! a user callback from re-entering the socket while it is still locked.
use crate::aio::Aio;
use crate::error::Result;
use crate::protocol::Protocol;

pub(crate) mod reqrep;

pub(crate) use self::reqrep::{RepState, ReqState};

/// The state machine attached to a socket.
pub(crate) enum Pattern
{
	Req(ReqState),
	Rep(RepState),
}

impl Pattern
{
	pub(crate) fn new(proto: Protocol) -> Pattern
	{
		match proto {
			Protocol::Req0 => Pattern::Req(ReqState::new()),
			Protocol::Rep0 => Pattern::Rep(RepState::new()),
		}
	}

	/// Claims the given AIO if it is parked in this pattern.
	///
	/// Returns `true` if the AIO was removed; the caller is then the sole
	/// finisher of the operation.
	pub(crate) fn abort(&mut self, aio: &Aio) -> bool
	{
		match self {
			Pattern::Req(s) => s.abort(aio),
			Pattern::Rep(s) => s.abort(aio),
		}
	}

	/// Fails anything parked in the pattern; the socket is closing.
	pub(crate) fn close(&mut self, out: &mut Vec<Completion>)
	{
		match self {
			Pattern::Req(s) => s.close(out),
			Pattern::Rep(s) => s.close(out),
		}
	}
}

/// A deferred AIO completion.
///
/// Collected under the socket lock, run after it is released.
pub(crate) struct Completion
{
	aio: Aio,
	rv: Result<()>,
	count: usize,
}

impl Completion
{
	pub(crate) fn new(aio: Aio, rv: Result<()>, count: usize) -> Completion
	{
		Completion { aio, rv, count }
	}

	pub(crate) fn run(self)
	{
		self.aio.finish(self.rv, self.count);
	}
}
