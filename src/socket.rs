//! Sockets and the per-socket core.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::aio::{Aio, AioResult, CancelFn, OpKind};
use crate::error::{Error, Result, SendResult};
use crate::message::Message;
use crate::pattern::{reqrep, Completion, Pattern};
use crate::pipe::{Pipe, PipeEvent, PipeNotifyFn};
use crate::protocol::Protocol;
use crate::transport;

/// An outbound frame: a message, optionally bound to one specific pipe.
///
/// Requests go out untargeted and are picked up by whichever pipe drains
/// first; replies are bound to the pipe their request arrived on.
pub(crate) struct Frame
{
	pub(crate) target: Option<u32>,
	pub(crate) msg: Message,
}

/// A sender parked on a full outbound queue.
pub(crate) struct SendWaiter
{
	pub(crate) aio: Aio,
	pub(crate) frame: Frame,
}

/// A pipe attached to the socket.
pub(crate) struct PipeEntry
{
	pub(crate) id: u32,
	closer: Box<dyn Fn() + Send>,
}

/// A running dialer or listener.
///
/// Dropping the handle does nothing; `stop` is invoked when the socket
/// closes and must wake anything the endpoint has blocked in the
/// background.
pub(crate) struct EndpointHandle
{
	pub(crate) stop: Box<dyn Fn() + Send>,
}

/// Socket options read by the pattern and transport layers.
pub(crate) struct Opts
{
	pub(crate) resend_time: Option<Duration>,
	pub(crate) send_buf: usize,
	pub(crate) recv_buf: usize,
	pub(crate) send_timeout: Option<Duration>,
	pub(crate) recv_timeout: Option<Duration>,
	pub(crate) recv_max_size: usize,
	pub(crate) reconnect_min: Duration,
	pub(crate) reconnect_max: Option<Duration>,
	pub(crate) tcp_no_delay: bool,
	pub(crate) tcp_keep_alive: bool,
}

impl Default for Opts
{
	fn default() -> Opts
	{
		Opts {
			resend_time: Some(reqrep::DEFAULT_RESEND_TIME),
			send_buf: 1,
			recv_buf: 128,
			send_timeout: None,
			recv_timeout: None,
			recv_max_size: 0,
			reconnect_min: Duration::from_millis(100),
			reconnect_max: None,
			tcp_no_delay: true,
			tcp_keep_alive: false,
		}
	}
}

/// A borrowed view of the socket's outbound machinery, handed to the
/// pattern functions alongside the pattern state itself.
pub(crate) struct Queues<'a>
{
	pub(crate) opts: &'a Opts,
	outbox: &'a mut VecDeque<Frame>,
	waiters: &'a mut VecDeque<SendWaiter>,
	pipes: &'a [PipeEntry],
}

impl<'a> Queues<'a>
{
	pub(crate) fn is_full(&self) -> bool
	{
		self.outbox.len() >= self.opts.send_buf
	}

	pub(crate) fn push(&mut self, target: Option<u32>, msg: Message)
	{
		self.outbox.push_back(Frame { target, msg });
	}

	pub(crate) fn park(&mut self, aio: &Aio, target: Option<u32>, msg: Message)
	{
		self.waiters.push_back(SendWaiter {
			aio: aio.clone(),
			frame: Frame { target, msg },
		});
	}

	pub(crate) fn has_pipe(&self, id: u32) -> bool
	{
		self.pipes.iter().any(|p| p.id == id)
	}

	pub(crate) fn has_untargeted(&self) -> bool
	{
		self.outbox.iter().any(|f| f.target.is_none())
	}
}

struct State
{
	closed: bool,
	pattern: Pattern,
	pipes: Vec<PipeEntry>,
	next_pipe_id: u32,
	outbox: VecDeque<Frame>,
	send_waiters: VecDeque<SendWaiter>,
	opts: Opts,
	notify: Option<Arc<PipeNotifyFn>>,
	listeners: Vec<EndpointHandle>,
	dialers: Vec<EndpointHandle>,
}

impl State
{
	fn split(&mut self) -> (&mut Pattern, Queues<'_>)
	{
		let State {
			ref mut pattern,
			ref mut outbox,
			ref mut send_waiters,
			ref opts,
			ref pipes,
			..
		} = *self;

		(pattern, Queues { opts, outbox, waiters: send_waiters, pipes })
	}
}

/// The shared core of a socket.
///
/// Transports hold a reference to the core of every socket they service;
/// the pattern state machine, the pipe list, and the outbound queue all
/// live behind its single mutex. AIO completions are never invoked while
/// that mutex is held.
pub(crate) struct Core
{
	pub(crate) proto: Protocol,
	state: Mutex<State>,
	cv: Condvar,
}

impl Core
{
	pub(crate) fn new(proto: Protocol) -> Arc<Core>
	{
		Arc::new(Core {
			proto,
			cv: Condvar::new(),
			state: Mutex::new(State {
				closed: false,
				pattern: Pattern::new(proto),
				pipes: Vec::new(),
				next_pipe_id: 1,
				outbox: VecDeque::new(),
				send_waiters: VecDeque::new(),
				opts: Opts::default(),
				notify: None,
				listeners: Vec::new(),
				dialers: Vec::new(),
			}),
		})
	}

	/// Runs `f` against the socket's options.
	pub(crate) fn with_opts<R>(&self, f: impl FnOnce(&Opts) -> R) -> R
	{
		f(&self.state.lock().unwrap().opts)
	}

	/// Runs `f` against the socket's options, mutably.
	pub(crate) fn set_opts(&self, f: impl FnOnce(&mut Opts) -> Result<()>) -> Result<()>
	{
		f(&mut self.state.lock().unwrap().opts)
	}

	/// Starts a send operation.
	pub(crate) fn send_op(
		core: &Arc<Core>,
		aio: &Aio,
		msg: Message,
		nonblock: bool,
	) -> SendResult<()>
	{
		let hook = Core::abort_hook(core);
		if let Err(e) = aio.start(OpKind::Send, hook) {
			return Err((msg, e));
		}

		let mut out = Vec::new();
		{
			let mut st = core.state.lock().unwrap();
			if st.closed {
				aio.set_message(msg);
				out.push(Completion::new(aio.clone(), Err(Error::Closed), 0));
			}
			else {
				let (pattern, mut q) = st.split();
				match pattern {
					Pattern::Req(req) => req.send(core, &mut q, aio, msg, nonblock, &mut out),
					Pattern::Rep(rep) => rep.send(&mut q, aio, msg, nonblock, &mut out),
				}
				core.cv.notify_all();
			}
		}

		for c in out {
			c.run();
		}
		Ok(())
	}

	/// Starts a receive operation.
	pub(crate) fn recv_op(core: &Arc<Core>, aio: &Aio, nonblock: bool) -> Result<()>
	{
		let hook = Core::abort_hook(core);
		aio.start(OpKind::Recv, hook)?;

		let mut out = Vec::new();
		{
			let mut st = core.state.lock().unwrap();
			if st.closed {
				out.push(Completion::new(aio.clone(), Err(Error::Closed), 0));
			}
			else {
				match &mut st.pattern {
					Pattern::Req(req) => req.recv(aio, nonblock, &mut out),
					Pattern::Rep(rep) => rep.recv(aio, nonblock, &mut out),
				}
			}
		}

		for c in out {
			c.run();
		}
		Ok(())
	}

	/// The cancel hook shared by send and receive operations: claim the
	/// AIO from whichever queue it is parked in, and only then finish it.
	fn abort_hook(core: &Arc<Core>) -> CancelFn
	{
		let weak = Arc::downgrade(core);
		Box::new(move |aio, err| {
			if let Some(core) = weak.upgrade() {
				core.abort_op(aio, err);
			}
		})
	}

	fn abort_op(&self, aio: &Aio, err: Error)
	{
		let claimed = {
			let mut st = self.state.lock().unwrap();
			if let Some(pos) = st.send_waiters.iter().position(|w| w.aio == *aio) {
				st.send_waiters.remove(pos);
				true
			}
			else {
				st.pattern.abort(aio)
			}
		};

		if claimed {
			aio.finish(Err(err), 0);
		}
	}

	/// Delivers a message arriving on a pipe to the pattern layer.
	///
	/// Called by transports from their own threads; the message is in
	/// wire form, header and body concatenated into the body.
	pub(crate) fn deliver(&self, pipe: u32, msg: Message)
	{
		let mut out = Vec::new();
		{
			let mut st = self.state.lock().unwrap();
			if st.closed {
				return;
			}

			let (pattern, q) = st.split();
			let opts = q.opts;
			match pattern {
				Pattern::Req(req) => req.deliver(msg, &mut out),
				Pattern::Rep(rep) => rep.deliver(pipe, msg, opts, &mut out),
			}
		}

		for c in out {
			c.run();
		}
	}

	/// Fired by the REQ resend timer.
	pub(crate) fn resend(core: &Arc<Core>)
	{
		let mut st = core.state.lock().unwrap();
		if st.closed {
			return;
		}

		let (pattern, mut q) = st.split();
		if let Pattern::Req(req) = pattern {
			req.resend(core, &mut q);
		}
		core.cv.notify_all();
	}

	/// Attaches a new pipe, returning its ID.
	///
	/// The closer must wake anything the pipe's threads block on; it is
	/// invoked when the socket closes underneath them.
	pub(crate) fn attach_pipe(&self, closer: Box<dyn Fn() + Send>) -> Result<u32>
	{
		let (id, notify) = {
			let mut st = self.state.lock().unwrap();
			if st.closed {
				return Err(Error::Closed);
			}
			let id = st.next_pipe_id;
			st.next_pipe_id += 1;
			(id, st.notify.clone())
		};

		if let Some(n) = &notify {
			n(Pipe::new(id), PipeEvent::AddPre);
		}

		{
			let mut st = self.state.lock().unwrap();
			if st.closed {
				return Err(Error::Closed);
			}
			st.pipes.push(PipeEntry { id, closer });

			let (pattern, mut q) = st.split();
			if let Pattern::Req(req) = pattern {
				req.pipe_attached(&mut q);
			}
			self.cv.notify_all();
		}

		if let Some(n) = &notify {
			n(Pipe::new(id), PipeEvent::AddPost);
		}
		Ok(id)
	}

	/// Detaches a pipe. Idempotent; both pipe threads call it on exit.
	pub(crate) fn detach_pipe(&self, id: u32)
	{
		let (entry, notify) = {
			let mut st = self.state.lock().unwrap();
			let pos = st.pipes.iter().position(|p| p.id == id);
			let entry = pos.map(|i| st.pipes.remove(i));
			self.cv.notify_all();
			(entry, st.notify.clone())
		};

		let entry = match entry {
			Some(e) => e,
			None => return,
		};
		(entry.closer)();

		if let Some(n) = notify {
			n(Pipe::new(id), PipeEvent::RemovePost);
		}
	}

	/// Blocks until an outbound frame is available for the given pipe.
	///
	/// Returns `None` once the socket closes or the pipe is detached,
	/// which is the pipe writer's signal to exit. Draining a frame frees a
	/// slot in the outbound queue, so a parked sender is promoted and
	/// completed here.
	pub(crate) fn next_frame(&self, pipe: u32) -> Option<Message>
	{
		let mut st = self.state.lock().unwrap();
		loop {
			if st.closed || !st.pipes.iter().any(|p| p.id == pipe) {
				return None;
			}

			let idx = st
				.outbox
				.iter()
				.position(|f| f.target.map_or(true, |t| t == pipe));
			if let Some(idx) = idx {
				let frame = match st.outbox.remove(idx) {
					Some(f) => f,
					None => continue,
				};

				let mut promoted = None;
				if st.outbox.len() < st.opts.send_buf {
					if let Some(w) = st.send_waiters.pop_front() {
						let len = w.frame.msg.len();
						st.outbox.push_back(w.frame);
						promoted = Some((w.aio, len));
						// The promoted frame may be for a different pipe.
						self.cv.notify_all();
					}
				}

				drop(st);
				if let Some((aio, len)) = promoted {
					aio.finish(Ok(()), len);
				}
				return Some(frame.msg);
			}

			st = self.cv.wait(st).unwrap();
		}
	}

	pub(crate) fn add_dialer(&self, ep: EndpointHandle) -> Result<()>
	{
		let mut st = self.state.lock().unwrap();
		if st.closed {
			drop(st);
			(ep.stop)();
			return Err(Error::Closed);
		}
		st.dialers.push(ep);
		Ok(())
	}

	pub(crate) fn add_listener(&self, ep: EndpointHandle) -> Result<()>
	{
		let mut st = self.state.lock().unwrap();
		if st.closed {
			drop(st);
			(ep.stop)();
			return Err(Error::Closed);
		}
		st.listeners.push(ep);
		Ok(())
	}

	fn set_notify(&self, notify: Arc<PipeNotifyFn>) -> Result<()>
	{
		let mut st = self.state.lock().unwrap();
		if st.closed {
			return Err(Error::Closed);
		}
		st.notify = Some(notify);
		Ok(())
	}

	/// Closes the socket.
	///
	/// Every parked AIO fails with `Error::Closed`, the endpoints are
	/// stopped, and the pipes are torn down. Safe to call repeatedly.
	pub(crate) fn close(&self)
	{
		let mut out: Vec<Completion> = Vec::new();
		let (pipes, endpoints) = {
			let mut st = self.state.lock().unwrap();
			if st.closed {
				return;
			}
			st.closed = true;

			for w in st.send_waiters.drain(..) {
				out.push(Completion::new(w.aio, Err(Error::Closed), 0));
			}
			st.pattern.close(&mut out);
			st.outbox.clear();

			let pipes: Vec<PipeEntry> = st.pipes.drain(..).collect();
			let listeners: Vec<EndpointHandle> = st.listeners.drain(..).collect();
			let dialers: Vec<EndpointHandle> = st.dialers.drain(..).collect();
			let endpoints: Vec<EndpointHandle> = listeners.into_iter().chain(dialers).collect();

			self.cv.notify_all();
			(pipes, endpoints)
		};

		for ep in &endpoints {
			(ep.stop)();
		}
		for p in &pipes {
			(p.closer)();
		}
		for c in out {
			c.run();
		}
	}
}

/// Owns the core on behalf of the user-facing handles; the last `Socket`
/// clone dropping closes the socket, even though transport threads may
/// still hold core references of their own.
struct Owner
{
	core: Arc<Core>,
}

impl Drop for Owner
{
	fn drop(&mut self)
	{
		self.core.close();
	}
}

/// A socket.
///
/// All communication between applications and remote Scalability Protocol
/// peers is done through sockets. A given socket can have multiple
/// dialers, listeners, and pipes, and may be connected to multiple
/// transports at the same time. However, a given socket has exactly one
/// protocol associated with it, which is responsible for its state machine
/// and messaging semantics.
#[derive(Clone)]
pub struct Socket
{
	inner: Arc<Owner>,

	/// Whether or not this socket should block on sending and receiving.
	nonblocking: bool,
}

impl Socket
{
	/// Creates a new socket which uses the specified protocol.
	pub fn new(t: Protocol) -> Result<Socket>
	{
		crate::init()?;
		Ok(Socket {
			inner: Arc::new(Owner { core: Core::new(t) }),
			nonblocking: false,
		})
	}

	pub(crate) fn core(&self) -> &Arc<Core>
	{
		&self.inner.core
	}

	/// Initiates a remote connection to a listener.
	///
	/// The first connection attempt, including any necessary name
	/// resolution, is made synchronously, so a failure such as a refused
	/// connection is returned immediately. Once a connection has been
	/// established and subsequently drops, the dialer re-establishes it in
	/// the background, backing off between attempts per the reconnect time
	/// options.
	pub fn dial(&mut self, url: &str) -> Result<()>
	{
		let tran = transport::find(url).ok_or(Error::AddressInvalid)?;
		let ep = tran.dial(url, self.core())?;
		self.core().add_dialer(ep)
	}

	/// Initiates and starts a listener on the specified address.
	///
	/// Listeners are used to accept connections initiated by remote
	/// dialers. Unlike a dialer, listeners generally can have many
	/// connections open concurrently. The act of binding to the address is
	/// done synchronously, so a failure, such as the address being already
	/// in use, is returned immediately.
	pub fn listen(&mut self, url: &str) -> Result<()>
	{
		let tran = transport::find(url).ok_or(Error::AddressInvalid)?;
		let ep = tran.listen(url, self.core())?;
		self.core().add_listener(ep)
	}

	/// Sets whether or not this socket should use nonblocking operations.
	///
	/// If the socket is set to nonblocking mode, then the send and receive
	/// functions return immediately even if there are no messages
	/// available or the message cannot be sent. Otherwise, the functions
	/// wait until the operation can complete or any configured timeout
	/// expires.
	///
	/// The default is blocking operations.
	pub fn set_nonblocking(&mut self, nonblocking: bool)
	{
		self.nonblocking = nonblocking;
	}

	/// Receives a message from the socket.
	///
	/// The semantics of what receiving a message means vary from protocol
	/// to protocol, so examination of the protocol documentation is
	/// encouraged. For example, with a _req_ socket a message may only be
	/// received after a request has been sent.
	pub fn recv(&mut self) -> Result<Message>
	{
		let slot = Arc::new(Mutex::new(None));
		let stash = Arc::clone(&slot);
		let aio = Aio::new(move |_, res| {
			*stash.lock().unwrap() = Some(res);
		});

		if !self.nonblocking {
			if let Some(d) = self.core().with_opts(|o| o.recv_timeout) {
				aio.set_timeout(Some(d))?;
			}
		}

		Core::recv_op(self.core(), &aio, self.nonblocking)?;
		aio.wait();

		let res = slot.lock().unwrap().take();
		match res {
			Some(AioResult::RecvOk(m)) => Ok(m),
			Some(AioResult::RecvErr(e)) => Err(e),
			_ => unreachable!("receive completed with a non-receive result"),
		}
	}

	/// Sends a message on the socket.
	///
	/// The semantics of what sending a message means vary from protocol to
	/// protocol, so examination of the protocol documentation is
	/// encouraged. For example, _rep_ sockets cannot normally send data,
	/// which are responses to requests, until they have first received a
	/// request.
	///
	/// If the message cannot be sent, then it is returned to the caller as
	/// a part of the `Error`.
	pub fn send(&mut self, msg: Message) -> SendResult<()>
	{
		let slot = Arc::new(Mutex::new(None));
		let stash = Arc::clone(&slot);
		let aio = Aio::new(move |_, res| {
			*stash.lock().unwrap() = Some(res);
		});

		if !self.nonblocking {
			if let Some(d) = self.core().with_opts(|o| o.send_timeout) {
				if let Err(e) = aio.set_timeout(Some(d)) {
					return Err((msg, e));
				}
			}
		}

		Core::send_op(self.core(), &aio, msg, self.nonblocking)?;
		aio.wait();

		let res = slot.lock().unwrap().take();
		match res {
			Some(AioResult::SendOk) => Ok(()),
			Some(AioResult::SendErr(m, e)) => Err((m, e)),
			_ => unreachable!("send completed with a non-send result"),
		}
	}

	/// Sends a message using the socket asynchronously.
	///
	/// The result of this operation will be available either after calling
	/// `Aio::wait` or inside of the callback function. If the send
	/// operation fails, the message is returned inside the result.
	///
	/// This function returns immediately. If there is already an I/O
	/// operation in progress on the AIO, this function returns
	/// `Error::TryAgain` and the message to the caller.
	pub fn send_async(&mut self, aio: &Aio, msg: Message) -> SendResult<()>
	{
		Core::send_op(self.core(), aio, msg, false)
	}

	/// Receives a message using the socket asynchronously.
	///
	/// The result of this operation will be available either after calling
	/// `Aio::wait` or inside of the callback function.
	///
	/// This function returns immediately. If there is already an I/O
	/// operation in progress on the AIO, this function returns
	/// `Error::TryAgain`.
	pub fn recv_async(&mut self, aio: &Aio) -> Result<()>
	{
		Core::recv_op(self.core(), aio, false)
	}

	/// Returns the protocol of the socket.
	pub fn protocol(&self) -> Protocol
	{
		self.core().proto
	}

	/// Returns the protocol of the sockets this socket pairs with.
	pub fn peer(&self) -> Protocol
	{
		self.core().proto.peer()
	}

	/// Registers a pipe notification callback.
	///
	/// The callback will be notified as connections are added to and
	/// removed from the socket.
	pub fn pipe_notify(&mut self, callback: Box<PipeNotifyFn>) -> Result<()>
	{
		self.core().set_notify(Arc::from(callback))
	}

	/// Closes the socket.
	///
	/// Pending operations fail with `Error::Closed`, and all dialers,
	/// listeners, and pipes belonging to the socket are stopped. Dropping
	/// the last clone of the socket closes it implicitly.
	pub fn close(&self)
	{
		self.inner.core.close();
	}

	/// Reads the value of a socket option.
	pub fn get_opt<T: crate::options::Opt>(&self) -> Result<T::OptType>
	{
		T::get(self)
	}

	/// Sets the value of a socket option.
	pub fn set_opt<T: crate::options::Opt>(&self, value: T::OptType) -> Result<()>
	{
		T::set(self, value)
	}
}

impl fmt::Debug for Socket
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		write!(f, "Socket {{ protocol: {} }}", self.protocol())
	}
}
