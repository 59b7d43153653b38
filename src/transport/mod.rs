//! Transport registry and URL dispatch.
//!
//! A transport is a URL-scheme-addressed mechanism that establishes pipes
//! between sockets. The registry is a process-wide, insertion-ordered list
//! of transport descriptors; addresses are dispatched to the first
//! transport whose `"<scheme>://"` prefix matches, which lets composite
//! schemes such as `"tls+tcp://"` resolve without a second lookup pass.
//!
//! For now the list of transports is hard-wired. Adding new transports to
//! the system dynamically is something that might be considered later.
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use byteorder::{BigEndian, ByteOrder};
use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::options::OptValue;
use crate::platform::Flag;
use crate::protocol::Protocol;
use crate::socket::{Core, EndpointHandle};

pub(crate) mod inproc;
#[cfg(unix)]
pub(crate) mod ipc;
pub(crate) mod tcp;

/// The transport interface version this library was built against.
///
/// A descriptor carrying any other version is refused at registration.
pub(crate) const TRANSPORT_VERSION: u32 = 1;

/// Longest scheme that still fits a `"<scheme>://"` prefix in sixteen
/// bytes, terminator included.
const MAX_SCHEME_LEN: usize = 12;

/// A transport descriptor.
///
/// Descriptors are immutable once registered and live until `sys_fini`.
pub(crate) trait Transport: Send + Sync
{
	/// The URL scheme handled by this transport, e.g. `"tcp"`.
	fn scheme(&self) -> &'static str;

	/// The transport interface version the descriptor was built against.
	fn version(&self) -> u32;

	/// One-time setup, run under the registry lock at registration.
	///
	/// Transports must not call back into the registry from here.
	fn init(&self) -> Result<()>
	{
		Ok(())
	}

	/// One-time teardown, run at subsystem finalization.
	fn fini(&self) {}

	/// Validates a transport-scoped option value.
	///
	/// Returns `Error::NotSupported` for options this transport does not
	/// recognize.
	fn check_option(&self, _name: &str, _value: &OptValue) -> Result<()>
	{
		Err(Error::NotSupported)
	}

	/// Initiates an outgoing connection for the given socket.
	fn dial(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>;

	/// Binds a listener for the given socket.
	fn listen(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>;
}

struct Entry
{
	/// The precomputed URL prefix, e.g. `"tcp://"`.
	prefix: String,
	tran: Arc<dyn Transport>,
}

lazy_static! {
	static ref TRANSPORTS: Mutex<Vec<Entry>> = Mutex::new(Vec::new());
}

/// Guards against infinite recursion: `sys_init` raises this before
/// registering the built-ins, because registration itself triggers library
/// initialization when needed.
static INITED: AtomicBool = AtomicBool::new(false);

/// Registers a transport descriptor.
///
/// Fails with `Error::NotSupported` if the descriptor was built against a
/// different transport interface version and `Error::AlreadyExists` if a
/// transport with the same scheme is already registered. The descriptor's
/// `init` runs under the registry lock, so a partially initialized
/// transport is never visible to other callers; if it fails, the entry is
/// discarded and the error returned.
pub(crate) fn register(tran: Arc<dyn Transport>) -> Result<()>
{
	// It is entirely possible that we are called before any sockets are
	// opened. This has to be guarded to prevent infinite recursion, since
	// library init winds up calling us.
	if !INITED.load(Ordering::Acquire) {
		crate::init()?;
	}

	if tran.version() != TRANSPORT_VERSION {
		return Err(Error::NotSupported);
	}
	if tran.scheme().len() > MAX_SCHEME_LEN {
		return Err(Error::InvalidInput);
	}

	let mut list = TRANSPORTS.lock().unwrap();
	if list.iter().any(|e| e.tran.scheme() == tran.scheme()) {
		return Err(Error::AlreadyExists);
	}

	let prefix = format!("{}://", tran.scheme());
	tran.init()?;
	list.push(Entry { prefix, tran });
	Ok(())
}

/// Finds the transport responsible for the given address.
///
/// The address is of the form `"<scheme>://blah..."`. Lookup is a linear
/// scan in registration order; the first matching prefix wins.
pub(crate) fn find(addr: &str) -> Option<Arc<dyn Transport>>
{
	let list = TRANSPORTS.lock().unwrap();
	list.iter()
		.find(|e| addr.starts_with(&e.prefix))
		.map(|e| Arc::clone(&e.tran))
}

/// Polls every registered transport to validate an option.
///
/// Returns `Error::NotSupported` if no transport recognizes the option.
/// A transport rejecting the value wins over another accepting it.
pub(crate) fn check_option(name: &str, value: &OptValue) -> Result<()>
{
	let list = TRANSPORTS.lock().unwrap();
	let mut rv = Err(Error::NotSupported);
	for e in list.iter() {
		match e.tran.check_option(name, value) {
			Err(Error::NotSupported) => continue,
			Err(other) => return Err(other),
			Ok(()) => rv = Ok(()),
		}
	}
	rv
}

/// Initializes the transport subsystem, registering the built-ins.
pub(crate) fn sys_init() -> Result<()>
{
	if INITED.swap(true, Ordering::AcqRel) {
		return Ok(());
	}

	let mut builtins: Vec<Arc<dyn Transport>> = Vec::new();
	builtins.push(Arc::new(inproc::Inproc));
	#[cfg(unix)]
	builtins.push(Arc::new(ipc::Ipc));
	builtins.push(Arc::new(tcp::Tcp));

	for t in builtins {
		if let Err(e) = register(t) {
			sys_fini();
			return Err(e);
		}
	}
	Ok(())
}

/// Finalizes the transport subsystem, including all transports.
///
/// Safe to call without a prior successful `sys_init`.
pub(crate) fn sys_fini()
{
	let entries = {
		let mut list = TRANSPORTS.lock().unwrap();
		std::mem::replace(&mut *list, Vec::new())
	};
	for e in entries {
		e.tran.fini();
	}
	INITED.store(false, Ordering::Release);
}

/// Strips `"<scheme>://"` from a URL, yielding the transport-specific
/// remainder.
pub(crate) fn url_rest<'a>(url: &'a str, scheme: &str) -> Result<&'a str>
{
	let prefix = [scheme, "://"].concat();
	if url.starts_with(&prefix) {
		Ok(&url[prefix.len()..])
	}
	else {
		Err(Error::AddressInvalid)
	}
}

/// Splits a `host:port` remainder, handling bracketed IPv6 literals and
/// the `*` wildcard host.
pub(crate) fn split_host_port(rest: &str) -> Result<(String, String)>
{
	let idx = rest.rfind(':').ok_or(Error::AddressInvalid)?;
	let (host, port) = (&rest[..idx], &rest[idx + 1..]);
	if port.is_empty() {
		return Err(Error::AddressInvalid);
	}

	let host = host.trim_start_matches('[').trim_end_matches(']');
	let host = if host == "*" { "" } else { host };
	Ok((host.to_string(), port.to_string()))
}

/// Exchanges the SP connection header with the remote peer.
///
/// The header is eight bytes: `\0 S P \0`, the sixteen bit protocol number
/// of the local socket in big-endian order, and two reserved bytes. A peer
/// whose protocol is not the expected pattern counterpart is rejected here,
/// before the pattern layer ever sees the connection.
pub(crate) fn handshake<S>(stream: &mut S, proto: Protocol) -> Result<()>
where
	S: io::Read + io::Write,
{
	let mut ours = [0u8; 8];
	ours[1] = b'S';
	ours[2] = b'P';
	BigEndian::write_u16(&mut ours[4..6], proto.number());
	stream.write_all(&ours)?;
	stream.flush()?;

	let mut theirs = [0u8; 8];
	stream.read_exact(&mut theirs)?;
	if theirs[..4] != [0, b'S', b'P', 0] {
		return Err(Error::Protocol);
	}
	if Protocol::from_number(BigEndian::read_u16(&theirs[4..6])) != Some(proto.peer()) {
		return Err(Error::Protocol);
	}
	Ok(())
}

/// Attaches a stream connection to a socket as a pipe.
///
/// Frames on the wire are a 64-bit big-endian length followed by the
/// message header and body concatenated. Two detached threads service the
/// pipe: one drains the socket's outbound queue into the stream, one reads
/// frames and delivers them to the pattern layer. Either side failing
/// detaches the pipe and raises `done`, which is what a dialer watches to
/// know it should reconnect.
pub(crate) fn spawn_stream_pipe<R, W>(
	core: &Arc<Core>,
	reader: R,
	writer: W,
	closer: Box<dyn Fn() + Send>,
	done: Arc<Flag>,
) -> Result<()>
where
	R: io::Read + Send + 'static,
	W: io::Write + Send + 'static,
{
	let id = core.attach_pipe(closer)?;
	let max_frame = core.with_opts(|o| o.recv_max_size);

	let tx_core = Arc::clone(core);
	let tx_done = Arc::clone(&done);
	let mut writer = writer;
	let tx = thread::Builder::new()
		.name("nanolink-pipe-tx".to_string())
		.spawn(move || {
			while let Some(msg) = tx_core.next_frame(id) {
				let buf = msg.into_wire();
				let mut head = [0u8; 8];
				BigEndian::write_u64(&mut head, buf.len() as u64);
				let rv = writer
					.write_all(&head)
					.and_then(|_| writer.write_all(&buf))
					.and_then(|_| writer.flush());
				if rv.is_err() {
					break;
				}
			}
			tx_core.detach_pipe(id);
			tx_done.set();
		});
	if let Err(e) = tx {
		core.detach_pipe(id);
		return Err(Error::from(e));
	}

	let rx_core = Arc::clone(core);
	let rx_done = done;
	let mut reader = reader;
	let rx = thread::Builder::new()
		.name("nanolink-pipe-rx".to_string())
		.spawn(move || {
			loop {
				let mut head = [0u8; 8];
				if reader.read_exact(&mut head).is_err() {
					break;
				}
				let len = BigEndian::read_u64(&head);
				if max_frame > 0 && len > max_frame as u64 {
					// An oversize frame takes the connection down.
					break;
				}
				if len > usize::MAX as u64 {
					break;
				}
				let mut buf = vec![0u8; len as usize];
				if reader.read_exact(&mut buf).is_err() {
					break;
				}
				rx_core.deliver(id, Message::from_wire(buf));
			}
			rx_core.detach_pipe(id);
			rx_done.set();
		});
	if let Err(e) = rx {
		core.detach_pipe(id);
		return Err(Error::from(e));
	}

	Ok(())
}

/// Spawns the monitor thread that re-dials after an established pipe
/// drops.
///
/// `event` is raised by the pipe threads when the connection dies and by
/// endpoint teardown (together with `closed`). Reconnect attempts back off
/// from the socket's minimum reconnect time, doubling up to the maximum
/// when one is set.
pub(crate) fn spawn_dialer<F>(
	core: Arc<Core>,
	closed: Arc<AtomicBool>,
	event: Arc<Flag>,
	connect: F,
) -> Result<()>
where
	F: Fn(&Arc<Core>) -> Result<()> + Send + 'static,
{
	thread::Builder::new()
		.name("nanolink-dialer".to_string())
		.spawn(move || loop {
			event.wait_and_clear();
			if closed.load(Ordering::Acquire) {
				return;
			}

			let (min, max) = core.with_opts(|o| (o.reconnect_min, o.reconnect_max));
			let mut wait = min;
			loop {
				if closed.load(Ordering::Acquire) {
					return;
				}
				match connect(&core) {
					Ok(()) => break,
					Err(_) => {
						if event.wait_timeout(wait) {
							event.wait_and_clear();
							if closed.load(Ordering::Acquire) {
								return;
							}
						}
						if let Some(m) = max {
							wait = std::cmp::min(wait * 2, m);
						}
					}
				}
			}
		})?;
	Ok(())
}

#[cfg(test)]
mod tests
{
	use super::*;

	struct TestTran
	{
		scheme: &'static str,
		version: u32,
	}

	impl Transport for TestTran
	{
		fn scheme(&self) -> &'static str
		{
			self.scheme
		}

		fn version(&self) -> u32
		{
			self.version
		}

		fn check_option(&self, name: &str, value: &OptValue) -> Result<()>
		{
			match (name, value) {
				("test-claimed", OptValue::Bool(_)) => Ok(()),
				("test-claimed", _) => Err(Error::InvalidInput),
				_ => Err(Error::NotSupported),
			}
		}

		fn dial(&self, _url: &str, _socket: &Arc<Core>) -> Result<EndpointHandle>
		{
			Err(Error::NotSupported)
		}

		fn listen(&self, _url: &str, _socket: &Arc<Core>) -> Result<EndpointHandle>
		{
			Err(Error::NotSupported)
		}
	}

	fn tran(scheme: &'static str) -> Arc<dyn Transport>
	{
		Arc::new(TestTran { scheme, version: TRANSPORT_VERSION })
	}

	#[test]
	fn duplicate_scheme_is_rejected()
	{
		register(tran("t-dup")).unwrap();
		assert_eq!(register(tran("t-dup")), Err(Error::AlreadyExists));
	}

	#[test]
	fn version_mismatch_is_rejected()
	{
		let t = Arc::new(TestTran { scheme: "t-ver", version: TRANSPORT_VERSION + 1 });
		assert_eq!(register(t), Err(Error::NotSupported));
	}

	#[test]
	fn oversize_scheme_is_rejected()
	{
		let t = Arc::new(TestTran { scheme: "much-too-long-scheme", version: TRANSPORT_VERSION });
		assert_eq!(register(t), Err(Error::InvalidInput));
	}

	#[test]
	fn find_matches_by_prefix()
	{
		register(tran("t-find")).unwrap();
		assert!(find("t-find://anything").is_some());
		assert!(find("t-find:no-slashes").is_none());
		assert!(find("bogus://anything").is_none());

		// The built-ins come along with registration's implicit init.
		assert!(find("inproc://name").is_some());
		assert!(find("tcp://127.0.0.1:4321").is_some());
	}

	#[test]
	fn composite_schemes_do_not_collide()
	{
		register(tran("t2+tcp")).unwrap();
		let found = find("t2+tcp://host:80").unwrap();
		assert_eq!(found.scheme(), "t2+tcp");
	}

	#[test]
	fn option_checks_fan_out()
	{
		register(tran("t-opt")).unwrap();
		assert_eq!(check_option("test-claimed", &OptValue::Bool(true)), Ok(()));
		assert_eq!(
			check_option("test-claimed", &OptValue::Size(1)),
			Err(Error::InvalidInput)
		);
		assert_eq!(
			check_option("nobody-claims-this", &OptValue::Bool(true)),
			Err(Error::NotSupported)
		);
	}

	#[test]
	fn url_helpers()
	{
		assert_eq!(url_rest("tcp://127.0.0.1:80", "tcp").unwrap(), "127.0.0.1:80");
		assert!(url_rest("udp://127.0.0.1:80", "tcp").is_err());

		let (h, p) = split_host_port("127.0.0.1:80").unwrap();
		assert_eq!((h.as_str(), p.as_str()), ("127.0.0.1", "80"));

		let (h, p) = split_host_port("[::1]:5555").unwrap();
		assert_eq!((h.as_str(), p.as_str()), ("::1", "5555"));

		let (h, _) = split_host_port("*:5555").unwrap();
		assert_eq!(h, "");

		assert!(split_host_port("no-port").is_err());
		assert!(split_host_port("host:").is_err());
	}
}
