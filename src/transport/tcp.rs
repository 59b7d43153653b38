//! The TCP transport.
//!
//! Addresses look like `tcp://host:port`, with `*` (or an empty host) as
//! the wildcard for listeners and bracketed literals for IPv6. Host names
//! are resolved through the asynchronous resolver; dialing tries the
//! resolved candidates in order. Established connections carry the SP
//! connection header followed by length-prefixed frames.
use std::net::{Shutdown, SocketAddr as StdSocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use socket2::{Domain, SockRef, Socket as RawSocket, Type};

use crate::addr::Family;
use crate::aio::Aio;
use crate::error::{Error, Result};
use crate::options::transport::tcp::{KEEP_ALIVE_NAME, NO_DELAY_NAME};
use crate::options::OptValue;
use crate::platform::Flag;
use crate::resolver;
use crate::socket::{Core, EndpointHandle};
use crate::transport::{
	handshake, spawn_dialer, spawn_stream_pipe, split_host_port, url_rest, Transport,
	TRANSPORT_VERSION,
};

pub(crate) struct Tcp;

impl Transport for Tcp
{
	fn scheme(&self) -> &'static str
	{
		"tcp"
	}

	fn version(&self) -> u32
	{
		TRANSPORT_VERSION
	}

	fn check_option(&self, name: &str, value: &OptValue) -> Result<()>
	{
		match (name, value) {
			(NO_DELAY_NAME, OptValue::Bool(_)) => Ok(()),
			(KEEP_ALIVE_NAME, OptValue::Bool(_)) => Ok(()),
			(NO_DELAY_NAME, _) | (KEEP_ALIVE_NAME, _) => Err(Error::InvalidInput),
			_ => Err(Error::NotSupported),
		}
	}

	fn dial(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>
	{
		let rest = url_rest(url, self.scheme())?;
		let (host, port) = split_host_port(rest)?;

		let event = Arc::new(Flag::new());
		let closed = Arc::new(AtomicBool::new(false));

		let connect = {
			let event = Arc::clone(&event);
			move |core: &Arc<Core>| connect_once(&host, &port, core, Arc::clone(&event))
		};

		// The first attempt is synchronous so the caller learns about a
		// refused connection immediately; afterwards the monitor keeps
		// the connection alive in the background.
		connect(socket)?;
		spawn_dialer(Arc::clone(socket), Arc::clone(&closed), Arc::clone(&event), connect)?;

		let stop = Box::new(move || {
			closed.store(true, Ordering::Release);
			event.set();
		});
		Ok(EndpointHandle { stop })
	}

	fn listen(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>
	{
		let rest = url_rest(url, self.scheme())?;
		let (host, port) = split_host_port(rest)?;

		let sa = resolve_sync(&host, &port, true)?
			.into_iter()
			.next()
			.ok_or(Error::AddressInvalid)?;

		let raw = RawSocket::new(Domain::for_address(sa), Type::STREAM, Some(socket2::Protocol::TCP))?;
		raw.set_reuse_address(true)?;
		raw.bind(&sa.into())?;
		raw.listen(128)?;
		let listener: TcpListener = raw.into();
		let local = listener.local_addr()?;

		let closed = Arc::new(AtomicBool::new(false));
		{
			let core = Arc::clone(socket);
			let closed = Arc::clone(&closed);
			thread::Builder::new()
				.name("nanolink-tcp-accept".to_string())
				.spawn(move || accept_loop(listener, &core, &closed))?;
		}

		let stop = Box::new(move || {
			closed.store(true, Ordering::Release);
			// Nudge the accept loop out of its blocking accept.
			let _ = TcpStream::connect_timeout(&local, Duration::from_millis(100));
		});
		Ok(EndpointHandle { stop })
	}
}

/// Resolves host and service on the caller's behalf, blocking on the
/// resolver's own AIO.
fn resolve_sync(host: &str, port: &str, passive: bool) -> Result<Vec<StdSocketAddr>>
{
	let aio = Aio::new(|_, _| {});
	resolver::resolve_tcp(host, port, Family::Unspec, passive, &aio);
	aio.wait();
	aio.result()?;

	Ok(aio.addresses().iter().filter_map(|a| a.to_std()).collect())
}

fn connect_once(host: &str, port: &str, core: &Arc<Core>, event: Arc<Flag>) -> Result<()>
{
	let mut last = Error::AddressInvalid;
	for sa in resolve_sync(host, port, false)? {
		match TcpStream::connect(sa) {
			Ok(mut stream) => {
				configure(&stream, core)?;
				handshake(&mut stream, core.proto)?;
				return attach(core, stream, event);
			}
			Err(e) => last = Error::from(e),
		}
	}
	Err(last)
}

fn configure(stream: &TcpStream, core: &Arc<Core>) -> Result<()>
{
	let (no_delay, keep_alive) = core.with_opts(|o| (o.tcp_no_delay, o.tcp_keep_alive));
	stream.set_nodelay(no_delay)?;
	SockRef::from(stream).set_keepalive(keep_alive)?;
	Ok(())
}

fn attach(core: &Arc<Core>, stream: TcpStream, event: Arc<Flag>) -> Result<()>
{
	let reader = stream.try_clone()?;
	let closer_stream = stream.try_clone()?;
	let closer = Box::new(move || {
		let _ = closer_stream.shutdown(Shutdown::Both);
	});

	spawn_stream_pipe(core, reader, stream, closer, event)
}

fn accept_loop(listener: TcpListener, core: &Arc<Core>, closed: &AtomicBool)
{
	for conn in listener.incoming() {
		if closed.load(Ordering::Acquire) {
			break;
		}

		match conn {
			Ok(stream) => {
				if let Err(e) = accept_one(core, stream) {
					debug!("tcp: dropping incoming connection: {}", e);
				}
			}
			Err(e) => {
				debug!("tcp: accept failed: {}", e);
			}
		}
	}
}

fn accept_one(core: &Arc<Core>, mut stream: TcpStream) -> Result<()>
{
	configure(&stream, core)?;

	// Bound the handshake so a stalled client cannot wedge the accept
	// loop.
	stream.set_read_timeout(Some(Duration::from_secs(5)))?;
	handshake(&mut stream, core.proto)?;
	stream.set_read_timeout(None)?;

	attach(core, stream, Arc::new(Flag::new()))
}
