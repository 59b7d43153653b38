//! The inter-process transport, over Unix domain stream sockets.
//!
//! Addresses look like `ipc:///tmp/some/path`; everything after the
//! scheme prefix is a filesystem path. The connection header and frame
//! format are identical to the TCP transport's.
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::options::OptValue;
use crate::platform::Flag;
use crate::socket::{Core, EndpointHandle};
use crate::transport::{
	handshake, spawn_dialer, spawn_stream_pipe, url_rest, Transport, TRANSPORT_VERSION,
};

pub(crate) struct Ipc;

impl Transport for Ipc
{
	fn scheme(&self) -> &'static str
	{
		"ipc"
	}

	fn version(&self) -> u32
	{
		TRANSPORT_VERSION
	}

	fn check_option(&self, _name: &str, _value: &OptValue) -> Result<()>
	{
		Err(Error::NotSupported)
	}

	fn dial(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>
	{
		let path = PathBuf::from(url_rest(url, self.scheme())?);

		let event = Arc::new(Flag::new());
		let closed = Arc::new(AtomicBool::new(false));

		let connect = {
			let event = Arc::clone(&event);
			move |core: &Arc<Core>| connect_once(&path, core, Arc::clone(&event))
		};

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
		let path = PathBuf::from(url_rest(url, self.scheme())?);

		let listener = UnixListener::bind(&path)?;

		let closed = Arc::new(AtomicBool::new(false));
		{
			let core = Arc::clone(socket);
			let closed = Arc::clone(&closed);
			thread::Builder::new()
				.name("nanolink-ipc-accept".to_string())
				.spawn(move || accept_loop(listener, &core, &closed))?;
		}

		let stop = Box::new(move || {
			closed.store(true, Ordering::Release);
			// Nudge the accept loop, then take the socket file with us.
			let _ = UnixStream::connect(&path);
			let _ = std::fs::remove_file(&path);
		});
		Ok(EndpointHandle { stop })
	}
}

fn connect_once(path: &PathBuf, core: &Arc<Core>, event: Arc<Flag>) -> Result<()>
{
	let mut stream = UnixStream::connect(path).map_err(|e| {
		// A missing socket file is the moral equivalent of nobody
		// listening on a TCP port.
		if e.kind() == std::io::ErrorKind::NotFound {
			Error::ConnectionRefused
		}
		else {
			Error::from(e)
		}
	})?;

	handshake(&mut stream, core.proto)?;
	attach(core, stream, event)
}

fn attach(core: &Arc<Core>, stream: UnixStream, event: Arc<Flag>) -> Result<()>
{
	let reader = stream.try_clone()?;
	let closer_stream = stream.try_clone()?;
	let closer = Box::new(move || {
		let _ = closer_stream.shutdown(Shutdown::Both);
	});

	spawn_stream_pipe(core, reader, stream, closer, event)
}

fn accept_loop(listener: UnixListener, core: &Arc<Core>, closed: &AtomicBool)
{
	for conn in listener.incoming() {
		if closed.load(Ordering::Acquire) {
			break;
		}

		match conn {
			Ok(stream) => {
				if let Err(e) = accept_one(core, stream) {
					debug!("ipc: dropping incoming connection: {}", e);
				}
			}
			Err(e) => {
				debug!("ipc: accept failed: {}", e);
			}
		}
	}
}

fn accept_one(core: &Arc<Core>, mut stream: UnixStream) -> Result<()>
{
	stream.set_read_timeout(Some(Duration::from_secs(5)))?;
	handshake(&mut stream, core.proto)?;
	stream.set_read_timeout(None)?;

	attach(core, stream, Arc::new(Flag::new()))
}
