//! The intra-process transport.
//!
//! Addresses look like `inproc://name`, where the name is an arbitrary
//! tag. A listener claims the name in a process-global table; a dialer
//! looks the name up and, when the patterns are compatible, attaches a
//! pipe endpoint to each socket. Each endpoint runs a single drainer
//! thread that moves frames from its own socket's outbound queue straight
//! into the peer socket's pattern layer, so messages never leave the
//! process or touch a wire format beyond the header flattening every
//! transport performs.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::options::OptValue;
use crate::socket::{Core, EndpointHandle};
use crate::transport::{url_rest, Transport, TRANSPORT_VERSION};

lazy_static! {
	static ref LISTENERS: Mutex<HashMap<String, Weak<Core>>> = Mutex::new(HashMap::new());
}

pub(crate) struct Inproc;

impl Transport for Inproc
{
	fn scheme(&self) -> &'static str
	{
		"inproc"
	}

	fn version(&self) -> u32
	{
		TRANSPORT_VERSION
	}

	fn fini(&self)
	{
		LISTENERS.lock().unwrap().clear();
	}

	fn check_option(&self, _name: &str, _value: &OptValue) -> Result<()>
	{
		Err(Error::NotSupported)
	}

	fn dial(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>
	{
		let name = url_rest(url, self.scheme())?;

		let peer = {
			let map = LISTENERS.lock().unwrap();
			map.get(name)
				.and_then(Weak::upgrade)
				.ok_or(Error::ConnectionRefused)?
		};

		// Peer validation takes the place of the stream transports'
		// connection handshake.
		if socket.proto.peer() != peer.proto {
			return Err(Error::ConnectionRefused);
		}

		link(socket, &peer)?;

		Ok(EndpointHandle { stop: Box::new(|| {}) })
	}

	fn listen(&self, url: &str, socket: &Arc<Core>) -> Result<EndpointHandle>
	{
		let name = url_rest(url, self.scheme())?.to_string();

		let ours = Arc::downgrade(socket);
		{
			let mut map = LISTENERS.lock().unwrap();
			if let Some(existing) = map.get(&name) {
				if existing.upgrade().is_some() {
					return Err(Error::AlreadyExists);
				}
			}
			map.insert(name.clone(), Weak::clone(&ours));
		}

		let stop = Box::new(move || {
			let mut map = LISTENERS.lock().unwrap();
			// Remove the name only if it is still ours; a later listener
			// may have legitimately claimed it after we closed.
			if let Some(entry) = map.get(&name) {
				if entry.ptr_eq(&ours) {
					map.remove(&name);
				}
			}
		});

		Ok(EndpointHandle { stop })
	}
}

/// Creates the two pipe endpoints joining `a` to `b` and spawns their
/// drainer threads.
fn link(a: &Arc<Core>, b: &Arc<Core>) -> Result<()>
{
	let id_a = a.attach_pipe(Box::new(|| {}))?;
	let id_b = match b.attach_pipe(Box::new(|| {})) {
		Ok(id) => id,
		Err(e) => {
			a.detach_pipe(id_a);
			return Err(e);
		}
	};

	spawn_drainer(a, id_a, b, id_b)?;
	spawn_drainer(b, id_b, a, id_a)?;
	Ok(())
}

/// Moves frames from `from`'s outbound queue into `to`'s pattern layer.
///
/// The peer is held weakly: if it disappears the pipe dies, exactly as a
/// remote hangup would. Exit detaches the pipe on both ends so the
/// opposite drainer wakes up and follows suit.
fn spawn_drainer(from: &Arc<Core>, from_id: u32, to: &Arc<Core>, to_id: u32) -> Result<()>
{
	let from_thread = Arc::clone(from);
	let to = Arc::downgrade(to);

	let spawned = thread::Builder::new()
		.name("nanolink-inproc".to_string())
		.spawn(move || {
			while let Some(msg) = from_thread.next_frame(from_id) {
				match to.upgrade() {
					Some(peer) => {
						let wire = msg.into_wire();
						peer.deliver(to_id, crate::message::Message::from_wire(wire));
					}
					None => break,
				}
			}
			from_thread.detach_pipe(from_id);
			if let Some(peer) = to.upgrade() {
				peer.detach_pipe(to_id);
			}
		});

	match spawned {
		Ok(_) => Ok(()),
		Err(e) => {
			from.detach_pipe(from_id);
			Err(Error::from(e))
		}
	}
}
