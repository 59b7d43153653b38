//! Tests of URL dispatch and the built-in transports.
use nanolink::{Error, Message, Protocol, Socket};

fn msg(data: &[u8]) -> Message
{
	Message::from(data)
}

/// Drives one ping/pong round trip across an established pair.
fn exchange(req: &mut Socket, rep: &mut Socket)
{
	req.send(msg(b"ping\0")).unwrap();

	let mut m = rep.recv().unwrap();
	assert_eq!(&m[..], b"ping\0");
	m.trim(5).unwrap();
	m.append(b"pong\0");
	rep.send(m).unwrap();

	let reply = req.recv().unwrap();
	assert_eq!(&reply[..], b"pong\0");
}

#[test]
fn unknown_scheme_is_invalid()
{
	let mut s = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(s.dial("badscheme://whatever").unwrap_err(), Error::AddressInvalid);
	assert_eq!(s.listen("badscheme://whatever").unwrap_err(), Error::AddressInvalid);

	// Missing the "://" separator entirely.
	assert_eq!(s.dial("tcp:127.0.0.1:80").unwrap_err(), Error::AddressInvalid);
}

#[test]
fn inproc_names_are_exclusive()
{
	let addr = "inproc://transport-exclusive";

	let mut first = Socket::new(Protocol::Rep0).unwrap();
	first.listen(addr).unwrap();

	let mut second = Socket::new(Protocol::Rep0).unwrap();
	assert_eq!(second.listen(addr).unwrap_err(), Error::AlreadyExists);

	// Closing the holder releases the name.
	first.close();
	second.listen(addr).unwrap();
}

#[test]
fn dialing_an_unbound_inproc_name_is_refused()
{
	let mut req = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(
		req.dial("inproc://transport-nobody-home").unwrap_err(),
		Error::ConnectionRefused
	);
}

#[test]
fn mismatched_patterns_are_refused()
{
	let addr = "inproc://transport-mismatch";

	let mut listener = Socket::new(Protocol::Req0).unwrap();
	listener.listen(addr).unwrap();

	// A REQ must pair with a REP; another REQ is turned away before the
	// pattern layer ever sees a pipe.
	let mut dialer = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(dialer.dial(addr).unwrap_err(), Error::ConnectionRefused);
}

#[test]
fn tcp_pair_exchanges()
{
	let mut rep = Socket::new(Protocol::Rep0).unwrap();

	// Ports are shared machine-wide; probe for a free one.
	let mut url = None;
	for port in 46800..46900 {
		let candidate = format!("tcp://127.0.0.1:{}", port);
		match rep.listen(&candidate) {
			Ok(()) => {
				url = Some(candidate);
				break;
			}
			Err(Error::AddressInUse) => continue,
			Err(e) => panic!("listen failed: {}", e),
		}
	}
	let url = url.expect("no free port in the probe range");

	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.dial(&url).unwrap();

	exchange(&mut req, &mut rep);
}

#[cfg(unix)]
#[test]
fn ipc_pair_exchanges()
{
	let path = std::env::temp_dir().join(format!("nanolink-test-{}.sock", std::process::id()));
	let _ = std::fs::remove_file(&path);
	let url = format!("ipc://{}", path.display());

	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	rep.listen(&url).unwrap();

	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.dial(&url).unwrap();

	exchange(&mut req, &mut rep);

	drop(req);
	drop(rep);
	let _ = std::fs::remove_file(&path);
}

#[cfg(unix)]
#[test]
fn dialing_a_missing_ipc_path_is_refused()
{
	let mut req = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(
		req.dial("ipc:///tmp/nanolink-test-no-such-socket").unwrap_err(),
		Error::ConnectionRefused
	);
}
