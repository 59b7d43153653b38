//! Library lifecycle: explicit init and fini, and recovery after fini.
//!
//! This lives in its own integration binary because fini tears down
//! process-global state that other tests rely on.
use nanolink::{Message, Protocol, Socket};

fn exchange(addr: &str)
{
	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	rep.listen(addr).unwrap();
	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.dial(addr).unwrap();

	req.send(Message::from(&b"marco"[..])).unwrap();
	let m = rep.recv().unwrap();
	assert_eq!(&m[..], b"marco");
	rep.send(Message::from(&b"polo"[..])).unwrap();
	assert_eq!(&req.recv().unwrap()[..], b"polo");
}

#[test]
fn init_is_idempotent_and_fini_is_recoverable()
{
	nanolink::init().unwrap();
	nanolink::init().unwrap();

	exchange("inproc://lifecycle-first");

	nanolink::fini();

	// A fresh init brings the library back in full.
	nanolink::init().unwrap();
	exchange("inproc://lifecycle-second");

	nanolink::fini();

	// fini without a matching init is tolerated.
	nanolink::fini();
}
