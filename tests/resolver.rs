//! Tests of the asynchronous name resolver, through the public API.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nanolink::{resolver, Aio, Error, Family, SocketAddr};

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
fn localhost_resolves_to_ip_addresses()
{
	let (aio, count) = counted();
	resolver::resolve_tcp("localhost", "80", Family::Unspec, false, &aio);
	aio.wait();

	assert_eq!(count.load(Ordering::SeqCst), 1);
	let n = aio.result().unwrap();
	let addrs = aio.addresses();
	assert_eq!(n, addrs.len());
	assert!(n > 0);

	for addr in &addrs {
		match addr {
			SocketAddr::Inet(a) => assert_eq!(a.port(), 80),
			SocketAddr::Inet6(a) => assert_eq!(a.port(), 80),
			other => panic!("resolver produced a non-IP address: {:?}", other),
		}
	}
}

#[test]
fn bad_service_fails_with_address_invalid()
{
	let (aio, count) = counted();
	resolver::resolve_tcp("localhost", "http-but-not-a-port", Family::Unspec, false, &aio);
	aio.wait();

	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(aio.result(), Err(Error::AddressInvalid));
}

#[test]
fn cancellation_yields_exactly_one_completion()
{
	let (aio, count) = counted();
	resolver::resolve_tcp("localhost", "80", Family::Unspec, false, &aio);
	aio.cancel();
	aio.wait();

	assert_eq!(count.load(Ordering::SeqCst), 1);
	// The cancel may race an already-running worker; either way there is
	// exactly one completion, and a loss reads as cancellation.
	if let Err(e) = aio.result() {
		assert_eq!(e, Error::Canceled);
	}

	std::thread::sleep(Duration::from_millis(100));
	assert_eq!(count.load(Ordering::SeqCst), 1);
}
