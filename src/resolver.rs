//! Asynchronous name resolution.
//!
//! Resolution is serviced by a small dedicated worker pool rather than a
//! true asynchronous DNS stack; the pool is portable and concurrent enough
//! for the common case of resolving at connection setup. The pending
//! operation is shared between the worker and the AIO's cancel hook as a
//! take-once slot, so exactly one of them ever finishes the operation no
//! matter how the two race.
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use crate::addr::{Family, SocketAddr};
use crate::aio::{Aio, CancelFn, OpKind};
use crate::error::{Error, Result};
use crate::init;

struct Item
{
	host: String,
	service: String,
	family: Family,
	passive: bool,
	aio: Aio,
	task: Option<u64>,
}

/// Asynchronously resolves a host and service to TCP socket addresses.
///
/// The result is delivered through the AIO: on success its address list
/// holds the resolved addresses (IPv4 and IPv6 only, in whatever order the
/// system resolver produced them, duplicates preserved) and the completion
/// count is their number. An empty result set fails with
/// `Error::AddressInvalid`, as does a service that is not a port number.
///
/// Passive resolution produces bind-suitable addresses; an empty or `*`
/// host then maps to the wildcard address of the requested family.
///
/// Any address list left on the AIO by a previous resolve is released
/// first. Cancelling the AIO removes the operation from the worker pool
/// when it has not started yet; a worker already running discards its
/// result.
pub fn resolve_tcp(host: &str, service: &str, family: Family, passive: bool, aio: &Aio)
{
	if let Err(e) = init::init() {
		log::error!("implicit library initialization failed: {}", e);
	}

	aio.clear_addresses();

	let item = Arc::new(Mutex::new(Some(Item {
		host: host.to_string(),
		service: service.to_string(),
		family,
		passive,
		aio: aio.clone(),
		task: None,
	})));

	// Whoever takes the item out of the slot owns the completion.
	let hook: CancelFn = {
		let item = Arc::clone(&item);
		Box::new(move |aio, err| {
			let taken = item.lock().unwrap().take();
			if let Some(it) = taken {
				if let (Some(id), Some(rt)) = (it.task, init::runtime()) {
					rt.resolver.cancel(id);
				}
				aio.finish(Err(err), 0);
			}
		})
	};

	if aio.start(OpKind::Resolve, hook).is_err() {
		// Stopped before it began; the AIO is terminally idle.
		return;
	}

	let rt = match init::runtime() {
		Some(rt) => rt,
		None => {
			aio.finish(Err(Error::Closed), 0);
			return;
		}
	};

	let task = {
		let item = Arc::clone(&item);
		Box::new(move || {
			let work = {
				let slot = item.lock().unwrap();
				slot.as_ref()
					.map(|it| (it.host.clone(), it.service.clone(), it.family, it.passive))
			};
			let (host, service, family, passive) = match work {
				Some(w) => w,
				None => return,
			};

			let outcome = resolve_blocking(&host, &service, family, passive);

			let taken = item.lock().unwrap().take();
			if let Some(it) = taken {
				match outcome {
					Ok(addrs) => {
						let count = addrs.len();
						it.aio.set_addresses(addrs);
						it.aio.finish(Ok(()), count);
					}
					Err(e) => it.aio.finish(Err(e), 0),
				}
			}
		})
	};

	let id = rt.resolver.dispatch(task);
	let mut guard = item.lock().unwrap();
	if let Some(it) = guard.as_mut() {
		it.task = Some(id);
	}
}

/// The blocking part, run on a resolver worker.
fn resolve_blocking(
	host: &str,
	service: &str,
	family: Family,
	passive: bool,
) -> Result<Vec<SocketAddr>>
{
	let port: u16 = service.parse().map_err(|_| Error::AddressInvalid)?;

	let host = if host == "*" { "" } else { host };

	let mut out = Vec::new();
	if passive && host.is_empty() {
		match family {
			Family::Inet => {
				out.push(SocketAddr::Inet(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));
			}
			Family::Inet6 => {
				out.push(SocketAddr::Inet6(SocketAddrV6::new(
					Ipv6Addr::UNSPECIFIED,
					port,
					0,
					0,
				)));
			}
			Family::Unspec => {
				out.push(SocketAddr::Inet(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));
				out.push(SocketAddr::Inet6(SocketAddrV6::new(
					Ipv6Addr::UNSPECIFIED,
					port,
					0,
					0,
				)));
			}
		}
	}
	else if host.is_empty() {
		return Err(Error::AddressInvalid);
	}
	else {
		let found = (host, port)
			.to_socket_addrs()
			.map_err(|_| Error::AddressInvalid)?;
		for sa in found {
			match sa {
				std::net::SocketAddr::V4(a) if family != Family::Inet6 => {
					out.push(SocketAddr::Inet(a));
				}
				std::net::SocketAddr::V6(a) if family != Family::Inet => {
					out.push(SocketAddr::Inet6(a));
				}
				_ => {}
			}
		}
	}

	if out.is_empty() {
		return Err(Error::AddressInvalid);
	}
	Ok(out)
}

#[cfg(test)]
mod tests
{
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

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
	fn numeric_host_resolves_to_itself()
	{
		let (aio, count) = counted();
		resolve_tcp("127.0.0.1", "5555", Family::Unspec, false, &aio);
		aio.wait();

		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Ok(1));
		assert_eq!(
			aio.addresses(),
			vec![SocketAddr::Inet(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5555))]
		);
	}

	#[test]
	fn family_filter_applies()
	{
		let (aio, _count) = counted();
		resolve_tcp("127.0.0.1", "80", Family::Inet6, false, &aio);
		aio.wait();
		assert_eq!(aio.result(), Err(Error::AddressInvalid));
		assert!(aio.addresses().is_empty());
	}

	#[test]
	fn non_numeric_service_is_invalid()
	{
		let (aio, count) = counted();
		resolve_tcp("localhost", "not-a-port", Family::Unspec, false, &aio);
		aio.wait();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Err(Error::AddressInvalid));
	}

	#[test]
	fn passive_wildcard_binds_any()
	{
		let (aio, _count) = counted();
		resolve_tcp("", "7777", Family::Inet, true, &aio);
		aio.wait();
		assert_eq!(aio.result(), Ok(1));
		assert_eq!(
			aio.addresses(),
			vec![SocketAddr::Inet(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 7777))]
		);
	}

	#[test]
	fn cancel_before_dispatch_completes_once_with_canceled()
	{
		crate::init().unwrap();
		let rt = init::runtime().unwrap();

		// Tie up every resolver worker so our operation stays queued.
		for _ in 0..4 {
			rt.resolver.dispatch(Box::new(|| {
				std::thread::sleep(Duration::from_millis(200));
			}));
		}

		let (aio, count) = counted();
		resolve_tcp("localhost", "80", Family::Unspec, false, &aio);
		aio.cancel();
		aio.wait();

		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(aio.result(), Err(Error::Canceled));

		// Nothing further may arrive once the workers free up.
		std::thread::sleep(Duration::from_millis(300));
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn repeated_resolves_reuse_the_aio()
	{
		let (aio, count) = counted();
		resolve_tcp("127.0.0.1", "1", Family::Unspec, false, &aio);
		aio.wait();
		resolve_tcp("127.0.0.1", "2", Family::Unspec, false, &aio);
		aio.wait();

		assert_eq!(count.load(Ordering::SeqCst), 2);
		assert_eq!(aio.addresses().len(), 1);
	}
}
