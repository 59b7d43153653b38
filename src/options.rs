//! Socket options.
//!
//! Options are represented as types rather than as constants, which lets
//! each option name the type of its value and keeps `Socket::get_opt` and
//! `Socket::set_opt` entirely type-checked. Options scoped to a transport
//! are additionally validated through the transport registry before being
//! accepted, so an option no registered transport claims is refused with
//! `Error::NotSupported`.
use std::time::Duration;

use crate::error::{Error, Result};
use crate::socket::Socket;
use crate::transport as registry;

/// A raw option value, used when fanning a validation out to the
/// transports.
#[derive(Clone, Debug)]
pub(crate) enum OptValue
{
	Bool(bool),
	Size(usize),
}

#[allow(unreachable_pub)]
mod sealed
{
	pub trait Sealed {}
}

/// Marks a type as a socket option.
///
/// This trait is sealed; the set of options is fixed by the library.
pub trait Opt: sealed::Sealed
{
	/// The type of the option's value.
	type OptType;

	#[doc(hidden)]
	fn get(socket: &Socket) -> Result<Self::OptType>;

	#[doc(hidden)]
	fn set(socket: &Socket, value: Self::OptType) -> Result<()>;
}

/// The amount of time a request waits for its reply before being resent.
///
/// Applies to _req_ sockets. `None` disables retransmission entirely. The
/// default is sixty seconds.
#[derive(Debug)]
pub struct ResendTime;

impl sealed::Sealed for ResendTime {}
impl Opt for ResendTime
{
	type OptType = Option<Duration>;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.resend_time))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.resend_time = value;
			Ok(())
		})
	}
}

/// The capacity, in messages, of the socket's outbound queue.
///
/// When the queue is full, a send either fails with `Error::TryAgain`
/// (non-blocking mode) or waits for a slot to free up. Must be at least
/// one; the default is one.
#[derive(Debug)]
pub struct SendBufferSize;

impl sealed::Sealed for SendBufferSize {}
impl Opt for SendBufferSize
{
	type OptType = usize;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.send_buf))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		if value == 0 {
			return Err(Error::InvalidInput);
		}
		socket.core().set_opts(|o| {
			o.send_buf = value;
			Ok(())
		})
	}
}

/// The capacity, in messages, of the socket's inbound queue.
///
/// Messages arriving while the queue is full are dropped, which for a
/// request/reply pair simply looks like transport loss: the requester
/// retransmits. Must be at least one; the default is 128.
#[derive(Debug)]
pub struct RecvBufferSize;

impl sealed::Sealed for RecvBufferSize {}
impl Opt for RecvBufferSize
{
	type OptType = usize;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.recv_buf))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		if value == 0 {
			return Err(Error::InvalidInput);
		}
		socket.core().set_opts(|o| {
			o.recv_buf = value;
			Ok(())
		})
	}
}

/// The maximum time a blocking send may wait before failing with
/// `Error::TimedOut`. `None`, the default, waits forever.
#[derive(Debug)]
pub struct SendTimeout;

impl sealed::Sealed for SendTimeout {}
impl Opt for SendTimeout
{
	type OptType = Option<Duration>;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.send_timeout))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.send_timeout = value;
			Ok(())
		})
	}
}

/// The maximum time a blocking receive may wait before failing with
/// `Error::TimedOut`. `None`, the default, waits forever.
#[derive(Debug)]
pub struct RecvTimeout;

impl sealed::Sealed for RecvTimeout {}
impl Opt for RecvTimeout
{
	type OptType = Option<Duration>;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.recv_timeout))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.recv_timeout = value;
			Ok(())
		})
	}
}

/// The largest message, in bytes, a stream transport will accept on the
/// wire. A peer sending a larger frame has its connection dropped. Zero,
/// the default, disables the check.
#[derive(Debug)]
pub struct RecvMaxSize;

impl sealed::Sealed for RecvMaxSize {}
impl Opt for RecvMaxSize
{
	type OptType = usize;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.recv_max_size))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.recv_max_size = value;
			Ok(())
		})
	}
}

/// The time a dialer waits before its first reconnection attempt after a
/// connection drops. The default is 100 milliseconds.
#[derive(Debug)]
pub struct ReconnectMinTime;

impl sealed::Sealed for ReconnectMinTime {}
impl Opt for ReconnectMinTime
{
	type OptType = Duration;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.reconnect_min))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.reconnect_min = value;
			Ok(())
		})
	}
}

/// The ceiling for the dialer's reconnection backoff. `None`, the
/// default, disables the exponential growth and retries at the minimum
/// interval.
#[derive(Debug)]
pub struct ReconnectMaxTime;

impl sealed::Sealed for ReconnectMaxTime {}
impl Opt for ReconnectMaxTime
{
	type OptType = Option<Duration>;

	fn get(socket: &Socket) -> Result<Self::OptType>
	{
		Ok(socket.core().with_opts(|o| o.reconnect_max))
	}

	fn set(socket: &Socket, value: Self::OptType) -> Result<()>
	{
		socket.core().set_opts(|o| {
			o.reconnect_max = value;
			Ok(())
		})
	}
}

/// Transport-scoped options.
pub mod transport
{
	/// Options for the TCP transport.
	pub mod tcp
	{
		use super::super::*;

		pub(crate) const NO_DELAY_NAME: &str = "tcp-nodelay";
		pub(crate) const KEEP_ALIVE_NAME: &str = "tcp-keepalive";

		/// Disables Nagle's algorithm on TCP connections.
		///
		/// Enabled by default, trading bandwidth for latency as is
		/// appropriate for a messaging workload.
		#[derive(Debug)]
		pub struct NoDelay;

		impl sealed::Sealed for NoDelay {}
		impl Opt for NoDelay
		{
			type OptType = bool;

			fn get(socket: &Socket) -> Result<Self::OptType>
			{
				Ok(socket.core().with_opts(|o| o.tcp_no_delay))
			}

			fn set(socket: &Socket, value: Self::OptType) -> Result<()>
			{
				registry::check_option(NO_DELAY_NAME, &OptValue::Bool(value))?;
				socket.core().set_opts(|o| {
					o.tcp_no_delay = value;
					Ok(())
				})
			}
		}

		/// Enables TCP keep-alive on connections.
		///
		/// Disabled by default.
		#[derive(Debug)]
		pub struct KeepAlive;

		impl sealed::Sealed for KeepAlive {}
		impl Opt for KeepAlive
		{
			type OptType = bool;

			fn get(socket: &Socket) -> Result<Self::OptType>
			{
				Ok(socket.core().with_opts(|o| o.tcp_keep_alive))
			}

			fn set(socket: &Socket, value: Self::OptType) -> Result<()>
			{
				registry::check_option(KEEP_ALIVE_NAME, &OptValue::Bool(value))?;
				socket.core().set_opts(|o| {
					o.tcp_keep_alive = value;
					Ok(())
				})
			}
		}
	}
}
