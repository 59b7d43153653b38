//! Socket address types.
use std::fmt;
use std::net::{self, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

/// Represents the addresses used by the underlying transports.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SocketAddr
{
	/// An address associated with intra-process communication.
	InProc(String),

	/// Represents an address associated with IPC communication.
	Ipc(PathBuf),

	/// Address for TCP/IP (v4) communication.
	Inet(SocketAddrV4),

	/// Address for TCP/IP (v6) communication.
	Inet6(SocketAddrV6),
}

impl SocketAddr
{
	/// Returns the address family this address belongs to.
	pub fn family(&self) -> Family
	{
		match self {
			SocketAddr::Inet(_) => Family::Inet,
			SocketAddr::Inet6(_) => Family::Inet6,
			SocketAddr::InProc(_) | SocketAddr::Ipc(_) => Family::Unspec,
		}
	}

	/// Converts the address into a standard library socket address, if it
	/// has one.
	pub(crate) fn to_std(&self) -> Option<net::SocketAddr>
	{
		match self {
			SocketAddr::Inet(a) => Some(net::SocketAddr::V4(*a)),
			SocketAddr::Inet6(a) => Some(net::SocketAddr::V6(*a)),
			_ => None,
		}
	}
}

impl fmt::Display for SocketAddr
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		match self {
			SocketAddr::InProc(n) => write!(f, "inproc://{}", n),
			SocketAddr::Ipc(p) => write!(f, "ipc://{}", p.display()),
			SocketAddr::Inet(a) => write!(f, "tcp://{}", a),
			SocketAddr::Inet6(a) => write!(f, "tcp://{}", a),
		}
	}
}

impl From<net::SocketAddr> for SocketAddr
{
	fn from(addr: net::SocketAddr) -> SocketAddr
	{
		match addr {
			net::SocketAddr::V4(a) => SocketAddr::Inet(a),
			net::SocketAddr::V6(a) => SocketAddr::Inet6(a),
		}
	}
}

/// An address family, as understood by the name resolver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Family
{
	/// IPv4 addresses only.
	Inet,

	/// IPv6 addresses only.
	Inet6,

	/// Either IPv4 or IPv6 addresses.
	Unspec,
}
