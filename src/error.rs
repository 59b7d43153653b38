//! Error management.
use std::{error, fmt, io};

use crate::message::Message;

/// Specialized `Result` type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Specialized `Result` type for send operations.
///
/// A failed send returns the message to the caller so that it is not lost,
/// which means the error type needs to carry the message along with the
/// error code.
pub type SendResult<T> = std::result::Result<T, (Message, Error)>;

/// Errors potentially returned by operations in this crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error
{
	/// Insufficient memory available to perform the operation.
	OutOfMemory,

	/// The operation, option, or address family is not supported.
	NotSupported,

	/// An entry with the same identity already exists.
	AlreadyExists,

	/// The address was invalid or could not be parsed.
	AddressInvalid,

	/// The address is already in use.
	AddressInUse,

	/// An invalid argument was specified.
	InvalidInput,

	/// The operation is not legal in the object's current state.
	IncorrectState,

	/// The remote peer refused the connection.
	ConnectionRefused,

	/// The connection was reset or aborted.
	ConnectionReset,

	/// The operation was canceled.
	Canceled,

	/// The operation did not complete before its deadline.
	TimedOut,

	/// The operation would block, or the resource is temporarily
	/// unavailable.
	TryAgain,

	/// The object is closed or was never opened.
	Closed,

	/// A protocol error occurred, such as a peer speaking the wrong
	/// pattern during the connection handshake.
	Protocol,

	/// An unmapped operating system error.
	SystemErr(i32),
}

impl fmt::Display for Error
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		match self {
			Error::OutOfMemory => write!(f, "Out of memory"),
			Error::NotSupported => write!(f, "Not supported"),
			Error::AlreadyExists => write!(f, "Resource already exists"),
			Error::AddressInvalid => write!(f, "Address invalid"),
			Error::AddressInUse => write!(f, "Address in use"),
			Error::InvalidInput => write!(f, "Invalid argument"),
			Error::IncorrectState => write!(f, "Incorrect state"),
			Error::ConnectionRefused => write!(f, "Connection refused"),
			Error::ConnectionReset => write!(f, "Connection reset"),
			Error::Canceled => write!(f, "Operation canceled"),
			Error::TimedOut => write!(f, "Timed out"),
			Error::TryAgain => write!(f, "Try again"),
			Error::Closed => write!(f, "Object closed"),
			Error::Protocol => write!(f, "Protocol error"),
			Error::SystemErr(c) => write!(f, "System error #{}", c),
		}
	}
}

impl error::Error for Error {}

impl From<(Message, Error)> for Error
{
	fn from((_, e): (Message, Error)) -> Error
	{
		e
	}
}

impl From<io::Error> for Error
{
	fn from(e: io::Error) -> Error
	{
		use std::io::ErrorKind;

		match e.kind() {
			ErrorKind::ConnectionRefused => Error::ConnectionRefused,
			ErrorKind::ConnectionReset
			| ErrorKind::ConnectionAborted
			| ErrorKind::BrokenPipe => Error::ConnectionReset,
			ErrorKind::AddrInUse => Error::AddressInUse,
			ErrorKind::AddrNotAvailable => Error::AddressInvalid,
			ErrorKind::TimedOut => Error::TimedOut,
			ErrorKind::WouldBlock => Error::TryAgain,
			_ => Error::SystemErr(e.raw_os_error().unwrap_or(0)),
		}
	}
}
