//! Message handling.
use std::{fmt, io, ops};

use crate::error::{Error, Result};

/// A message for transmission and reception.
///
/// A message consists of a header and a body. The body holds the
/// application's payload and the header holds routing information prepended
/// by the pattern layer, such as the request ID of a request/reply exchange.
/// Applications normally operate only on the body; the header is managed by
/// the socket's pattern.
///
/// On stream-oriented transports the header and body are concatenated into
/// a single frame; the receiving pattern layer splits them apart again.
#[derive(Clone, Default)]
pub struct Message
{
	header: Vec<u8>,
	body: Vec<u8>,
}

impl Message
{
	/// Creates a new, empty message.
	pub fn new() -> Message
	{
		Message { header: Vec::new(), body: Vec::new() }
	}

	/// Creates a new message with a body of the given capacity.
	pub fn with_capacity(cap: usize) -> Message
	{
		Message { header: Vec::new(), body: Vec::with_capacity(cap) }
	}

	/// Returns the length of the message body.
	pub fn len(&self) -> usize
	{
		self.body.len()
	}

	/// Returns `true` if the message body is empty.
	pub fn is_empty(&self) -> bool
	{
		self.body.is_empty()
	}

	/// Returns the message body as a byte slice.
	pub fn as_slice(&self) -> &[u8]
	{
		&self.body
	}

	/// Returns the message body as a mutable byte slice.
	pub fn as_mut_slice(&mut self) -> &mut [u8]
	{
		&mut self.body
	}

	/// Appends the given bytes to the end of the message body.
	pub fn append(&mut self, data: &[u8])
	{
		self.body.extend_from_slice(data);
	}

	/// Inserts the given bytes at the front of the message body.
	pub fn insert(&mut self, data: &[u8])
	{
		let mut body = Vec::with_capacity(data.len() + self.body.len());
		body.extend_from_slice(data);
		body.extend_from_slice(&self.body);
		self.body = body;
	}

	/// Removes `len` bytes from the front of the message body.
	pub fn trim(&mut self, len: usize) -> Result<()>
	{
		if len > self.body.len() {
			return Err(Error::InvalidInput);
		}

		self.body.drain(..len);
		Ok(())
	}

	/// Removes `len` bytes from the end of the message body.
	pub fn chop(&mut self, len: usize) -> Result<()>
	{
		if len > self.body.len() {
			return Err(Error::InvalidInput);
		}

		let new_len = self.body.len() - len;
		self.body.truncate(new_len);
		Ok(())
	}

	/// Clears the message body.
	///
	/// The header is left untouched, allowing a received message to be
	/// reused for the reply.
	pub fn clear(&mut self)
	{
		self.body.clear();
	}

	/// Returns the message header as a byte slice.
	pub fn header(&self) -> &[u8]
	{
		&self.header
	}

	/// Replaces the message header.
	pub(crate) fn set_header(&mut self, data: &[u8])
	{
		self.header.clear();
		self.header.extend_from_slice(data);
	}

	/// Consumes the message, returning the header and body as one buffer.
	///
	/// This is the form a message takes on a stream-oriented transport.
	pub(crate) fn into_wire(mut self) -> Vec<u8>
	{
		if self.header.is_empty() {
			return self.body;
		}

		self.header.extend_from_slice(&self.body);
		self.header
	}

	/// Builds a message from a raw wire buffer.
	///
	/// The entire buffer lands in the body; the pattern layer is
	/// responsible for splitting off any routing header.
	pub(crate) fn from_wire(buf: Vec<u8>) -> Message
	{
		Message { header: Vec::new(), body: buf }
	}
}

impl From<&[u8]> for Message
{
	fn from(data: &[u8]) -> Message
	{
		Message { header: Vec::new(), body: data.to_vec() }
	}
}

impl ops::Deref for Message
{
	type Target = [u8];

	fn deref(&self) -> &[u8]
	{
		&self.body
	}
}

impl ops::DerefMut for Message
{
	fn deref_mut(&mut self) -> &mut [u8]
	{
		&mut self.body
	}
}

impl io::Write for Message
{
	fn write(&mut self, buf: &[u8]) -> io::Result<usize>
	{
		self.body.extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()>
	{
		Ok(())
	}
}

impl fmt::Debug for Message
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		write!(f, "Message {{ header: {}b, body: {}b }}", self.header.len(), self.body.len())
	}
}

#[cfg(test)]
mod tests
{
	use std::io::Write;

	use super::*;

	#[test]
	fn body_editing()
	{
		let mut msg = Message::new();
		msg.append(b"ping");
		msg.append(b"\0");
		assert_eq!(msg.len(), 5);
		assert_eq!(&msg[..], b"ping\0");

		msg.trim(4).unwrap();
		assert_eq!(&msg[..], b"\0");
		msg.insert(b"pong");
		assert_eq!(&msg[..], b"pong\0");

		msg.chop(1).unwrap();
		assert_eq!(&msg[..], b"pong");

		assert!(msg.trim(5).is_err());
		assert!(msg.chop(5).is_err());
	}

	#[test]
	fn write_into_body()
	{
		let mut msg = Message::new();
		write!(msg, "Hello, {}!", "Ferris").unwrap();
		assert_eq!(&msg[..], b"Hello, Ferris!");

		msg.clear();
		assert!(msg.is_empty());
	}

	#[test]
	fn wire_form_concatenates_header_and_body()
	{
		let mut msg = Message::from(&b"data"[..]);
		msg.set_header(&[0x80, 0, 0, 1]);
		let wire = msg.into_wire();
		assert_eq!(wire, vec![0x80, 0, 0, 1, b'd', b'a', b't', b'a']);

		let back = Message::from_wire(wire);
		assert!(back.header().is_empty());
		assert_eq!(back.len(), 8);
	}
}
