//! The request/reply state machines.
//!
//! A REQ socket prepends a fresh 32-bit request ID to each outgoing
//! request and correlates replies against the ID of the one in-flight
//! request, resending it periodically until the reply arrives or a newer
//! request supersedes it. A REP socket caches the routing header (the
//! "backtrace") of the request it last delivered to the application and
//! prepends it to the application's next send so the reply finds its way
//! back to the originating peer.
//!
//! Request IDs carry the top bit as a marker, which is what lets the
//! header be recognized as the end of the backtrace when a message has
//! crossed intermediaries that prepend their own routing chunks.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::aio::Aio;
use crate::error::Error;
use crate::init;
use crate::message::Message;
use crate::pattern::Completion;
use crate::platform::TimerToken;
use crate::socket::{Core, Opts, Queues};

/// Marker distinguishing a request ID from ordinary routing chunks.
const REQUEST_ID_FLAG: u8 = 0x80;

/// How long a request waits for its reply before being retransmitted.
pub(crate) const DEFAULT_RESEND_TIME: Duration = Duration::from_secs(60);

/// The REQ side of the pattern.
pub(crate) struct ReqState
{
	next_id: u32,
	request: Option<Message>,
	request_id: Option<u32>,
	reply: Option<Message>,
	recv_waiter: Option<Aio>,
	resend: Option<TimerToken>,
}

impl ReqState
{
	pub(crate) fn new() -> ReqState
	{
		// Seed the ID counter so that a socket reopened after a crash is
		// unlikely to collide with replies addressed to its predecessor.
		let seed = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.subsec_nanos())
			.unwrap_or(0);

		ReqState {
			next_id: seed,
			request: None,
			request_id: None,
			reply: None,
			recv_waiter: None,
			resend: None,
		}
	}

	fn next_request_id(&mut self) -> u32
	{
		self.next_id = self.next_id.wrapping_add(1);
		self.next_id | u32::from(REQUEST_ID_FLAG) << 24
	}

	/// Sends a request, superseding any request still in flight.
	///
	/// The previous request is abandoned outright: its resend timer is
	/// rescheduled for the new request, and a reply to it, stashed or yet
	/// to arrive, will be discarded. This "last send wins" discipline is
	/// what makes request cancellation trivial for applications.
	pub(crate) fn send(
		&mut self,
		core: &Arc<Core>,
		q: &mut Queues,
		aio: &Aio,
		mut msg: Message,
		nonblock: bool,
		out: &mut Vec<Completion>,
	)
	{
		if q.is_full() && nonblock {
			aio.set_message(msg);
			out.push(Completion::new(aio.clone(), Err(Error::TryAgain), 0));
			return;
		}

		let id = self.next_request_id();
		let mut header = [0u8; 4];
		BigEndian::write_u32(&mut header, id);
		msg.set_header(&header);

		self.request = Some(msg.clone());
		self.request_id = Some(id);
		self.reply = None;
		self.arm_resend(core, q.opts);

		let len = msg.len();
		if q.is_full() {
			q.park(aio, None, msg);
		}
		else {
			q.push(None, msg);
			out.push(Completion::new(aio.clone(), Ok(()), len));
		}
	}

	/// Receives the reply correlated to the in-flight request.
	pub(crate) fn recv(&mut self, aio: &Aio, nonblock: bool, out: &mut Vec<Completion>)
	{
		if let Some(reply) = self.reply.take() {
			let len = reply.len();
			aio.set_message(reply);
			out.push(Completion::new(aio.clone(), Ok(()), len));
		}
		else if self.request_id.is_none() {
			// No request outstanding; there is nothing a reply could
			// correlate to.
			out.push(Completion::new(aio.clone(), Err(Error::IncorrectState), 0));
		}
		else if self.recv_waiter.is_some() || nonblock {
			out.push(Completion::new(aio.clone(), Err(Error::TryAgain), 0));
		}
		else {
			self.recv_waiter = Some(aio.clone());
		}
	}

	/// Handles a message arriving from a pipe.
	///
	/// Anything whose leading ID does not match the in-flight request is
	/// a stale or unsolicited reply and is discarded.
	pub(crate) fn deliver(&mut self, mut msg: Message, out: &mut Vec<Completion>)
	{
		if msg.len() < 4 {
			return;
		}
		let id = BigEndian::read_u32(&msg[..4]);
		if Some(id) != self.request_id {
			return;
		}
		if msg.trim(4).is_err() {
			return;
		}

		if let Some(token) = self.resend.take() {
			init::timer_cancel(&token);
		}
		self.request = None;
		self.request_id = None;

		if let Some(waiter) = self.recv_waiter.take() {
			let len = msg.len();
			waiter.set_message(msg);
			out.push(Completion::new(waiter, Ok(()), len));
		}
		else {
			self.reply = Some(msg);
		}
	}

	/// Called when a new pipe attaches to the socket.
	///
	/// An unanswered request gets an immediate transmission opportunity on
	/// the new pipe rather than waiting out the resend period, but only if
	/// a copy is not already queued.
	pub(crate) fn pipe_attached(&mut self, q: &mut Queues)
	{
		if let Some(msg) = &self.request {
			if !q.has_untargeted() {
				q.push(None, msg.clone());
			}
		}
	}

	/// Fired by the resend timer: queue the in-flight request again.
	///
	/// Retransmission is best-effort liveness only; the transport is free
	/// to drop or duplicate, and the ID correlation weeds out the
	/// duplicates on the reply path.
	pub(crate) fn resend(&mut self, core: &Arc<Core>, q: &mut Queues)
	{
		if let Some(msg) = self.request.clone() {
			q.push(None, msg);
			self.arm_resend(core, q.opts);
		}
	}

	fn arm_resend(&mut self, core: &Arc<Core>, opts: &Opts)
	{
		if let Some(token) = self.resend.take() {
			init::timer_cancel(&token);
		}
		if let Some(period) = opts.resend_time {
			let weak = Arc::downgrade(core);
			self.resend = init::schedule(
				Instant::now() + period,
				Box::new(move || {
					if let Some(core) = weak.upgrade() {
						Core::resend(&core);
					}
				}),
			);
		}
	}

	pub(crate) fn abort(&mut self, aio: &Aio) -> bool
	{
		if self.recv_waiter.as_ref() == Some(aio) {
			self.recv_waiter = None;
			true
		}
		else {
			false
		}
	}

	pub(crate) fn close(&mut self, out: &mut Vec<Completion>)
	{
		if let Some(token) = self.resend.take() {
			init::timer_cancel(&token);
		}
		if let Some(waiter) = self.recv_waiter.take() {
			out.push(Completion::new(waiter, Err(Error::Closed), 0));
		}
	}
}

/// The REP side of the pattern.
pub(crate) struct RepState
{
	/// The routing header of the request last handed to the application,
	/// together with the pipe it arrived on. Present exactly while the
	/// socket is expecting the application's reply.
	backtrace: Option<(u32, Vec<u8>)>,
	rxq: VecDeque<(u32, Message)>,
	recv_waiter: Option<Aio>,
}

impl RepState
{
	pub(crate) fn new() -> RepState
	{
		RepState { backtrace: None, rxq: VecDeque::new(), recv_waiter: None }
	}

	/// Sends the reply to the request received last.
	///
	/// Legal only while a backtrace is cached, i.e. immediately after a
	/// successful `recv`. The reply is routed to the pipe the request
	/// arrived on; if that peer is gone the reply is quietly dropped, as
	/// the requester will retransmit if it still cares.
	pub(crate) fn send(
		&mut self,
		q: &mut Queues,
		aio: &Aio,
		msg: Message,
		nonblock: bool,
		out: &mut Vec<Completion>,
	)
	{
		let (pipe, backtrace) = match self.backtrace.take() {
			Some(v) => v,
			None => {
				aio.set_message(msg);
				out.push(Completion::new(aio.clone(), Err(Error::IncorrectState), 0));
				return;
			}
		};

		if q.is_full() && nonblock {
			// Still expecting this reply; the application may retry.
			self.backtrace = Some((pipe, backtrace));
			aio.set_message(msg);
			out.push(Completion::new(aio.clone(), Err(Error::TryAgain), 0));
			return;
		}

		let mut msg = msg;
		msg.set_header(&backtrace);

		if !q.has_pipe(pipe) {
			out.push(Completion::new(aio.clone(), Ok(()), 0));
			return;
		}

		let len = msg.len();
		if q.is_full() {
			q.park(aio, Some(pipe), msg);
		}
		else {
			q.push(Some(pipe), msg);
			out.push(Completion::new(aio.clone(), Ok(()), len));
		}
	}

	/// Receives the next request.
	///
	/// A backtrace still cached from an earlier `recv` is discarded: the
	/// application has chosen not to answer that request.
	pub(crate) fn recv(&mut self, aio: &Aio, nonblock: bool, out: &mut Vec<Completion>)
	{
		self.backtrace = None;

		while let Some((pipe, mut msg)) = self.rxq.pop_front() {
			match split_backtrace(&mut msg) {
				Some(bt) => {
					self.backtrace = Some((pipe, bt));
					let len = msg.len();
					aio.set_message(msg);
					out.push(Completion::new(aio.clone(), Ok(()), len));
					return;
				}
				// Malformed request header; drop it and keep looking.
				None => continue,
			}
		}

		if self.recv_waiter.is_some() || nonblock {
			out.push(Completion::new(aio.clone(), Err(Error::TryAgain), 0));
		}
		else {
			self.recv_waiter = Some(aio.clone());
		}
	}

	/// Handles a request arriving from a pipe.
	pub(crate) fn deliver(
		&mut self,
		pipe: u32,
		msg: Message,
		opts: &Opts,
		out: &mut Vec<Completion>,
	)
	{
		if let Some(waiter) = self.recv_waiter.take() {
			let mut msg = msg;
			match split_backtrace(&mut msg) {
				Some(bt) => {
					self.backtrace = Some((pipe, bt));
					let len = msg.len();
					waiter.set_message(msg);
					out.push(Completion::new(waiter, Ok(()), len));
				}
				None => {
					// Junk frame; the waiter keeps waiting.
					self.recv_waiter = Some(waiter);
				}
			}
		}
		else if self.rxq.len() < opts.recv_buf {
			self.rxq.push_back((pipe, msg));
		}
		else {
			debug!("receive queue full; dropping request");
		}
	}

	pub(crate) fn abort(&mut self, aio: &Aio) -> bool
	{
		if self.recv_waiter.as_ref() == Some(aio) {
			self.recv_waiter = None;
			true
		}
		else {
			false
		}
	}

	pub(crate) fn close(&mut self, out: &mut Vec<Completion>)
	{
		if let Some(waiter) = self.recv_waiter.take() {
			out.push(Completion::new(waiter, Err(Error::Closed), 0));
		}
	}
}

/// Moves the routing header off the front of a raw inbound message.
///
/// The header is every leading four byte chunk up to and including the
/// first one carrying the request ID marker. Returns `None`, leaving the
/// message in an unspecified state, if the message runs out before a
/// marker chunk appears.
fn split_backtrace(msg: &mut Message) -> Option<Vec<u8>>
{
	let mut backtrace = Vec::with_capacity(4);
	loop {
		if msg.len() < 4 {
			return None;
		}
		let end = msg[0] & REQUEST_ID_FLAG != 0;
		backtrace.extend_from_slice(&msg[..4]);
		if msg.trim(4).is_err() {
			return None;
		}
		if end {
			return Some(backtrace);
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn request_ids_carry_the_marker()
	{
		let mut req = ReqState::new();
		for _ in 0..1000 {
			assert_ne!(req.next_request_id() & 0x8000_0000, 0);
		}
	}

	#[test]
	fn backtrace_ends_at_the_marker_chunk()
	{
		let mut msg = Message::from(&[0x80, 0, 0, 7, b'h', b'i'][..]);
		let bt = split_backtrace(&mut msg).unwrap();
		assert_eq!(bt, vec![0x80, 0, 0, 7]);
		assert_eq!(&msg[..], b"hi");
	}

	#[test]
	fn backtrace_keeps_intermediary_chunks()
	{
		let raw = [1, 2, 3, 4, 0x80, 0, 0, 9, b'x'];
		let mut msg = Message::from(&raw[..]);
		let bt = split_backtrace(&mut msg).unwrap();
		assert_eq!(bt, vec![1, 2, 3, 4, 0x80, 0, 0, 9]);
		assert_eq!(&msg[..], b"x");
	}

	#[test]
	fn malformed_backtrace_is_detected()
	{
		// No marker chunk anywhere.
		let mut msg = Message::from(&[1, 2, 3, 4, 5, 6, 7, 8][..]);
		assert!(split_backtrace(&mut msg).is_none());

		// Short frame.
		let mut msg = Message::from(&[1, 2][..]);
		assert!(split_backtrace(&mut msg).is_none());
	}
}
