//! Tests of the REQ/REP pattern.
//!
//! These follow the classic nanomsg request/reply suite: state
//! violations, a matched pair exchanging over the intra-process
//! transport, and request supersession.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nanolink::options::{RecvTimeout, ResendTime, SendBufferSize};
use nanolink::{Aio, AioResult, Error, Message, Pipe, PipeEvent, Protocol, Socket};

fn msg(data: &[u8]) -> Message
{
	Message::from(data)
}

fn init_logging()
{
	let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn protocols_match()
{
	let req = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(req.protocol(), Protocol::Req0);
	assert_eq!(req.peer(), Protocol::Rep0);

	let rep = Socket::new(Protocol::Rep0).unwrap();
	assert_eq!(rep.protocol(), Protocol::Rep0);
	assert_eq!(rep.peer(), Protocol::Req0);
}

#[test]
fn recv_with_no_send_fails()
{
	let mut req = Socket::new(Protocol::Req0).unwrap();
	assert_eq!(req.recv().unwrap_err(), Error::IncorrectState);
}

#[test]
fn send_with_no_recv_fails()
{
	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	let (returned, e) = rep.send(Message::new()).unwrap_err();
	assert_eq!(e, Error::IncorrectState);
	assert!(returned.is_empty());
}

#[test]
fn linked_pair_can_exchange()
{
	init_logging();
	let addr = "inproc://test-exchange";

	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	rep.listen(addr).unwrap();
	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.dial(addr).unwrap();

	let mut ping = Message::new();
	ping.append(b"ping\0");
	assert_eq!(ping.len(), 5);
	assert_eq!(&ping[..], b"ping\0");
	req.send(ping).unwrap();

	let mut pong = rep.recv().unwrap();
	assert_eq!(pong.len(), 5);
	assert_eq!(&pong[..], b"ping\0");
	pong.trim(5).unwrap();
	pong.append(b"pong\0");
	rep.send(pong).unwrap();

	let reply = req.recv().unwrap();
	assert_eq!(reply.len(), 5);
	assert_eq!(&reply[..], b"pong\0");
}

#[test]
fn newer_request_supersedes_the_old()
{
	init_logging();
	let addr = "inproc://test-cancel";

	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	let mut req = Socket::new(Protocol::Req0).unwrap();

	req.set_opt::<ResendTime>(Some(Duration::from_millis(100))).unwrap();
	req.set_opt::<SendBufferSize>(16).unwrap();

	rep.listen(addr).unwrap();
	req.dial(addr).unwrap();

	req.send(msg(b"abc\0")).unwrap();
	req.send(msg(b"def\0")).unwrap();

	// Echo whatever arrives, twice. The first reply answers the
	// abandoned request and must be discarded by the requester.
	let cmd = rep.recv().unwrap();
	rep.send(cmd).unwrap();
	let cmd = rep.recv().unwrap();
	rep.send(cmd).unwrap();

	let reply = req.recv().unwrap();
	assert_eq!(reply.len(), 4);
	assert_eq!(&reply[..], b"def\0");
}

#[test]
fn full_send_buffer_returns_try_again()
{
	// With nobody to drain it, the default one-slot queue fills on the
	// first send.
	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.set_nonblocking(true);

	req.send(msg(b"one")).unwrap();
	let (returned, e) = req.send(msg(b"two")).unwrap_err();
	assert_eq!(e, Error::TryAgain);
	assert_eq!(&returned[..], b"two");
}

#[test]
fn recv_times_out_without_a_reply()
{
	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.set_opt::<RecvTimeout>(Some(Duration::from_millis(50))).unwrap();

	req.send(msg(b"hello")).unwrap();
	assert_eq!(req.recv().unwrap_err(), Error::TimedOut);
}

#[test]
fn asynchronous_operations_complete_via_callbacks()
{
	let addr = "inproc://test-aio";

	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	rep.listen(addr).unwrap();
	let mut req = Socket::new(Protocol::Req0).unwrap();
	req.dial(addr).unwrap();

	let sent = Aio::new(|_, _| {});
	req.send_async(&sent, msg(b"query")).unwrap();
	sent.wait();
	assert_eq!(sent.result(), Ok(5));

	let got = Arc::new(Mutex::new(None));
	let stash = Arc::clone(&got);
	let recv_aio = Aio::new(move |_, res| {
		*stash.lock().unwrap() = Some(res);
	});
	rep.recv_async(&recv_aio).unwrap();
	recv_aio.wait();

	match got.lock().unwrap().take() {
		Some(AioResult::RecvOk(m)) => assert_eq!(&m[..], b"query"),
		other => panic!("unexpected receive result: {:?}", other),
	}

	rep.send(msg(b"answer")).unwrap();
	assert_eq!(&req.recv().unwrap()[..], b"answer");
}

#[test]
fn pipe_events_are_reported()
{
	let addr = "inproc://test-pipe-events";

	let events: Arc<Mutex<Vec<PipeEvent>>> = Arc::new(Mutex::new(Vec::new()));
	let log = Arc::clone(&events);

	let mut rep = Socket::new(Protocol::Rep0).unwrap();
	rep.pipe_notify(Box::new(move |_: Pipe, ev| {
		log.lock().unwrap().push(ev);
	}))
	.unwrap();
	rep.listen(addr).unwrap();

	{
		let mut req = Socket::new(Protocol::Req0).unwrap();
		req.dial(addr).unwrap();

		let seen = events.lock().unwrap().clone();
		assert_eq!(seen, vec![PipeEvent::AddPre, PipeEvent::AddPost]);
	}

	// The requester hung up; the detach is reported asynchronously.
	std::thread::sleep(Duration::from_millis(200));
	let seen = events.lock().unwrap().clone();
	assert_eq!(
		seen,
		vec![PipeEvent::AddPre, PipeEvent::AddPost, PipeEvent::RemovePost]
	);
}
