//! A native Rust implementation of the Scalability Protocols.
//!
//! The Scalability Protocols, as popularized by nanomsg and its
//! successors, are a family of lightweight, broker-less messaging
//! patterns, such as RPC-style request/reply, that free the programmer
//! from worrying about details like connection management, retries, and
//! other common considerations, so that they can focus on the application
//! instead of the plumbing.
//!
//! This crate implements the substrate of such a library directly in
//! Rust: sockets open a messaging pattern, dial or listen on
//! transport-agnostic URLs (`tcp://…`, `ipc://…`, `inproc://…`), and
//! exchange framed messages with per-pattern semantics. Blocking and
//! long-running operations run through asynchronous I/O handles with
//! cooperative cancellation and deadlines.
//!
//! ## Examples
//!
//! The following example uses the intra-process transport to set up a
//! request/reply socket pair. The "client" sends a String to the "server"
//! which responds with a nice phrase.
//!
//! ```
//! use std::io::Write;
//! use nanolink::*;
//!
//! const ADDRESS: &'static str = "inproc://nanolink/example";
//!
//! fn request() -> Result<()> {
//!     // Set up the client and connect to the specified address
//!     let mut client = Socket::new(Protocol::Req0)?;
//!     client.dial(ADDRESS)?;
//!
//!     // Send the request from the client to the server.
//!     client.send("Ferris".as_bytes().into())?;
//!
//!     // Wait for the response from the server.
//!     let msg = client.recv()?;
//!     let reply = String::from_utf8_lossy(&msg);
//!     assert_eq!(reply, "Hello, Ferris!");
//!     Ok(())
//! }
//!
//! fn reply() -> Result<()> {
//!     // Set up the server and listen for connections on the specified address.
//!     let mut server = Socket::new(Protocol::Rep0)?;
//!     server.listen(ADDRESS)?;
//!
//!     // Receive the message from the client.
//!     let mut msg = server.recv()?;
//!     let name = String::from_utf8_lossy(&msg).into_owned();
//!     assert_eq!(name, "Ferris");
//!
//!     // Reuse the message to be more efficient.
//!     msg.clear();
//!     write!(msg, "Hello, {}!", name).unwrap();
//!
//!     server.send(msg)?;
//!     Ok(())
//! }
//!
//! # // Start the server first, so the client can connect to it.
//! # let jh = std::thread::spawn(|| reply().unwrap());
//! # std::thread::sleep(std::time::Duration::from_millis(150));
//! # request().unwrap();
//! # jh.join().unwrap();
//! ```
#![deny(bare_trait_objects)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(unreachable_pub)]

mod addr;
mod aio;
mod error;
mod init;
mod message;
mod pattern;
mod pipe;
mod platform;
mod protocol;
mod socket;
mod transport;

pub mod options;
pub mod resolver;

pub use crate::{
	addr::{Family, SocketAddr},
	aio::{Aio, AioResult},
	error::{Error, Result, SendResult},
	init::{fini, init},
	message::Message,
	pipe::{Pipe, PipeEvent, PipeNotifyFn},
	protocol::Protocol,
	socket::Socket,
};
