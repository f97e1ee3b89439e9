mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::SocketError;
use crate::event::EventSink;
use crate::transport::{InputStream, OutputStream, TcpTransport, Transport};

/// Size of the receive buffer. Every read delivers at most this many bytes.
pub const RECV_BUFFER_LEN: usize = 200;

/// The one live receive handler.
///
/// At most one of text/bytes is registered at any time; installing either
/// replaces whatever was there.
pub(crate) enum Handler {
	None,
	Text(Box<dyn FnMut(Option<String>) + Send>),
	Bytes(Box<dyn FnMut(Option<Vec<u8>>) + Send>),
}

/// State visible to both the caller and the worker thread.
pub(crate) struct Shared {
	connected: AtomicBool,
	writable: AtomicBool,
	handler: Mutex<Handler>,
}

impl Shared {
	pub(crate) fn connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	pub(crate) fn set_connected(&self, value: bool) {
		self.connected.store(value, Ordering::Release);
	}

	pub(crate) fn writable(&self) -> bool {
		self.writable.load(Ordering::Acquire)
	}

	pub(crate) fn set_writable(&self, value: bool) {
		self.writable.store(value, Ordering::Release);
	}

	pub(crate) fn handler(&self) -> &Mutex<Handler> {
		&self.handler
	}
}

pub(crate) enum Command {
	Write(Vec<u8>),
	Shutdown,
}

/// A client-side stream socket.
///
/// Construction starts an asynchronous connect and returns immediately; the
/// socket stays disconnected until the transport reports open-completed.
/// Received data is pushed to a registered handler; `write` never blocks the
/// caller — submission happens on the socket's own worker thread.
///
/// Connection loss is silent: it flips `is_connected` and tears the streams
/// down, but no in-flight caller gets an error for it.
pub struct Socket {
	address: String,
	port: u16,
	shared: Arc<Shared>,
	commands: Sender<Command>,
	worker: Option<JoinHandle<()>>,
}

impl Socket {
	/// Opens a stream pair through `transport` and starts driving it.
	///
	/// Fails with `ConnectionFailed` if the transport could not produce the
	/// pair (resolution failure, refused connect); causes are not
	/// distinguished. Success does not mean connected yet.
	pub fn connect<T: Transport>(
		transport: &T,
		address: &str,
		port: u16,
	) -> Result<Self, SocketError> {
		let connection_failed = || SocketError::ConnectionFailed {
			address: address.to_owned(),
			port,
		};

		let (sink, events) = EventSink::channel();
		let Some((mut input, mut output)) = transport.open_pair(address, port, sink) else {
			return Err(connection_failed());
		};
		input.open();
		output.open();

		let shared = Arc::new(Shared {
			connected: AtomicBool::new(false),
			writable: AtomicBool::new(false),
			handler: Mutex::new(Handler::None),
		});
		// unbounded: write submission must never block the caller
		let (commands, commands_rx) = crossbeam_channel::unbounded();
		let state = Arc::clone(&shared);
		let worker = std::thread::Builder::new()
			.name(format!("streamlane-{address}:{port}"))
			.spawn(move || worker::run(input, output, events, commands_rx, state))
			.map_err(|_| connection_failed())?;

		Ok(Self {
			address: address.to_owned(),
			port,
			shared,
			commands,
			worker: Some(worker),
		})
	}

	/// Opens a socket over the bundled TCP transport.
	pub fn connect_tcp(address: &str, port: u16) -> Result<Self, SocketError> {
		Self::connect(&TcpTransport, address, port)
	}

	#[inline]
	pub fn address(&self) -> &str {
		&self.address
	}

	#[inline]
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Whether an open-completed event has been observed (and no teardown
	/// since).
	pub fn is_connected(&self) -> bool {
		self.shared.connected()
	}

	/// Writes `value` as UTF-8 bytes.
	///
	/// Preconditions, checked in order: connected, writable, encodable.
	/// Submission is asynchronous and fire-and-forget: there is no byte-count
	/// feedback and short writes are not retried.
	pub fn write(&self, value: &str) -> Result<(), SocketError> {
		self.check_writable()?;
		let data = encode_text(value)?;
		self.submit(data)
	}

	/// Writes raw bytes. The primitive `write` delegates to after encoding.
	pub fn write_data(&self, data: &[u8]) -> Result<(), SocketError> {
		self.check_writable()?;
		self.submit(data.to_vec())
	}

	/// Registers `complete` as the text receive handler.
	///
	/// This is a subscription, not a one-shot request: the handler fires on
	/// every subsequent bytes-available event until replaced or the
	/// connection tears down. It receives the chunk decoded as UTF-8 and
	/// trimmed of leading/trailing whitespace, or `None` when the chunk is
	/// not valid UTF-8. Replaces any previously registered handler, byte
	/// handlers included.
	pub fn read<F>(&self, complete: F) -> Result<(), SocketError>
	where
		F: FnMut(Option<String>) + Send + 'static,
	{
		// connected is re-checked under the slot lock so a racing teardown
		// cannot leave a handler installed on a dead socket
		let mut handler = self.shared.handler().lock();
		if !self.shared.connected() {
			return Err(SocketError::NotConnected);
		}
		*handler = Handler::Text(Box::new(complete));
		Ok(())
	}

	/// Binary twin of `read`: the handler receives each chunk verbatim,
	/// sliced to the byte count the transport reported for that read.
	pub fn read_data<F>(&self, complete: F) -> Result<(), SocketError>
	where
		F: FnMut(Option<Vec<u8>>) + Send + 'static,
	{
		let mut handler = self.shared.handler().lock();
		if !self.shared.connected() {
			return Err(SocketError::NotConnected);
		}
		*handler = Handler::Bytes(Box::new(complete));
		Ok(())
	}

	fn check_writable(&self) -> Result<(), SocketError> {
		if !self.shared.connected() {
			return Err(SocketError::NotConnected);
		}
		if !self.shared.writable() {
			return Err(SocketError::NotWritable);
		}
		Ok(())
	}

	fn submit(&self, data: Vec<u8>) -> Result<(), SocketError> {
		// the worker only goes away on teardown, so a dead channel reads as
		// a lost connection
		self.commands
			.send(Command::Write(data))
			.map_err(|_| SocketError::NotConnected)
	}
}

// manual impl: the boxed handler has no Debug
impl std::fmt::Debug for Socket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Socket")
			.field("address", &self.address)
			.field("port", &self.port)
			.field("connected", &self.is_connected())
			.finish_non_exhaustive()
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		let _ = self.commands.send(Command::Shutdown);
		if let Some(worker) = self.worker.take() {
			let _ = worker.join();
		}
	}
}

/// Encodes outgoing text as UTF-8.
///
/// `&str` input cannot fail to encode; `DataEncodingFailed` is reserved for
/// this arm regardless.
fn encode_text(value: &str) -> Result<Vec<u8>, SocketError> {
	Ok(value.as_bytes().to_vec())
}
