//! The per-socket serial worker.
//!
//! One thread drains readiness events and write commands through a single
//! `select!` loop, so buffer reads never overlap and writes never block the
//! caller. Handlers are invoked here, one at a time.

use std::sync::Arc;

use crossbeam_channel::{Receiver, select};

use super::{Command, Handler, RECV_BUFFER_LEN, Shared};
use crate::event::{Direction, StreamEvent};
use crate::transport::{InputStream, OutputStream};

pub(crate) fn run<I: InputStream, O: OutputStream>(
	mut input: I,
	mut output: O,
	events: Receiver<(Direction, StreamEvent)>,
	commands: Receiver<Command>,
	shared: Arc<Shared>,
) {
	// reused across every read; deliveries are sliced to the reported count
	let mut buf = [0u8; RECV_BUFFER_LEN];
	loop {
		select! {
			recv(events) -> msg => match msg {
				Ok((direction, event)) => {
					if !handle_event(&mut input, &mut output, &shared, &mut buf, direction, event) {
						return;
					}
				}
				// transport went away without a close event
				Err(_) => {
					teardown(&mut input, &mut output, &shared);
					return;
				}
			},
			recv(commands) -> msg => match msg {
				Ok(Command::Write(data)) => submit_write(&mut output, &data),
				Ok(Command::Shutdown) | Err(_) => {
					teardown(&mut input, &mut output, &shared);
					return;
				}
			},
		}
	}
}

/// Applies one readiness event. Returns `false` once the socket is torn down
/// and the worker should stop.
fn handle_event<I: InputStream, O: OutputStream>(
	input: &mut I,
	output: &mut O,
	shared: &Shared,
	buf: &mut [u8; RECV_BUFFER_LEN],
	direction: Direction,
	event: StreamEvent,
) -> bool {
	match event {
		StreamEvent::OpenCompleted => {
			tracing::debug!(?direction, "stream open");
			shared.set_connected(true);
			true
		}
		StreamEvent::SpaceAvailable => {
			shared.set_writable(true);
			true
		}
		StreamEvent::BytesAvailable => match input.read(buf) {
			Ok(0) => {
				tracing::debug!("end of stream");
				teardown(input, output, shared);
				false
			}
			Ok(n) => {
				deliver(shared, &buf[..n]);
				true
			}
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => true,
			Err(e) => {
				tracing::debug!(error = %e, "read failed");
				teardown(input, output, shared);
				false
			}
		},
		StreamEvent::EndEncountered | StreamEvent::ErrorOccurred => {
			tracing::debug!(?direction, ?event, "stream closed");
			teardown(input, output, shared);
			false
		}
	}
}

/// Hands one received chunk to whichever handler is registered.
///
/// Only the bytes this read produced are delivered; the tail of the buffer
/// may still hold bytes from an earlier, longer read.
fn deliver(shared: &Shared, chunk: &[u8]) {
	// the handler is taken out of the slot while it runs, so it can
	// re-register (or unsubscribe) without deadlocking on the slot lock
	let mut handler = std::mem::replace(&mut *shared.handler().lock(), Handler::None);
	match &mut handler {
		Handler::None => return,
		Handler::Bytes(complete) => complete(Some(chunk.to_vec())),
		Handler::Text(complete) => {
			let value = std::str::from_utf8(chunk)
				.ok()
				.map(|s| s.trim().to_owned());
			complete(value);
		}
	}
	let mut slot = shared.handler().lock();
	if matches!(*slot, Handler::None) {
		*slot = handler;
	}
}

fn submit_write<O: OutputStream>(output: &mut O, data: &[u8]) {
	match output.write(data) {
		Ok(n) if n < data.len() => {
			tracing::warn!(submitted = data.len(), written = n, "short write");
		}
		Ok(_) => {}
		// asynchronous failures are silent to the caller
		Err(e) => tracing::warn!(error = %e, "write failed"),
	}
}

fn teardown<I: InputStream, O: OutputStream>(input: &mut I, output: &mut O, shared: &Shared) {
	shared.set_connected(false);
	shared.set_writable(false);
	input.close();
	output.close();
	*shared.handler().lock() = Handler::None;
}
