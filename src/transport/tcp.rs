use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use super::{InputStream, OutputStream, Transport};
use crate::error::errno;
use crate::event::{Direction, EventSink, StreamEvent};

/// Poll granularity. Also bounds how quickly the poller notices shutdown.
const POLL_TICK_MS: libc::c_int = 50;

/// How long the poller waits for a bytes-available report to be drained
/// before checking readiness again.
const READ_ACK_WAIT: Duration = Duration::from_millis(100);

/// Transport over non-blocking kernel TCP sockets.
///
/// `open_pair` resolves the destination, creates one `SOCK_STREAM` descriptor
/// and starts a non-blocking connect. A dedicated poller thread (started by
/// `InputStream::open`) turns `poll(2)` readiness into stream events:
/// `SO_ERROR`-checked connect completion, bytes available, peer close.
/// Writability is reported once, right after the connect completes.
pub struct TcpTransport;

/// State shared by the two handles and the poller thread.
struct Conn {
	fd: OwnedFd,
	shutdown: AtomicBool,
}

impl Conn {
	#[inline]
	fn raw(&self) -> libc::c_int {
		self.fd.as_raw_fd()
	}

	fn stop(&self) {
		self.shutdown.store(true, Ordering::Release);
	}

	fn stopped(&self) -> bool {
		self.shutdown.load(Ordering::Acquire)
	}
}

pub struct TcpInput {
	conn: Arc<Conn>,
	events: EventSink,
	ack_tx: Sender<()>,
	// taken by open() to seed the poller thread
	pending: Option<Receiver<()>>,
}

pub struct TcpOutput {
	conn: Arc<Conn>,
}

impl Transport for TcpTransport {
	type Input = TcpInput;
	type Output = TcpOutput;

	fn open_pair(
		&self,
		address: &str,
		port: u16,
		events: EventSink,
	) -> Option<(TcpInput, TcpOutput)> {
		let addr = match (address, port).to_socket_addrs() {
			Ok(mut addrs) => addrs.next()?,
			Err(e) => {
				tracing::debug!(address, port, error = %e, "address resolution failed");
				return None;
			}
		};

		let family = match addr {
			SocketAddr::V4(_) => libc::AF_INET,
			SocketAddr::V6(_) => libc::AF_INET6,
		};
		let raw = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
		if raw == -1 {
			tracing::debug!(errno = errno(), "socket() failed");
			return None;
		}
		let fd = unsafe { OwnedFd::from_raw_fd(raw) };

		if let Err(e) = set_nonblocking(fd.as_raw_fd()) {
			tracing::debug!(error = %e, "O_NONBLOCK failed");
			return None;
		}

		let result = with_sockaddr(&addr, |ptr, len| unsafe {
			libc::connect(fd.as_raw_fd(), ptr, len)
		});
		if result == -1 {
			let e = errno();
			// EINPROGRESS is the expected non-blocking outcome
			if e != libc::EINPROGRESS {
				tracing::debug!(address, port, errno = e, "connect() failed");
				return None;
			}
		}

		let conn = Arc::new(Conn {
			fd,
			shutdown: AtomicBool::new(false),
		});
		let (ack_tx, ack_rx) = bounded(1);
		let input = TcpInput {
			conn: Arc::clone(&conn),
			events,
			ack_tx,
			pending: Some(ack_rx),
		};
		Some((input, TcpOutput { conn }))
	}
}

impl InputStream for TcpInput {
	fn open(&mut self) {
		let Some(ack_rx) = self.pending.take() else {
			return;
		};
		let conn = Arc::clone(&self.conn);
		let events = self.events.clone();
		let spawned = std::thread::Builder::new()
			.name("streamlane-poll".into())
			.spawn(move || poll_loop(conn, events, ack_rx));
		if let Err(e) = spawned {
			tracing::warn!(error = %e, "failed to start poller thread");
		}
	}

	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		let n = unsafe {
			libc::read(
				self.conn.raw(),
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
			)
		};
		// wake the poller whatever the outcome; the report is consumed
		let _ = self.ack_tx.try_send(());
		if n == -1 {
			Err(std::io::Error::last_os_error())
		} else {
			Ok(n as usize)
		}
	}

	fn close(&mut self) {
		self.conn.stop();
		unsafe { libc::shutdown(self.conn.raw(), libc::SHUT_RD) };
	}
}

impl Drop for TcpInput {
	fn drop(&mut self) {
		self.conn.stop();
	}
}

impl OutputStream for TcpOutput {
	fn open(&mut self) {}

	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		// MSG_NOSIGNAL: a dead peer must surface as EPIPE, not SIGPIPE
		let n = unsafe {
			libc::send(
				self.conn.raw(),
				buf.as_ptr() as *const libc::c_void,
				buf.len(),
				libc::MSG_NOSIGNAL,
			)
		};
		if n == -1 {
			Err(std::io::Error::last_os_error())
		} else {
			Ok(n as usize)
		}
	}

	fn close(&mut self) {
		self.conn.stop();
		unsafe { libc::shutdown(self.conn.raw(), libc::SHUT_WR) };
	}
}

impl Drop for TcpOutput {
	fn drop(&mut self) {
		self.conn.stop();
	}
}

/// Drives readiness for one connection until it closes or the observer goes
/// away.
fn poll_loop(conn: Arc<Conn>, events: EventSink, ack_rx: Receiver<()>) {
	if !await_connect(&conn, &events) {
		return;
	}
	tracing::debug!("connection established");
	if !events.emit(Direction::Input, StreamEvent::OpenCompleted)
		|| !events.emit(Direction::Output, StreamEvent::OpenCompleted)
	{
		return;
	}
	// writability is reported once and never withdrawn; short writes are the
	// worker's problem
	if !events.emit(Direction::Output, StreamEvent::SpaceAvailable) {
		return;
	}

	loop {
		if conn.stopped() {
			return;
		}
		let revents = match poll_once(conn.raw(), libc::POLLIN) {
			Ok(r) => r,
			Err(e) => {
				tracing::debug!(errno = e, "poll failed");
				let _ = events.emit(Direction::Input, StreamEvent::ErrorOccurred);
				return;
			}
		};
		if revents == 0 {
			continue;
		}
		if revents & libc::POLLNVAL != 0 {
			return;
		}
		if revents & libc::POLLIN != 0 {
			if !events.emit(Direction::Input, StreamEvent::BytesAvailable) {
				return;
			}
			// level-triggered poll: wait for the read before reporting again
			loop {
				match ack_rx.recv_timeout(READ_ACK_WAIT) {
					Ok(()) => break,
					Err(RecvTimeoutError::Timeout) => {
						if conn.stopped() {
							return;
						}
					}
					Err(RecvTimeoutError::Disconnected) => return,
				}
			}
			continue;
		}
		if revents & libc::POLLERR != 0 {
			let _ = events.emit(Direction::Input, StreamEvent::ErrorOccurred);
			return;
		}
		if revents & libc::POLLHUP != 0 {
			let _ = events.emit(Direction::Input, StreamEvent::EndEncountered);
			return;
		}
	}
}

/// Waits for the non-blocking connect to settle.
///
/// Returns `true` on an established connection. On failure the error is
/// reported to both directions and the poller stops.
fn await_connect(conn: &Conn, events: &EventSink) -> bool {
	loop {
		if conn.stopped() {
			return false;
		}
		let revents = match poll_once(conn.raw(), libc::POLLOUT) {
			Ok(r) => r,
			Err(e) => {
				tracing::debug!(errno = e, "poll failed while connecting");
				report_failure(events);
				return false;
			}
		};
		if revents == 0 {
			continue;
		}
		if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
			tracing::debug!(errno = take_error(conn.raw()).unwrap_or(0), "connect failed");
			report_failure(events);
			return false;
		}
		if revents & libc::POLLOUT != 0 {
			return match take_error(conn.raw()) {
				None => true,
				Some(e) => {
					tracing::debug!(errno = e, "connect failed");
					report_failure(events);
					false
				}
			};
		}
	}
}

fn report_failure(events: &EventSink) {
	let _ = events.emit(Direction::Input, StreamEvent::ErrorOccurred);
	let _ = events.emit(Direction::Output, StreamEvent::ErrorOccurred);
}

/// One `poll(2)` round on a single descriptor.
///
/// `Ok(0)` means the tick elapsed (or EINTR) with nothing to report.
fn poll_once(fd: libc::c_int, interest: libc::c_short) -> Result<libc::c_short, i32> {
	let mut pfd = libc::pollfd {
		fd,
		events: interest,
		revents: 0,
	};
	let n = unsafe { libc::poll(&mut pfd, 1, POLL_TICK_MS) };
	if n == -1 {
		let e = errno();
		if e == libc::EINTR {
			return Ok(0);
		}
		return Err(e);
	}
	if n == 0 {
		return Ok(0);
	}
	Ok(pfd.revents)
}

/// Reads and clears the pending socket error status.
///
/// Returns `None` if no error (connect succeeded). Reading clears the error,
/// so call once, after poll signals writability.
fn take_error(fd: libc::c_int) -> Option<i32> {
	let mut error: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			fd,
			libc::SOL_SOCKET,
			libc::SO_ERROR,
			&mut error as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		return Some(errno());
	}
	if error == 0 { None } else { Some(error) }
}

fn set_nonblocking(fd: libc::c_int) -> std::io::Result<()> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
	if flags == -1 {
		return Err(std::io::Error::last_os_error());
	}
	let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
	if result == -1 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(())
}

/// Calls the provided closure with a pointer to the raw sockaddr and its size.
fn with_sockaddr<F, R>(addr: &SocketAddr, f: F) -> R
where
	F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
{
	match addr {
		SocketAddr::V4(v4) => {
			let raw = libc::sockaddr_in {
				sin_family: libc::AF_INET as libc::sa_family_t,
				sin_port: v4.port().to_be(),
				sin_addr: libc::in_addr {
					// octets are already network order
					s_addr: u32::from_ne_bytes(v4.ip().octets()),
				},
				sin_zero: [0; 8],
			};
			f(
				&raw as *const _ as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
			)
		}
		SocketAddr::V6(v6) => {
			let raw = libc::sockaddr_in6 {
				sin6_family: libc::AF_INET6 as libc::sa_family_t,
				sin6_port: v6.port().to_be(),
				sin6_flowinfo: v6.flowinfo(),
				sin6_addr: libc::in6_addr {
					s6_addr: v6.ip().octets(),
				},
				sin6_scope_id: v6.scope_id(),
			};
			f(
				&raw as *const _ as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
			)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::with_sockaddr;

	#[test]
	fn sockaddr_v4_layout() {
		let addr = "127.0.0.1:9000".parse().unwrap();
		with_sockaddr(&addr, |ptr, len| {
			assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in>());
			let raw = unsafe { &*(ptr as *const libc::sockaddr_in) };
			assert_eq!(raw.sin_family, libc::AF_INET as libc::sa_family_t);
			assert_eq!(u16::from_be(raw.sin_port), 9000);
			assert_eq!(raw.sin_addr.s_addr.to_ne_bytes(), [127, 0, 0, 1]);
		});
	}

	#[test]
	fn sockaddr_v6_layout() {
		let addr = "[::1]:443".parse().unwrap();
		with_sockaddr(&addr, |ptr, len| {
			assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in6>());
			let raw = unsafe { &*(ptr as *const libc::sockaddr_in6) };
			assert_eq!(raw.sin6_family, libc::AF_INET6 as libc::sa_family_t);
			assert_eq!(u16::from_be(raw.sin6_port), 443);
		});
	}
}
