//! The transport capability a socket consumes.
//!
//! A transport produces a pair of directional stream handles bound to a
//! destination and reports readiness through the `EventSink` registered at
//! open time. The socket never touches file descriptors, DNS, or the
//! handshake itself; those live behind these traits.

mod tcp;

pub use self::tcp::{TcpInput, TcpOutput, TcpTransport};

use crate::event::EventSink;

/// Inbound half of a stream pair.
pub trait InputStream: Send + 'static {
    /// Begins the stream. Readiness events start flowing after this call.
    fn open(&mut self);

    /// Reads available bytes into `buf`, returning the count actually read.
    ///
    /// `Ok(0)` means end of stream. A `WouldBlock` error means the readiness
    /// report has already been consumed and nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Closes this half. Further reads are undefined; events stop.
    fn close(&mut self);
}

/// Outbound half of a stream pair.
pub trait OutputStream: Send + 'static {
    fn open(&mut self);

    /// Submits bytes, returning how many the transport accepted.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    fn close(&mut self);
}

/// Produces connected stream pairs.
pub trait Transport {
    type Input: InputStream;
    type Output: OutputStream;

    /// Requests a stream pair bound to `address:port`.
    ///
    /// `events` becomes the sole observer for both handles. Returns `None`
    /// when a pair could not be produced (resolution failure, refused connect
    /// at this layer); causes are not distinguished.
    fn open_pair(
        &self,
        address: &str,
        port: u16,
        events: EventSink,
    ) -> Option<(Self::Input, Self::Output)>;
}
