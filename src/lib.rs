//! Minimal client-side stream sockets.
//!
//! `Socket` connects to a host:port, tracks connection and writability state
//! from the transport's readiness events, and pushes received bytes or text
//! to a registered handler. The transport itself sits behind the traits in
//! [`transport`]; a `poll(2)`-based TCP transport is bundled.

pub mod socket;
pub mod transport;
mod error;
mod event;

pub use self::error::{SocketError, errno};
pub use self::event::{Direction, EventSink, StreamEvent};
pub use self::socket::{RECV_BUFFER_LEN, Socket};
pub use self::transport::{InputStream, OutputStream, TcpTransport, Transport};
