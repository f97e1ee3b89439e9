/// Socket operation errors.
///
/// All four are synchronous, caller-visible failures returned from the call
/// that triggered them; none are retried internally. Connection loss detected
/// through a readiness event is never surfaced here — it only flips the
/// socket's state (check `Socket::is_connected`).
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("connection to {address}:{port} failed")]
    ConnectionFailed { address: String, port: u16 },

    #[error("socket is not connected")]
    NotConnected,

    #[error("socket is not writable")]
    NotWritable,

    /// Text could not be represented as UTF-8 bytes.
    ///
    /// Unreachable for `&str` input, which is UTF-8 by construction, but kept
    /// as a distinct outcome of the text write path.
    #[error("text could not be encoded as UTF-8 bytes")]
    DataEncodingFailed,
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let kind = match &err {
            SocketError::ConnectionFailed { .. } => std::io::ErrorKind::ConnectionRefused,
            SocketError::NotConnected => std::io::ErrorKind::NotConnected,
            SocketError::NotWritable => std::io::ErrorKind::WouldBlock,
            SocketError::DataEncodingFailed => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}
