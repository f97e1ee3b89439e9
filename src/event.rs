use crossbeam_channel::{Receiver, Sender, bounded};

/// Capacity of the readiness-event queue between a transport and a socket.
const EVENT_QUEUE_DEPTH: usize = 32;

/// Which direction of the stream pair an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Readiness notification from the transport.
///
/// Events for a single stream arrive in the order the transport reports them;
/// there is no ordering between the input stream's and the output stream's
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream finished opening; the connection is established.
    OpenCompleted,
    /// The input stream has bytes ready to read.
    BytesAvailable,
    /// The output stream has buffer space; writes may be submitted.
    SpaceAvailable,
    /// The peer closed the stream.
    EndEncountered,
    /// The stream failed.
    ErrorOccurred,
}

/// The single registered observer for a stream pair.
///
/// A transport receives one of these at `open_pair` time and delivers every
/// readiness event through it. Cloning is cheap; all clones feed the same
/// socket.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<(Direction, StreamEvent)>,
}

impl EventSink {
    pub(crate) fn channel() -> (EventSink, Receiver<(Direction, StreamEvent)>) {
        let (tx, rx) = bounded(EVENT_QUEUE_DEPTH);
        (EventSink { tx }, rx)
    }

    /// Delivers one readiness event.
    ///
    /// Blocks while the queue is full. Returns `false` once the observing
    /// socket is gone, at which point the transport should stop reporting.
    pub fn emit(&self, direction: Direction, event: StreamEvent) -> bool {
        self.tx.send((direction, event)).is_ok()
    }
}
