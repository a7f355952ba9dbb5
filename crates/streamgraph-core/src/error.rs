//! Errors reported by graph operations.

use crate::port::PortId;
use crate::stream::StreamId;

/// Errors returned by [`GraphCore`](crate::GraphCore) operations and the
/// handles layered on top of it.
///
/// Invariant violations are not represented here; they abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// No live stream has this id.
    UnknownStream(StreamId),
    /// No live port has this id.
    UnknownPort(PortId),
    /// The operation does not apply to this kind of stream.
    WrongKind {
        /// Target stream.
        stream: StreamId,
        /// What the operation needed.
        expected: &'static str,
    },
    /// The graph thread has stopped.
    ShutDown,
}

impl core::fmt::Display for GraphError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownStream(id) => write!(f, "stream {id} not found"),
            Self::UnknownPort(id) => write!(f, "port {id} not found"),
            Self::WrongKind { stream, expected } => {
                write!(f, "stream {stream} is not a {expected} stream")
            }
            Self::ShutDown => write!(f, "graph has shut down"),
        }
    }
}

impl std::error::Error for GraphError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            GraphError::UnknownStream(StreamId::from_index(3)).to_string(),
            "stream StreamId(3) not found"
        );
        let wrong = GraphError::WrongKind {
            stream: StreamId::from_index(1),
            expected: "source",
        };
        assert_eq!(wrong.to_string(), "stream StreamId(1) is not a source stream");
    }
}
