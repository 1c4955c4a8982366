//! Length-delimited, bincode-encoded message channel between the parties.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::config::Config;
use crate::error::CommunicationError;
use crate::garble::{GarbledCircuit, OutputMapping, WireLabel};
use crate::ot::msgs::{OtOffer, OtRequest, OtResponse};
use crate::protocol::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub role: Role,
    pub version: u16,
    pub circuit_digest: [u8; 32],
}

/// Every message of the protocol, in the order they are first sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Hello(Hello),
    GarbledTables(GarbledCircuit),
    GarblerInputKeys(Vec<(u32, WireLabel)>),
    OtOffer(OtOffer),
    OtRequest(OtRequest),
    OtResponse(OtResponse),
    OutputMap(OutputMapping),
    Result(Vec<bool>),
    Abort(String),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "HELLO",
            Message::GarbledTables(_) => "GARBLED_TABLES",
            Message::GarblerInputKeys(_) => "GARBLER_INPUT_KEYS",
            Message::OtOffer(_) => "OT_OFFER",
            Message::OtRequest(_) => "OT_REQUEST",
            Message::OtResponse(_) => "OT_RESPONSE",
            Message::OutputMap(_) => "OUTPUT_MAP",
            Message::Result(_) => "RESULT",
            Message::Abort(_) => "ABORT",
        }
    }
}

/// A reliable, ordered message channel over any byte stream.
#[derive(Debug)]
pub struct Channel<S> {
    stream: Framed<S, LengthDelimitedCodec>,
    timeout: Duration,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: &Config) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(config.max_frame_len)
            .new_codec();
        Self {
            stream: Framed::new(stream, codec),
            timeout: config.io_timeout(),
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), CommunicationError> {
        let bytes = bincode::serialize(message)?;
        debug!(kind = message.kind(), len = bytes.len(), "sending message");

        tokio::time::timeout(self.timeout, self.stream.send(Bytes::from(bytes)))
            .await
            .map_err(|_| CommunicationError::Timeout(self.timeout))?
            .map_err(map_io)
    }

    /// Receives the next message. A peer's `ABORT` surfaces as an error.
    pub async fn recv(&mut self) -> Result<Message, CommunicationError> {
        let frame = tokio::time::timeout(self.timeout, self.stream.next())
            .await
            .map_err(|_| CommunicationError::Timeout(self.timeout))?
            .ok_or(CommunicationError::Closed)?
            .map_err(map_io)?;

        let message: Message = bincode::deserialize(&frame)
            .map_err(|e| CommunicationError::Malformed(e.to_string()))?;
        debug!(kind = message.kind(), len = frame.len(), "received message");

        match message {
            Message::Abort(reason) => Err(CommunicationError::PeerAborted(reason)),
            message => Ok(message),
        }
    }

    pub async fn close(&mut self) -> Result<(), CommunicationError> {
        SinkExt::<Bytes>::close(&mut self.stream).await.map_err(map_io)
    }
}

/// Receives the next message and extracts the expected variant.
///
/// Any other message is an [`Unexpected`](CommunicationError::Unexpected)
/// error naming both kinds.
macro_rules! expect_msg {
    ($channel:expr, $expected:path, $kind:literal) => {
        match $channel.recv().await? {
            $expected(msg) => Ok(msg),
            other => Err($crate::error::CommunicationError::Unexpected {
                expected: $kind,
                actual: other.kind(),
            }),
        }
    };
}

pub(crate) use expect_msg;

fn map_io(err: std::io::Error) -> CommunicationError {
    match err.kind() {
        // Raised by the codec for oversized or truncated frames.
        ErrorKind::InvalidData => CommunicationError::Malformed(err.to_string()),
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            CommunicationError::Closed
        }
        _ => CommunicationError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    type Duplex = Channel<tokio::io::DuplexStream>;

    fn pair(config: &Config) -> (Duplex, Duplex) {
        let (a, b) = tokio::io::duplex(1 << 16);
        (Channel::new(a, config), Channel::new(b, config))
    }

    #[tokio::test]
    async fn test_send_recv() {
        let config = Config::default();
        let (mut a, mut b) = pair(&config);

        let message = Message::Result(vec![true, false, true]);
        a.send(&message).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_peer_abort() {
        let (mut a, mut b) = pair(&Config::default());

        a.send(&Message::Abort("bad table".to_string())).await.unwrap();
        assert!(matches!(
            b.recv().await,
            Err(CommunicationError::PeerAborted(reason)) if reason == "bad table"
        ));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (a, mut b) = pair(&Config::default());
        drop(a);

        assert!(matches!(b.recv().await, Err(CommunicationError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let (mut raw, b) = tokio::io::duplex(1 << 10);
        let mut channel = Channel::new(b, &Config::default());

        // A well-formed frame whose payload is not a message.
        raw.write_all(&[0, 0, 0, 3, 0xff, 0xff, 0xff]).await.unwrap();
        assert!(matches!(
            channel.recv().await,
            Err(CommunicationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let config = Config {
            max_frame_len: 8,
            ..Config::default()
        };
        let (mut raw, b) = tokio::io::duplex(1 << 10);
        let mut channel = Channel::new(b, &config);

        raw.write_all(&[0, 0, 0, 64]).await.unwrap();
        raw.write_all(&[0; 64]).await.unwrap();
        assert!(matches!(
            channel.recv().await,
            Err(CommunicationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_expect_msg() -> Result<(), CommunicationError> {
        let (mut a, mut b) = pair(&Config::default());

        a.send(&Message::Result(vec![true])).await?;
        let bits = expect_msg!(b, Message::Result, "RESULT")?;
        assert_eq!(bits, vec![true]);

        a.send(&Message::Result(vec![false])).await?;
        let err = expect_msg!(b, Message::OutputMap, "OUTPUT_MAP").unwrap_err();
        assert!(matches!(
            err,
            CommunicationError::Unexpected {
                expected: "OUTPUT_MAP",
                actual: "RESULT"
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = Config {
            io_timeout_secs: 0,
            ..Config::default()
        };
        let (_a, mut b) = pair(&config);

        assert!(matches!(
            b.recv().await,
            Err(CommunicationError::Timeout(_))
        ));
    }
}
