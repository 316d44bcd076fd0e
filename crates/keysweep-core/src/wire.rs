//! Text framing for the coordinator/worker protocol.
//!
//! Every message is a single frame:
//!
//! ```text
//! TAG:arg1,arg2,...;
//! ```
//!
//! `TAG` is one of five fixed-width command names, the argument list may be
//! empty, and `;` terminates the frame. There is no length prefix: frame
//! boundaries are found by scanning for the terminator, so argument values must
//! never contain `:`, `,` or `;`. The encoder does not check this; callers only
//! ever send decimal integers and hex digests.
//!
//! [`MessageCodec`] implements the `tokio-util` codec traits so a connection
//! can be wrapped in a [`FramedRead`] / [`FramedWrite`] pair. Reads are
//! buffered and the codec remembers how far it already scanned, so a frame that
//! trickles in byte by byte is only scanned once.

use crate::{Error, FramingError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use core::fmt;
use core::str::FromStr;
use futures::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Width of every command tag in bytes.
pub const TAG_LEN: usize = 5;
/// Separates the tag from the argument list.
pub const SEPARATOR: u8 = b':';
/// Separates arguments from each other.
pub const ARG_DELIMITER: u8 = b',';
/// Terminates a frame.
pub const TERMINATOR: u8 = b';';
/// Upper bound on a frame, terminator included.
pub const MAX_FRAME_LEN: usize = 4096;
/// Largest capacity a participant may advertise in `CORES`.
pub const MAX_CAPACITY: usize = 1 << 16;

/// The five commands understood by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// worker -> coordinator: `[capacity]`
    Cores,
    /// coordinator -> worker: `[start, end]`, end exclusive
    Range,
    /// coordinator -> worker: `[target]`
    Start,
    /// worker -> coordinator: `[value]`
    Found,
    /// either direction: `[]`
    Ended,
}

impl Command {
    pub const ALL: [Self; 5] = [
        Self::Cores,
        Self::Range,
        Self::Start,
        Self::Found,
        Self::Ended,
    ];

    /// The fixed-width wire tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Cores => "CORES",
            Self::Range => "RANGE",
            Self::Start => "START",
            Self::Found => "FOUND",
            Self::Ended => "ENDED",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.tag().as_bytes() == tag)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A decoded frame: a command and its ordered string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(command: Command, args: Vec<String>) -> Self {
        Self { command, args }
    }

    pub fn cores(capacity: usize) -> Self {
        Self::new(Command::Cores, vec![capacity.to_string()])
    }

    pub fn range(start: u64, end: u64) -> Self {
        Self::new(Command::Range, vec![start.to_string(), end.to_string()])
    }

    pub fn start(target: &str) -> Self {
        Self::new(Command::Start, vec![target.to_owned()])
    }

    pub fn found(value: u64) -> Self {
        Self::new(Command::Found, vec![value.to_string()])
    }

    pub fn ended() -> Self {
        Self::new(Command::Ended, Vec::new())
    }

    /// Fails with [`Error::ProtocolSequence`] unless this is a `command`
    /// message.
    pub fn expect(self, command: Command) -> Result<Self> {
        if self.command == command {
            Ok(self)
        } else {
            Err(Error::ProtocolSequence {
                expected: command.tag(),
                received: self.command,
            })
        }
    }

    /// Capacity advertised by a `CORES` message. Must be positive.
    pub fn capacity(&self) -> Result<usize> {
        self.require_args(1)?;
        let capacity: usize = self.parse_arg(0, "capacity")?;
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(Error::InvalidArgument {
                reason: format!("capacity must be in 1..={MAX_CAPACITY}, got {capacity}"),
            });
        }
        Ok(capacity)
    }

    /// Bounds carried by a `RANGE` message.
    pub fn bounds(&self) -> Result<(u64, u64)> {
        self.require_args(2)?;
        let start = self.parse_arg(0, "range start")?;
        let end = self.parse_arg(1, "range end")?;
        if start > end {
            return Err(Error::InvalidArgument {
                reason: format!("range start {start} is past range end {end}"),
            });
        }
        Ok((start, end))
    }

    /// Target digest carried by a `START` message.
    pub fn target(&self) -> Result<&str> {
        self.require_args(1)?;
        Ok(&self.args[0])
    }

    /// Candidate carried by a `FOUND` message.
    pub fn value(&self) -> Result<u64> {
        self.require_args(1)?;
        self.parse_arg(0, "found value")
    }

    fn require_args(&self, count: usize) -> Result<()> {
        if self.args.len() == count {
            Ok(())
        } else {
            Err(Error::InvalidArgument {
                reason: format!(
                    "{} takes {count} argument(s), got {}",
                    self.command,
                    self.args.len()
                ),
            })
        }
    }

    fn parse_arg<T: FromStr>(&self, index: usize, name: &str) -> Result<T> {
        let raw = &self.args[index];
        raw.parse().map_err(|_| Error::InvalidArgument {
            reason: format!("{name} {raw:?} is not a valid number"),
        })
    }
}

/// Serializes a command and its arguments into a single frame.
pub fn encode<S: AsRef<str>>(command: Command, args: &[S]) -> Bytes {
    let mut dst = BytesMut::new();
    encode_into(command, args, &mut dst);
    dst.freeze()
}

fn encode_into<S: AsRef<str>>(command: Command, args: &[S], dst: &mut BytesMut) {
    let args_len: usize = args.iter().map(|arg| arg.as_ref().len() + 1).sum();
    dst.reserve(TAG_LEN + 2 + args_len);

    dst.put_slice(command.tag().as_bytes());
    dst.put_u8(SEPARATOR);
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            dst.put_u8(ARG_DELIMITER);
        }
        dst.put_slice(arg.as_ref().as_bytes());
    }
    dst.put_u8(TERMINATOR);
}

fn parse_frame(frame: &[u8]) -> Result<Message> {
    let tag = &frame[..frame.len().min(TAG_LEN)];
    let command = Command::from_tag(tag)
        .ok_or_else(|| FramingError::UnknownCommand(String::from_utf8_lossy(tag).into_owned()))?;

    if frame.get(TAG_LEN) != Some(&SEPARATOR) {
        return Err(FramingError::MissingSeparator.into());
    }

    let body = core::str::from_utf8(&frame[TAG_LEN + 1..]).map_err(|_| FramingError::InvalidUtf8)?;
    let args = if body.is_empty() {
        Vec::new()
    } else {
        body.split(ARG_DELIMITER as char).map(str::to_owned).collect()
    };

    Ok(Message { command, args })
}

/// Delimiter-scanning codec for [`Message`] frames.
#[derive(Debug, Default)]
pub struct MessageCodec {
    // Offset into the read buffer already known to hold no terminator.
    next_index: usize,
}

impl MessageCodec {
    pub const fn new() -> Self {
        Self { next_index: 0 }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let found = src[self.next_index..]
            .iter()
            .position(|byte| *byte == TERMINATOR);

        match found {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                if end + 1 > MAX_FRAME_LEN {
                    return Err(FramingError::TooLong(MAX_FRAME_LEN).into());
                }
                let frame = src.split_to(end + 1);
                parse_frame(&frame[..end]).map(Some)
            }
            None if src.len() >= MAX_FRAME_LEN => {
                Err(FramingError::TooLong(MAX_FRAME_LEN).into())
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FramingError::Truncated(src.len()).into()),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        encode_into(item.command, &item.args, dst);
        Ok(())
    }
}

pub type MessageReader<R = OwnedReadHalf> = FramedRead<R, MessageCodec>;
pub type MessageWriter<W = OwnedWriteHalf> = FramedWrite<W, MessageCodec>;

/// Splits a connection into an independently owned framed reader and writer.
pub fn framed(stream: TcpStream) -> (MessageReader, MessageWriter) {
    let (read, write) = stream.into_split();
    (
        FramedRead::new(read, MessageCodec::new()),
        FramedWrite::new(write, MessageCodec::new()),
    )
}

/// Waits for the next complete frame.
///
/// A cleanly closed stream is reported as [`Error::ConnectionClosed`] with
/// `context` describing what the caller was waiting for.
pub async fn recv<S>(stream: &mut S, context: &str) -> Result<Message>
where
    S: Stream<Item = Result<Message>> + Unpin,
{
    match stream.next().await {
        Some(frame) => frame,
        None => Err(Error::ConnectionClosed {
            context: context.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Message>> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        loop {
            match codec.decode_eof(&mut buf) {
                Ok(Some(message)) => out.push(Ok(message)),
                Ok(None) => break,
                Err(e) => {
                    out.push(Err(e));
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn encodes_exact_wire_format() {
        assert_eq!(&encode(Command::Range, &["0", "10"])[..], b"RANGE:0,10;");
        assert_eq!(&encode::<&str>(Command::Ended, &[])[..], b"ENDED:;");
        assert_eq!(
            &encode(Command::Start, &["19bc916108fc6938f52cb96f7e087941"])[..],
            b"START:19bc916108fc6938f52cb96f7e087941;"
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let cases = [
            Message::cores(8),
            Message::range(100_000, 200_000),
            Message::start("e10adc3949ba59abbe56e057f20f883e"),
            Message::found(712),
            Message::ended(),
            Message::new(Command::Range, vec!["a b".into(), "".into(), "c".into()]),
        ];

        for message in cases {
            let bytes = encode(message.command, &message.args);
            let decoded = decode_all(&bytes);
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded.into_iter().next().unwrap().unwrap(), message);
        }
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let decoded: Vec<_> = decode_all(b"CORES:4;RANGE:0,40;START:abc;")
            .into_iter()
            .map(|m| m.unwrap().command)
            .collect();
        assert_eq!(decoded, vec![Command::Cores, Command::Range, Command::Start]);
    }

    #[test]
    fn waits_for_terminator_across_reads() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        for chunk in [&b"FOU"[..], b"ND:7", b"12"] {
            buf.extend_from_slice(chunk);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }

        buf.extend_from_slice(b";ENDED:");
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message, Message::found(712));
        assert_eq!(&buf[..], b"ENDED:");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_command() {
        let err = decode_all(b"HELLO:1;").pop().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Framing(FramingError::UnknownCommand(tag)) if tag == "HELLO"
        ));

        let err = decode_all(b"END;").pop().unwrap().unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::UnknownCommand(_))));
    }

    #[test]
    fn rejects_missing_separator() {
        let err = decode_all(b"ENDED;").pop().unwrap().unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::MissingSeparator)));
    }

    #[test]
    fn rejects_stream_closed_mid_frame() {
        let decoded = decode_all(b"CORES:4;RANGE:0,");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_ref().unwrap(), &Message::cores(4));
        assert!(matches!(
            decoded[1],
            Err(Error::Framing(FramingError::Truncated(8)))
        ));
    }

    #[test]
    fn rejects_frames_without_terminator_past_limit() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&b"START:"[..]);
        buf.extend_from_slice(&vec![b'a'; MAX_FRAME_LEN]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Framing(FramingError::TooLong(MAX_FRAME_LEN)))
        ));
    }

    #[test]
    fn typed_accessors_validate_arguments() {
        assert_eq!(Message::cores(3).capacity().unwrap(), 3);
        assert_eq!(Message::range(10, 30).bounds().unwrap(), (10, 30));
        assert_eq!(Message::found(42).value().unwrap(), 42);

        let zero = Message::new(Command::Cores, vec!["0".into()]);
        assert!(matches!(zero.capacity(), Err(Error::InvalidArgument { .. })));
        assert_eq!(Message::cores(MAX_CAPACITY).capacity().unwrap(), MAX_CAPACITY);
        assert!(matches!(
            Message::cores(MAX_CAPACITY + 1).capacity(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            Message::cores(usize::MAX).capacity(),
            Err(Error::InvalidArgument { .. })
        ));

        let inverted = Message::new(Command::Range, vec!["9".into(), "3".into()]);
        assert!(matches!(inverted.bounds(), Err(Error::InvalidArgument { .. })));

        let garbage = Message::new(Command::Found, vec!["12x".into()]);
        assert!(matches!(garbage.value(), Err(Error::InvalidArgument { .. })));

        assert!(matches!(
            Message::ended().target(),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn rejects_non_utf8_arguments() {
        let decoded = decode_all(b"START:\xff\xfe;");
        assert!(matches!(
            decoded.as_slice(),
            [Err(Error::Framing(FramingError::InvalidUtf8))]
        ));
    }

    #[test]
    fn expect_reports_sequence_errors() {
        let err = Message::ended().expect(Command::Range).unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolSequence {
                expected: "RANGE",
                received: Command::Ended
            }
        ));
    }

    #[tokio::test]
    async fn framed_pair_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, MessageCodec::new());
        let mut reader = FramedRead::new(server, MessageCodec::new());

        writer.send(Message::cores(2)).await.unwrap();
        writer.send(Message::ended()).await.unwrap();
        drop(writer);

        assert_eq!(recv(&mut reader, "cores").await.unwrap(), Message::cores(2));
        assert_eq!(recv(&mut reader, "ended").await.unwrap(), Message::ended());
        let err = recv(&mut reader, "anything").await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
