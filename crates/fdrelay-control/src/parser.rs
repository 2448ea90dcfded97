use std::os::fd::AsRawFd;

use bytes::Bytes;
use fdrelay_transport::{Envelope, TransferredDescriptor};
use tracing::{debug, trace};

use crate::error::Result;
use crate::message::ControlMessage;
use crate::name::ChannelName;

/// Literal that shuts the relay down.
pub const SHUTDOWN_KEYWORD: &str = "exit";

/// Configuration for the control parser.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Text that produces [`ControlMessage::Terminate`]. Default: `"exit"`.
    pub shutdown_keyword: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            shutdown_keyword: SHUTDOWN_KEYWORD.to_string(),
        }
    }
}

/// Classifies control frames. Holds no channel state and no descriptors.
#[derive(Debug, Clone, Default)]
pub struct ControlParser {
    config: ParserConfig,
}

impl ControlParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Classify a single frame.
    ///
    /// A trailing `\n` or `\r\n` is not part of a command. The shutdown
    /// keyword wins over everything else (an attached descriptor is closed);
    /// otherwise a frame with a descriptor is a handoff whose payload is kept
    /// byte for byte, and a frame without one is a name announcement.
    pub fn parse(
        &self,
        payload: Bytes,
        descriptor: Option<TransferredDescriptor>,
    ) -> Result<ControlMessage> {
        let command = strip_line_ending(&payload);

        if command.as_ref() == self.config.shutdown_keyword.as_bytes() {
            if let Some(descriptor) = descriptor {
                debug!(
                    fd = descriptor.as_raw_fd(),
                    "closing descriptor attached to shutdown command"
                );
            }
            return Ok(ControlMessage::Terminate);
        }

        match descriptor {
            Some(descriptor) => Ok(ControlMessage::RawPayload {
                payload,
                descriptor,
            }),
            None => {
                let text = std::str::from_utf8(&command)?;
                Ok(ControlMessage::NameAnnouncement(ChannelName::new(text)))
            }
        }
    }

    /// Split one received envelope into frames, in order.
    ///
    /// Stream sockets may coalesce several newline-terminated commands into a
    /// single receive. Each non-blank line of descriptor-less text is a frame.
    /// The payload that carried a descriptor is never split: it becomes the
    /// last frame, whole.
    pub fn decode(&self, envelope: Envelope) -> Frames<'_> {
        let Envelope {
            preamble,
            payload,
            descriptor,
        } = envelope;

        let mut lines = split_lines(&preamble);
        let handoff = match descriptor {
            Some(descriptor) => Some((payload, descriptor)),
            None => {
                lines.extend(split_lines(&payload));
                None
            }
        };
        if lines.is_empty() && handoff.is_none() {
            trace!("ignoring blank control message");
        }

        Frames {
            parser: self,
            lines: lines.into_iter(),
            handoff,
        }
    }
}

/// Lazily parsed frames of one envelope; see [`ControlParser::decode`].
///
/// Dropping the iterator early closes a descriptor that was not yet handed out.
pub struct Frames<'a> {
    parser: &'a ControlParser,
    lines: std::vec::IntoIter<Bytes>,
    handoff: Option<(Bytes, TransferredDescriptor)>,
}

impl Iterator for Frames<'_> {
    type Item = Result<ControlMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.lines.next() {
            return Some(self.parser.parse(line, None));
        }
        let (payload, descriptor) = self.handoff.take()?;
        Some(self.parser.parse(payload, Some(descriptor)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.lines.len() + usize::from(self.handoff.is_some());
        (len, Some(len))
    }
}

fn strip_line_ending(payload: &Bytes) -> Bytes {
    let mut end = payload.len();
    if payload[..end].ends_with(b"\n") {
        end -= 1;
        if payload[..end].ends_with(b"\r") {
            end -= 1;
        }
    }
    payload.slice(..end)
}

fn split_lines(payload: &Bytes) -> Vec<Bytes> {
    payload
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| payload.slice_ref(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    use super::*;
    use crate::error::ControlError;

    fn descriptor() -> (TransferredDescriptor, UnixStream) {
        let (local, remote) = UnixStream::pair().unwrap();
        (TransferredDescriptor::from(local), remote)
    }

    fn parse_text(text: &str) -> Result<ControlMessage> {
        ControlParser::new().parse(Bytes::copy_from_slice(text.as_bytes()), None)
    }

    #[test]
    fn bare_text_is_a_name_announcement() {
        match parse_text("parent").unwrap() {
            ControlMessage::NameAnnouncement(name) => assert_eq!(name.as_str(), "parent"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn line_endings_are_not_part_of_the_frame() {
        for text in ["parent\n", "parent\r\n"] {
            match parse_text(text).unwrap() {
                ControlMessage::NameAnnouncement(name) => assert_eq!(name.as_str(), "parent"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn exit_terminates() {
        assert!(matches!(parse_text("exit").unwrap(), ControlMessage::Terminate));
        assert!(matches!(parse_text("exit\n").unwrap(), ControlMessage::Terminate));
    }

    #[test]
    fn custom_shutdown_keyword() {
        let parser = ControlParser::with_config(ParserConfig {
            shutdown_keyword: "quit".to_string(),
        });
        let msg = parser.parse(Bytes::from_static(b"quit"), None).unwrap();
        assert!(matches!(msg, ControlMessage::Terminate));
        let msg = parser.parse(Bytes::from_static(b"exit"), None).unwrap();
        assert!(matches!(msg, ControlMessage::NameAnnouncement(_)));
    }

    #[test]
    fn descriptor_makes_a_handoff() {
        let (fd, _remote) = descriptor();
        let raw = fd.as_raw_fd();
        let msg = ControlParser::new()
            .parse(Bytes::from_static(b"hello"), Some(fd))
            .unwrap();
        match msg {
            ControlMessage::RawPayload {
                payload,
                descriptor,
            } => {
                assert_eq!(payload.as_ref(), b"hello");
                assert_eq!(descriptor.as_raw_fd(), raw);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exit_with_descriptor_closes_it() {
        let (fd, mut remote) = descriptor();
        let msg = ControlParser::new()
            .parse(Bytes::from_static(b"exit"), Some(fd))
            .unwrap();
        assert!(matches!(msg, ControlMessage::Terminate));

        let mut probe = [0u8; 1];
        assert_eq!(remote.read(&mut probe).unwrap(), 0);
    }

    #[test]
    fn invalid_utf8_announcement_is_an_error() {
        let err = ControlParser::new()
            .parse(Bytes::from_static(&[0xff, 0xfe]), None)
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidUtf8(_)));
    }

    #[test]
    fn unusual_text_is_still_a_name() {
        match parse_text("a\tb").unwrap() {
            ControlMessage::NameAnnouncement(name) => assert_eq!(name.as_str(), "a\tb"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn handoff_payload_may_be_binary() {
        let (fd, _remote) = descriptor();
        let msg = ControlParser::new()
            .parse(Bytes::from_static(&[0xff, 0x00]), Some(fd))
            .unwrap();
        assert!(matches!(msg, ControlMessage::RawPayload { .. }));
    }

    #[test]
    fn decode_splits_coalesced_lines_in_order() {
        let parser = ControlParser::new();
        let envelope = Envelope::new(Bytes::from_static(b"one\ntwo\r\n\nexit\n"), None);
        let kinds: Vec<_> = parser
            .decode(envelope)
            .map(|msg| msg.unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            ["name_announcement", "name_announcement", "terminate"]
        );
    }

    #[test]
    fn decode_reads_preamble_before_handoff() {
        let (fd, _remote) = descriptor();
        let parser = ControlParser::new();
        let envelope = Envelope::new(Bytes::from_static(b"hello"), Some(fd))
            .with_preamble(Bytes::from_static(b"parent\n"));
        let mut frames = parser.decode(envelope);
        assert_eq!(frames.size_hint(), (2, Some(2)));

        match frames.next().unwrap().unwrap() {
            ControlMessage::NameAnnouncement(name) => assert_eq!(name.as_str(), "parent"),
            other => panic!("unexpected {other:?}"),
        }
        match frames.next().unwrap().unwrap() {
            ControlMessage::RawPayload { payload, .. } => assert_eq!(payload.as_ref(), b"hello"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(frames.next().is_none());
    }

    #[test]
    fn handoff_payload_with_newlines_stays_whole() {
        let (fd, _remote) = descriptor();
        let parser = ControlParser::new();
        let envelope = Envelope::new(Bytes::from_static(b"line1\nexit\nline2\n"), Some(fd));
        let frames: Vec<_> = parser.decode(envelope).collect();

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Ok(ControlMessage::RawPayload { payload, .. }) => {
                assert_eq!(payload.as_ref(), b"line1\nexit\nline2\n");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_keeps_descriptor_on_blank_payload() {
        let (fd, _remote) = descriptor();
        let parser = ControlParser::new();
        let frames: Vec<_> = parser
            .decode(Envelope::new(Bytes::from_static(b"\n"), Some(fd)))
            .collect();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0].as_ref().unwrap(),
            ControlMessage::RawPayload { .. }
        ));
    }

    #[test]
    fn decode_ignores_blank_text() {
        let parser = ControlParser::new();
        assert_eq!(
            parser
                .decode(Envelope::new(Bytes::from_static(b"\r\n\n"), None))
                .count(),
            0
        );
    }

    #[test]
    fn dropping_frames_closes_untaken_descriptor() {
        let (fd, mut remote) = descriptor();
        let parser = ControlParser::new();
        let envelope = Envelope::new(Bytes::from_static(b"hello"), Some(fd))
            .with_preamble(Bytes::from_static(b"exit\n"));
        let mut frames = parser.decode(envelope);
        assert!(matches!(
            frames.next().unwrap().unwrap(),
            ControlMessage::Terminate
        ));
        drop(frames);

        let mut probe = [0u8; 1];
        assert_eq!(remote.read(&mut probe).unwrap(), 0);
    }
}
