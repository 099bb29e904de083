//! Frame transport with header framing and stream addressing.
//!
//! Every frame names the virtual stream it belongs to:
//! ```text
//! Content-Length: <length>\r\n
//! Stream-Id: <stream>\r\n
//! \r\n
//! <payload>
//! ```

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use crate::error::TransportError;
use crate::stream::StreamId;

const CONTENT_LENGTH_HEADER: &str = "Content-Length: ";
const STREAM_ID_HEADER: &str = "Stream-Id: ";

/// Largest payload accepted in a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One payload addressed to a virtual stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream the payload belongs to.
    pub stream: StreamId,
    /// Raw message bytes.
    pub payload: Vec<u8>,
}

/// Reads framed messages from a byte source.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte source.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads the next frame, blocking until it is complete.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` when the source ends between frames,
    /// header errors for malformed frames, and `TransportError::Io` when the
    /// source fails or ends mid-frame.
    pub fn read_frame(&mut self) -> Result<Frame, TransportError> {
        let (length, stream) = self.read_headers()?;
        if length > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                length,
                limit: MAX_FRAME_LEN,
            });
        }
        let mut payload = vec![0u8; length];
        self.reader.read_exact(&mut payload)?;
        Ok(Frame { stream, payload })
    }

    fn read_headers(&mut self) -> Result<(usize, StreamId), TransportError> {
        let mut content_length: Option<usize> = None;
        let mut stream: Option<StreamId> = None;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;
            if bytes_read == 0 {
                return Err(TransportError::Closed);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix(CONTENT_LENGTH_HEADER) {
                content_length = Some(parse_header(trimmed, value)?);
            } else if let Some(value) = trimmed.strip_prefix(STREAM_ID_HEADER) {
                stream = Some(StreamId::new(parse_header(trimmed, value)?));
            }
            // Unknown headers are ignored.
        }

        let length = content_length.ok_or(TransportError::MissingContentLength)?;
        let id = stream.ok_or(TransportError::MissingStreamId)?;
        Ok((length, id))
    }
}

fn parse_header<T: std::str::FromStr>(line: &str, value: &str) -> Result<T, TransportError> {
    value
        .trim()
        .parse()
        .map_err(|_| TransportError::InvalidHeader {
            line: line.to_owned(),
        })
}

/// Writes framed messages to a byte sink.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte sink.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes one frame and flushes it.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the sink rejects the write.
    pub fn write_frame(&mut self, stream: StreamId, payload: &[u8]) -> Result<(), TransportError> {
        let header = format!(
            "{CONTENT_LENGTH_HEADER}{}\r\n{STREAM_ID_HEADER}{stream}\r\n\r\n",
            payload.len()
        );
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    fn reader(input: &[u8]) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(input.to_vec()))
    }

    #[rstest]
    fn writes_framed_message() {
        let mut buffer = Vec::new();
        FrameWriter::new(&mut buffer)
            .write_frame(StreamId::new(4), b"test payload")
            .expect("write failed");

        let written = String::from_utf8(buffer).expect("invalid utf8");
        assert_eq!(written, "Content-Length: 12\r\nStream-Id: 4\r\n\r\ntest payload");
    }

    #[rstest]
    fn reads_framed_message() {
        let mut frames = reader(b"Content-Length: 5\r\nStream-Id: 1\r\n\r\nhello");

        let frame = frames.read_frame().expect("read failed");

        assert_eq!(frame.stream, StreamId::HOOKS);
        assert_eq!(frame.payload, b"hello");
    }

    #[rstest]
    fn reads_consecutive_frames() {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write_frame(StreamId::new(2), b"one").expect("write failed");
            writer.write_frame(StreamId::new(3), b"two").expect("write failed");
        }
        let mut frames = reader(&buffer);

        let first = frames.read_frame().expect("first frame");
        let second = frames.read_frame().expect("second frame");

        assert_eq!((first.stream.get(), first.payload.as_slice()), (2, &b"one"[..]));
        assert_eq!((second.stream.get(), second.payload.as_slice()), (3, &b"two"[..]));
        assert!(matches!(frames.read_frame(), Err(TransportError::Closed)));
    }

    #[rstest]
    fn ignores_unknown_headers() {
        let mut frames =
            reader(b"Content-Length: 4\r\nContent-Type: application/json\r\nStream-Id: 0\r\n\r\ntest");

        let frame = frames.read_frame().expect("read failed");

        assert_eq!(frame.stream, StreamId::CONTROL);
        assert_eq!(frame.payload, b"test");
    }

    #[rstest]
    #[case::missing_length(b"Stream-Id: 1\r\n\r\ntest".as_slice())]
    #[case::missing_stream(b"Content-Length: 4\r\n\r\ntest".as_slice())]
    #[case::invalid_length(b"Content-Length: many\r\nStream-Id: 1\r\n\r\ntest".as_slice())]
    #[case::invalid_stream(b"Content-Length: 4\r\nStream-Id: -1\r\n\r\ntest".as_slice())]
    fn rejects_malformed_headers(#[case] input: &[u8]) {
        let result = reader(input).read_frame();

        assert!(
            matches!(
                result,
                Err(TransportError::MissingContentLength
                    | TransportError::MissingStreamId
                    | TransportError::InvalidHeader { .. })
            ),
            "unexpected result: {result:?}"
        );
    }

    #[rstest]
    fn reports_closed_on_eof_during_headers() {
        let result = reader(b"Content-Length: 10").read_frame();

        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[rstest]
    fn reports_io_error_on_truncated_payload() {
        let result = reader(b"Content-Length: 10\r\nStream-Id: 1\r\n\r\nshort").read_frame();

        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[rstest]
    fn rejects_oversized_frames() {
        let header = format!("Content-Length: {}\r\nStream-Id: 1\r\n\r\n", MAX_FRAME_LEN + 1);
        let result = reader(header.as_bytes()).read_frame();

        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }
}
