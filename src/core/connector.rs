// src/core/connector.rs
//
// Wire framing: messages are terminated by a blank line. A whole frame
// is read before it's handed to the dispatcher, and a response is
// written with the same terminator appended.

use std::io::{self, BufRead, BufReader, Read, Write};

/// Abstracts the transport so the dispatcher can be tested against an
/// in-memory buffer instead of a real socket.
pub trait Connector {
    fn read_message(&mut self) -> io::Result<String>;
    fn write_message(&mut self, msg: &str) -> io::Result<()>;

    /// Writes a `TSI_OK` status line followed by an optional body.
    fn ok(&mut self, body: &str) -> io::Result<()> {
        self.write_message("TSI_OK")?;
        if !body.is_empty() {
            self.write_message(body)?;
        }
        Ok(())
    }

    /// Writes a `TSI_FAILED <reason>` status line.
    fn failed(&mut self, reason: &str) -> io::Result<()> {
        self.write_message(&format!("TSI_FAILED {reason}"))
    }
}

/// A `Connector` over a split reader/writer pair, such as a `TcpStream`
/// and its `try_clone()`.
pub struct StreamConnector<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: Read, W: Write> StreamConnector<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl<R: Read, W: Write> Connector for StreamConnector<R, W> {
    fn read_message(&mut self) -> io::Result<String> {
        let mut message = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                if message.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
                }
                break;
            }
            if line == "\n" || line == "\r\n" {
                break;
            }
            message.push_str(&line);
        }
        Ok(message)
    }

    fn write_message(&mut self, msg: &str) -> io::Result<()> {
        self.writer.write_all(msg.as_bytes())?;
        if !msg.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_message_up_to_blank_line() {
        let input = Cursor::new(b"#TSI_PING\nsecond line\n\nleftover\n".to_vec());
        let mut conn = StreamConnector::new(input, Vec::new());
        let msg = conn.read_message().unwrap();
        assert_eq!(msg, "#TSI_PING\nsecond line\n");
    }

    #[test]
    fn read_message_on_empty_stream_is_eof() {
        let input = Cursor::new(Vec::new());
        let mut conn = StreamConnector::new(input, Vec::new());
        let err = conn.read_message().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_message_appends_blank_line_terminator() {
        let input = Cursor::new(Vec::new());
        let mut conn = StreamConnector::new(input, Vec::new());
        conn.write_message("hello").unwrap();
        assert_eq!(conn.writer, b"hello\n\n");
    }

    #[test]
    fn ok_and_failed_write_status_lines() {
        let input = Cursor::new(Vec::new());
        let mut conn = StreamConnector::new(input, Vec::new());
        conn.ok("body text").unwrap();
        assert_eq!(conn.writer, b"TSI_OK\n\nbody text\n\n");

        let mut conn2 = StreamConnector::new(Cursor::new(Vec::new()), Vec::new());
        conn2.failed("no such file").unwrap();
        assert_eq!(conn2.writer, b"TSI_FAILED no such file\n\n");
    }
}
