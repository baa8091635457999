//! Framed I/O for the IMAP protocol.
//!
//! Responses are CRLF-terminated lines, except that a line ending in a
//! synchronizing literal marker `{N}\r\n` promises exactly N more raw bytes
//! before the response resumes with further lines. [`FramedStream::read_packet`]
//! reassembles one complete response packet per call.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Buffered reader/writer that frames IMAP response packets.
///
/// Packet reassembly state lives in the struct, not the future, so
/// `read_packet` is cancellation-safe: a read future dropped by `select!`
/// mid-packet loses no bytes, and the next call resumes where it left off.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    /// Accumulated bytes of the packet currently being reassembled.
    partial: Vec<u8>,
    /// Offset in `partial` where the current (incomplete) line starts.
    line_start: usize,
    /// Literal payload bytes still owed by the current `{N}` marker.
    pending_literal: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            partial: Vec::new(),
            line_start: 0,
            pending_literal: 0,
        }
    }

    /// Reads one complete response packet, literals included.
    ///
    /// Reads a line; if it ends with `{N}\r\n`, reads exactly N raw bytes and
    /// loops for the next line, until a line carries no literal marker. The
    /// returned buffer is the concatenation of every segment read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] with `UnexpectedEof` if the transport closes
    /// mid-packet, and [`Error::Protocol`] for oversize lines or literals.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        loop {
            if self.pending_literal > 0 {
                self.fill_literal().await?;
                continue;
            }

            if !self.fill_line().await? {
                continue;
            }

            // A line just completed; does it promise a literal?
            let line = &self.partial[self.line_start..];
            if let Some(literal_len) = literal_length(line) {
                if literal_len > MAX_LITERAL_SIZE {
                    return Err(Error::Protocol(format!(
                        "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                self.pending_literal = literal_len;
                self.line_start = self.partial.len();
                continue;
            }

            self.line_start = 0;
            return Ok(std::mem::take(&mut self.partial));
        }
    }

    /// Appends pending literal bytes from the transport.
    async fn fill_literal(&mut self) -> Result<()> {
        let buf = self.reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(unexpected_eof());
        }

        let n = buf.len().min(self.pending_literal);
        self.partial.extend_from_slice(&buf[..n]);
        self.reader.consume(n);
        self.pending_literal -= n;

        if self.pending_literal == 0 {
            // The response resumes with a fresh line after the payload.
            self.line_start = self.partial.len();
        }
        Ok(())
    }

    /// Appends line bytes from the transport; returns true once the current
    /// line is complete (CRLF included).
    ///
    /// The CRLF may arrive split across reads.
    async fn fill_line(&mut self) -> Result<bool> {
        let buf = self.reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(unexpected_eof());
        }

        if self.partial.len() > self.line_start
            && self.partial.last() == Some(&b'\r')
            && buf[0] == b'\n'
        {
            self.partial.push(b'\n');
            self.reader.consume(1);
            return Ok(true);
        }

        if let Some(pos) = find_crlf(buf) {
            self.partial.extend_from_slice(&buf[..pos + 2]);
            self.reader.consume(pos + 2);
            return Ok(true);
        }

        let n = buf.len();
        self.partial.extend_from_slice(buf);
        self.reader.consume(n);

        if self.partial.len() - self.line_start > MAX_LINE_LENGTH {
            return Err(Error::Protocol("line too long".to_string()));
        }
        Ok(false)
    }

    /// Writes a serialized command and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on write failure.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Buffered read data is dropped; only call this at a protocol point
    /// where the server cannot have pipelined data (STARTTLS upgrade).
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn unexpected_eof() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed",
    ))
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Extracts a synchronizing literal length from the end of a line.
///
/// Matches `...{N}\r\n` with N all digits; anything else is not a marker.
fn literal_length(line: &[u8]) -> Option<usize> {
    if !line.ends_with(b"}\r\n") {
        return None;
    }

    let line = &line[..line.len() - 3]; // strip }\r\n
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(digits).ok()?.parse().ok()
}
