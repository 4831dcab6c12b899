//! Framing codec for the server's stdio transport.
//!
//! Messages travel as `Content-Length: N\r\n\r\n{json}` over the child's
//! stdin/stdout. [`MessageReader`] and [`MessageWriter`] handle the framing;
//! everything above them works in `serde_json::Value` terms.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body (16 MiB).
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Reads framed JSON messages from the server's stdout.
pub struct MessageReader<R> {
    input: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
            line: String::new(),
        }
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the stream ended cleanly between messages; EOF
    /// anywhere inside a message is an error.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(body_len) = self.read_header_block().await? else {
            return Ok(None);
        };

        if body_len > MAX_MESSAGE_BYTES {
            bail!("message of {body_len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit");
        }

        let mut body = vec![0u8; body_len];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading message body")?;

        serde_json::from_slice(&body)
            .context("decoding message body")
            .map(Some)
    }

    /// Consume header lines up to the blank separator and return the
    /// announced body length, or `None` on clean EOF before any header.
    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut body_len = None;
        let mut headers_started = false;

        loop {
            self.line.clear();
            let read = self
                .input
                .read_line(&mut self.line)
                .await
                .context("reading message header")?;
            if read == 0 {
                if headers_started {
                    bail!("stream ended inside message headers");
                }
                return Ok(None);
            }
            headers_started = true;

            let line = self.line.trim_ascii();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim_ascii().eq_ignore_ascii_case("Content-Length")
            {
                body_len = Some(
                    value
                        .trim_ascii()
                        .parse()
                        .context("parsing Content-Length header")?,
                );
            }
            // Other headers (Content-Type) carry no information we need.
        }

        match body_len {
            Some(len) => Ok(Some(len)),
            None => bail!("message headers carried no Content-Length"),
        }
    }
}

/// Writes framed JSON messages to the server's stdin.
pub struct MessageWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding message body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.output
            .write_all(header.as_bytes())
            .await
            .context("writing message header")?;
        self.output
            .write_all(&body)
            .await
            .context("writing message body")?;
        self.output.flush().await.context("flushing message")?;
        Ok(())
    }
}
