//! Line decoder and encoder bound to the two halves of a transport.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::consts::{MAX_LINE_LENGTH, MAX_TAGS_LENGTH};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::transport::{BoxedReader, BoxedWriter};

/// Inbound lines may carry a full tag section on top of the regular line.
const MAX_INBOUND_LENGTH: usize = MAX_TAGS_LENGTH + MAX_LINE_LENGTH + 2;

pub(crate) struct Decoder {
    reader: BufReader<BoxedReader>,
    buf: Vec<u8>,
}

impl Decoder {
    pub(crate) fn new(reader: BoxedReader) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::with_capacity(512),
        }
    }

    /// Read the next meaningful event. `Ok(None)` means the server closed
    /// the stream; blank lines are skipped.
    pub(crate) async fn decode(&mut self) -> Result<Option<Event>> {
        loop {
            self.buf.clear();
            let n = self.reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            if n > MAX_INBOUND_LENGTH {
                return Err(Error::LineTooLong {
                    len: n,
                    max: MAX_INBOUND_LENGTH,
                });
            }
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(event) = Event::parse(&line) {
                return Ok(Some(event));
            }
        }
    }
}

pub(crate) struct Encoder {
    writer: BoxedWriter,
}

impl Encoder {
    pub(crate) fn new(writer: BoxedWriter) -> Self {
        Self { writer }
    }

    pub(crate) async fn encode(&mut self, event: &Event) -> Result<()> {
        let mut line = event.to_string();
        if line.contains(['\r', '\n', '\0']) {
            return Err(Error::InvalidEvent(format!(
                "{} contains a line break or NUL",
                event.command
            )));
        }
        let len = event.serialized_len();
        if len > MAX_LINE_LENGTH {
            return Err(Error::LineTooLong {
                len,
                max: MAX_LINE_LENGTH,
            });
        }
        line.push_str("\r\n");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("shutdown of write half failed: {e}");
        }
    }
}
