//! Adapts a `(reader, writer)` pair over an opaque byte channel (SSH exec, a
//! container `exec`, a plain pipe) into an addressable, buffered, duplex
//! stream that an RPC framework can multiplex over.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadBuf};

/// Fixed buffer capacity for both halves, matching the 32 KiB budget named
/// in the data model.
pub const BUFFER_CAPACITY: usize = 32 * 1024;

/// Fixed address scheme reported by [`StdioConnection::local_addr`] and
/// [`StdioConnection::peer_addr`]; the underlying transport has no real
/// network address.
pub const ADDR_SCHEME: &str = "stdio";

/// What [`StdioConnection::close`] should do to the process once the
/// underlying writer has been flushed and shut down. Tunneled sessions (an
/// SSH channel, a container `exec`) sometimes need the process to exit with
/// a specific code so the upstream transport observes EOF and tears the
/// session down; plain pipes never need this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseBehavior {
    /// Flush, shut down the writer, and return.
    ShutdownOnly,
    /// Flush, shut down the writer, then call `std::process::exit(code)`.
    ExitProcess(i32),
}

/// A duplex stream built from an arbitrary reader and write-closer.
///
/// `Read` is guaranteed to return at least one byte or an error (never a
/// spurious zero-length success other than true EOF); `Write` is expected to
/// be followed by an explicit [`StdioConnection::write_frame`] or
/// `.flush().await` so that line-framed protocol messages and terminal
/// escape sequences reach the remote without being held in a buffer —
/// deadlines are accepted by callers but not honored here, since the
/// underlying transport is opaque and has no cancellable I/O primitive of
/// its own.
pub struct StdioConnection<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    close_behavior: CloseBehavior,
}

impl<R, W> StdioConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_close_behavior(reader, writer, CloseBehavior::ShutdownOnly)
    }

    pub fn with_close_behavior(reader: R, writer: W, close_behavior: CloseBehavior) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_CAPACITY, reader),
            writer: BufWriter::with_capacity(BUFFER_CAPACITY, writer),
            close_behavior,
        }
    }

    pub fn local_addr(&self) -> String {
        ADDR_SCHEME.to_string()
    }

    pub fn peer_addr(&self) -> String {
        ADDR_SCHEME.to_string()
    }

    /// Writes `buf` in full and flushes before returning, so the remote end
    /// observes the frame immediately rather than sitting in the write
    /// buffer.
    pub async fn write_frame(&mut self, buf: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(buf).await?;
        self.writer.flush().await
    }

    /// Flushes any buffered output, applies the configured close behavior,
    /// then shuts down the underlying writer.
    pub async fn close(mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.flush().await?;
        if let CloseBehavior::ExitProcess(code) = self.close_behavior {
            std::process::exit(code);
        }
        self.writer.shutdown().await
    }
}

impl<R, W> AsyncRead for StdioConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for StdioConnection<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn write_frame_delivers_bytes_in_order() {
        let input = tokio::io::empty();
        let mut output = Vec::new();
        {
            let mut conn = StdioConnection::new(input, &mut output);
            conn.write_frame(b"ping\n").await.unwrap();
            conn.write_frame(b"pong\n").await.unwrap();
        }
        assert_eq!(output, b"ping\npong\n");
    }

    #[tokio::test]
    async fn reported_addresses_use_stdio_scheme() {
        let conn = StdioConnection::new(tokio::io::empty(), tokio::io::sink());
        assert_eq!(conn.local_addr(), "stdio");
        assert_eq!(conn.peer_addr(), "stdio");
    }

    #[tokio::test]
    async fn read_yields_written_bytes() {
        let data = b"hello remote".to_vec();
        let mut conn = StdioConnection::new(&data[..], tokio::io::sink());
        let mut out = Vec::new();
        conn.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }
}
