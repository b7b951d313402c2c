//! Connection I/O adapter.
//!
//! Wraps an accepted `TcpStream` with the byte-level operations the
//! decoder, encoder, and application handlers share. The read and write
//! halves sit behind independent locks so the reader routine can block
//! inside a decode while a reply is written out.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Buffered duplex byte stream for one accepted connection.
///
/// The read half has a single lock, and the reader routine holds it for the
/// whole of each decode. A handler reading through
/// [`Session::stream`](crate::Session::stream) therefore waits until the
/// current decode completes and then competes with the decoder for the next
/// bytes. Prefer carrying payloads inside decoded messages.
pub struct ConnStream {
    read: Mutex<BufReader<OwnedReadHalf>>,
    write: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
    fd: RawFd,
    closed: AtomicBool,
}

impl ConnStream {
    pub(crate) fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let fd = stream.as_raw_fd();
        let (read, write) = stream.into_split();
        Ok(Self {
            read: Mutex::new(BufReader::new(read)),
            write: Mutex::new(write),
            peer,
            fd,
            closed: AtomicBool::new(false),
        })
    }

    /// Remote address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read exactly `n` bytes.
    ///
    /// Fails with `UnexpectedEof` if the connection closes mid-read.
    /// Waits for the read lock; see the type-level note on decoder
    /// contention.
    pub async fn read_exact(&self, n: usize) -> io::Result<BytesMut> {
        let mut buf = BytesMut::zeroed(n);
        let mut read = self.read.lock().await;
        read.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Read bytes up to and including `delim`.
    ///
    /// If the stream ends before the delimiter, the bytes read so far are
    /// returned; a read that yields nothing at all is reported as
    /// `UnexpectedEof` so decoders observe connection teardown as an error.
    /// Waits for the read lock; see the type-level note on decoder
    /// contention.
    pub async fn read_until(&self, delim: u8) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut read = self.read.lock().await;
        let n = read.read_until(delim, &mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        Ok(buf)
    }

    /// Write the whole buffer and flush, returning the byte count written.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<usize> {
        let mut write = self.write.lock().await;
        write.write_all(data).await?;
        write.flush().await?;
        Ok(data.len())
    }

    /// Disable I/O on the socket in both directions.
    ///
    /// A decode blocked inside a read observes an error immediately, which
    /// is how the reader routine learns the connection is gone. The fd
    /// itself is released when the last `Arc<ConnStream>` drops. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // shutdown(2) never invalidates the fd, only wakes pending I/O.
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
        }
    }

    /// Whether `close` has been called on this stream.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (Arc<ConnStream>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Arc::new(ConnStream::new(server).unwrap()), client)
    }

    #[tokio::test]
    async fn test_read_exact_and_write_all() {
        let (conn, mut client) = pair().await;

        client.write_all(b"hello").await.unwrap();
        let got = conn.read_exact(5).await.unwrap();
        assert_eq!(&got[..], b"hello");

        let n = conn.write_all(b"world").await.unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_read_until_delimiter() {
        let (conn, mut client) = pair().await;

        client.write_all(b"one\ntwo\n").await.unwrap();
        assert_eq!(conn.read_until(b'\n').await.unwrap(), b"one\n");
        assert_eq!(conn.read_until(b'\n').await.unwrap(), b"two\n");
    }

    #[tokio::test]
    async fn test_read_until_reports_eof() {
        let (conn, client) = pair().await;
        drop(client);

        let err = conn.read_until(b'\n').await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (conn, _client) = pair().await;

        let reader = Arc::clone(&conn);
        let pending = tokio::spawn(async move { reader.read_until(b'\n').await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.close();
        assert!(conn.is_closed());

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read did not unblock after close")
            .unwrap();
        assert!(result.is_err());
    }
}
