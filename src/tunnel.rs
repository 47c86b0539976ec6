use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{config::DEFAULT_BUFFER_SIZE, dialer::Connection};

/// Why one relay direction stopped.
#[derive(Debug)]
enum End {
    /// The source hit EOF; carries the bytes moved.
    Eof(u64),
    /// The other direction finished first.
    Cancelled(u64),
}

/// Bidirectional relay between two established connections.
#[derive(Debug, Clone, Copy)]
pub struct Tunneler {
    buffer_size: usize,
}

impl Default for Tunneler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Tunneler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Relays `a` to `b` and `b` to `a` until one direction finishes, then
    /// cancels the other and waits for it.
    ///
    /// A cancelled direction is not an error; the first transfer error is
    /// returned. On error both connections are switched to reset-on-close.
    pub async fn tunnel<A, B>(&self, a: &mut A, b: &mut B) -> io::Result<()>
    where
        A: Connection,
        B: Connection,
    {
        let cancel = CancellationToken::new();
        let (a_to_b, b_to_a) = {
            let (mut a_read, mut a_write) = tokio::io::split(&mut *a);
            let (mut b_read, mut b_write) = tokio::io::split(&mut *b);
            tokio::join!(
                self.relay(&mut a_read, &mut b_write, &cancel),
                self.relay(&mut b_read, &mut a_write, &cancel),
            )
        };

        let result = match (a_to_b, b_to_a) {
            (Ok(up), Ok(down)) => {
                log::debug!(
                    "tunnel closed: {} bytes up, {} bytes down",
                    up.bytes(),
                    down.bytes()
                );
                return Ok(());
            }
            (Err(e), _) | (_, Err(e)) => e,
        };

        log::debug!("tunnel aborted: {result}");
        for reset in [a.set_reset_on_close(), b.set_reset_on_close()] {
            if let Err(e) = reset {
                log::trace!("cannot set reset-on-close: {e}");
            }
        }
        Err(result)
    }

    async fn relay<R, W>(&self, reader: &mut R, writer: &mut W, cancel: &CancellationToken) -> io::Result<End>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.copy_until_cancelled(reader, writer, cancel).await;
        cancel.cancel();
        result
    }

    async fn copy_until_cancelled<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> io::Result<End>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let mut total = 0u64;
        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(End::Cancelled(total)),
                n = reader.read(&mut buf) => n?,
            };
            if n == 0 {
                // Forward the EOF; the peer may already be gone.
                let _ = writer.shutdown().await;
                return Ok(End::Eof(total));
            }
            // a chunk already read is always delivered in full
            writer.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }
}

impl End {
    fn bytes(&self) -> u64 {
        match self {
            Self::Eof(n) | Self::Cancelled(n) => *n,
        }
    }
}
