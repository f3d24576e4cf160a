//! Bidirectional byte relay with live traffic accounting.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Receives byte counts while a relay is in progress.
pub trait TrafficSink: Send + Sync {
    /// Bytes read from the client, about to be sent upstream.
    fn uploaded(&self, bytes: u64);
    /// Bytes read from upstream, about to be sent to the client.
    fn downloaded(&self, bytes: u64);
}

/// Copy in both directions until both sides reach EOF, or one fails.
///
/// Counts are reported as soon as data is read, so by the time a peer
/// observes bytes the sink has already accounted for them.
pub async fn relay<A, B, T>(client: A, remote: B, traffic: &T) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    T: TrafficSink + ?Sized,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let upload = copy_counted(&mut client_read, &mut remote_write, |n| traffic.uploaded(n));
    let download = copy_counted(&mut remote_read, &mut client_write, |n| traffic.downloaded(n));
    tokio::try_join!(upload, download)
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, on_read: impl Fn(u64)) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // propagate the half-close
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        on_read(n as u64);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::duplex;

    #[derive(Default)]
    struct Counter {
        up: AtomicU64,
        down: AtomicU64,
    }

    impl TrafficSink for Counter {
        fn uploaded(&self, bytes: u64) {
            self.up.fetch_add(bytes, Ordering::Relaxed);
        }

        fn downloaded(&self, bytes: u64) {
            self.down.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn relays_and_counts_both_directions() {
        let (mut client, client_side) = duplex(1024);
        let (remote_side, mut remote) = duplex(1024);
        let counter = std::sync::Arc::new(Counter::default());

        let task_counter = counter.clone();
        let task = tokio::spawn(async move {
            relay(client_side, remote_side, task_counter.as_ref()).await
        });

        client.write_all(b"ping!").await.unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping!");

        remote.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        assert_eq!(counter.down.load(Ordering::Relaxed), 4);

        client.shutdown().await.unwrap();
        remote.shutdown().await.unwrap();
        let (up, down) = task.await.unwrap().unwrap();
        assert_eq!((up, down), (5, 4));
        assert_eq!(counter.up.load(Ordering::Relaxed), 5);
    }
}
