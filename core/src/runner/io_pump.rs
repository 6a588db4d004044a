use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::util::RingBytes;

/// Copy a child stream into `ring` until EOF. Resolves to the total bytes read.
pub(crate) fn pump<R>(
    mut rd: R,
    ring: Arc<RingBytes>,
    label: &'static str,
) -> JoinHandle<std::io::Result<u64>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;

        loop {
            let n = match rd.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(
                        target: "outpost.runner",
                        stage = "pump.read_error",
                        stream = label,
                        error = %e
                    );
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            ring.push(&buf[..n]);
            total += n as u64;
        }

        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn captures_until_eof() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let ring = RingBytes::new(1024);

        let task = pump(rd, ring.clone(), "stdout");

        wr.write_all(b"hello ").await.unwrap();
        wr.write_all(b"world").await.unwrap();
        drop(wr);

        let total = task.await.unwrap().unwrap();
        assert_eq!(total, 11);
        assert_eq!(ring.to_string_lossy(), "hello world");
    }

    #[tokio::test]
    async fn counts_bytes_beyond_capacity() {
        let (mut wr, rd) = tokio::io::duplex(64);
        let ring = RingBytes::new(4);

        let task = pump(rd, ring.clone(), "stderr");
        wr.write_all(b"abcdefgh").await.unwrap();
        drop(wr);

        assert_eq!(task.await.unwrap().unwrap(), 8);
        assert_eq!(ring.to_bytes(), b"efgh");
    }
}
