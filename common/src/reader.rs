use std::io::Read;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SerialConfig;

const READ_CHUNK: usize = 4096;
/// Chunks buffered between a device thread and its session.
const DEVICE_QUEUE: usize = 64;
const TCP_SCHEME: &str = "tcp://";

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        source: std::io::Error,
    },
    #[error("read from {device} failed: {source}")]
    Read {
        device: String,
        source: std::io::Error,
    },
    #[error("{0} closed the stream")]
    Eof(String),
}

/// Pump raw bytes from the sensor device into `tx` until the receiver is dropped.
/// Reopens the device with exponential backoff whenever it fails or closes.
///
/// `device` is either a path (a tty already configured by the OS) or
/// `tcp://host:port` for a serial-over-network bridge. Every session starts by
/// sending an empty chunk, which tells the consumer to forget any partial
/// record left over from the previous one.
pub async fn run_reader(config: SerialConfig, tx: mpsc::Sender<Bytes>) {
    let mut backoff = config.reconnect_initial();
    let max_backoff = config.reconnect_max();

    loop {
        info!(device = config.device, "opening sensor stream");
        let mut forwarded = 0u64;
        match read_session(&config.device, &tx, &mut forwarded).await {
            Ok(()) => {
                info!(device = config.device, "pipeline stopped, closing sensor stream");
                return;
            }
            Err(e) => {
                error!(error = %e, forwarded, "sensor stream error, reconnecting in {:?}", backoff);
            }
        }

        if tx.is_closed() {
            return;
        }
        if forwarded > 0 {
            backoff = config.reconnect_initial();
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

/// Returns `Ok(())` once the receiving side is gone; any transport problem is an error.
async fn read_session(
    device: &str,
    tx: &mpsc::Sender<Bytes>,
    forwarded: &mut u64,
) -> Result<(), ReaderError> {
    let mut stream = SensorStream::open(device).await?;
    info!(device, "sensor stream open");
    if tx.send(Bytes::new()).await.is_err() {
        return Ok(());
    }

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        let chunk = stream
            .next_chunk(&mut buf)
            .await
            .map_err(|source| ReaderError::Read {
                device: device.to_string(),
                source,
            })?
            .ok_or_else(|| ReaderError::Eof(device.to_string()))?;

        let n = chunk.len();
        if tx.send(chunk).await.is_err() {
            return Ok(());
        }
        *forwarded += n as u64;
        debug!(bytes = n, "forwarded sensor chunk");
    }
}

enum SensorStream {
    Tcp(TcpStream),
    /// Chunks read by a detached thread. A blocking read on a silent tty cannot
    /// be cancelled, and on the runtime's blocking pool it would hold up shutdown.
    Device(mpsc::Receiver<std::io::Result<Bytes>>),
}

impl SensorStream {
    async fn open(device: &str) -> Result<Self, ReaderError> {
        let open_err = |source| ReaderError::Open {
            device: device.to_string(),
            source,
        };
        match device.strip_prefix(TCP_SCHEME) {
            Some(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(open_err)?;
                Ok(Self::Tcp(stream))
            }
            None => {
                let file = tokio::fs::File::open(device).await.map_err(open_err)?;
                let rx = spawn_device_thread(file.into_std().await).map_err(open_err)?;
                Ok(Self::Device(rx))
            }
        }
    }

    /// Next non-empty chunk, or `None` at end of stream.
    async fn next_chunk(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Bytes>> {
        match self {
            Self::Tcp(stream) => {
                buf.reserve(READ_CHUNK);
                let n = stream.read_buf(buf).await?;
                Ok((n > 0).then(|| buf.split().freeze()))
            }
            Self::Device(rx) => rx.recv().await.transpose(),
        }
    }
}

/// Read `file` on its own thread until EOF, an error, or the session going away.
/// The thread is never joined; if the device stays silent it simply outlives the session.
fn spawn_device_thread(
    mut file: std::fs::File,
) -> std::io::Result<mpsc::Receiver<std::io::Result<Bytes>>> {
    let (tx, rx) = mpsc::channel(DEVICE_QUEUE);
    std::thread::Builder::new()
        .name("sensor-device".into())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => return,
                    Ok(n) => {
                        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(error = %e, "device read failed");
                        let _ = tx.blocking_send(Err(e));
                        return;
                    }
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{channel, ByteSource};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn config(device: String) -> SerialConfig {
        SerialConfig {
            device,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 40,
        }
    }

    async fn collect(rx: &mut mpsc::Receiver<Bytes>, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        while received.len() < len {
            let chunk = rx.recv().await.expect("reader stopped early");
            received.extend_from_slice(&chunk);
        }
        received
    }

    #[tokio::test]
    async fn forwards_file_contents_until_receiver_drops() {
        let path = std::env::temp_dir().join(format!(
            "thermal-view-reader-{}.csv",
            std::process::id()
        ));
        std::fs::write(&path, b"1.0,2.0\n3.0,4.0\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_reader(config(path.display().to_string()), tx));

        let received = collect(&mut rx, 16).await;
        assert_eq!(&received[..16], b"1.0,2.0\n3.0,4.0\n");

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reader did not stop")
            .unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn reads_from_tcp_bridge() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_reader(config(format!("tcp://{addr}")), tx));

        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"25.0,26.0\n").await.unwrap();

        let received = collect(&mut rx, 10).await;
        assert_eq!(received, b"25.0,26.0\n");

        drop(rx);
        drop(socket);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reader did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn missing_device_gives_up_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        tokio::time::timeout(
            Duration::from_secs(5),
            run_reader(config("/nonexistent/thermal-view-device".into()), tx),
        )
        .await
        .expect("reader kept retrying");
    }

    #[tokio::test]
    async fn open_reports_missing_device() {
        let err = match SensorStream::open("/nonexistent/thermal-view-device").await {
            Ok(_) => panic!("expected open failure"),
            Err(e) => e,
        };
        assert!(matches!(err, ReaderError::Open { .. }));
    }

    #[tokio::test]
    async fn reconnect_does_not_splice_partial_records() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut source) = channel(64, 64 * 1024);
        let handle = tokio::spawn(run_reader(config(format!("tcp://{addr}")), tx));

        let (mut first, _) = listener.accept().await.unwrap();
        first.write_all(b"20.0,20.0\n10.0,10.0,").await.unwrap();
        drop(first);

        let (mut second, _) = listener.accept().await.unwrap();
        second.write_all(b"90.0\n30.0,30.0\n").await.unwrap();

        let mut records = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while records.len() < 3 {
                source.bytes_available();
                match source.read_record() {
                    Some(record) => records.push(record),
                    None => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .expect("records did not arrive");

        assert_eq!(records[0], Bytes::from_static(b"20.0,20.0\n"));
        // The tail of the first session is gone; only the new session's head remains.
        assert_eq!(records[1], Bytes::from_static(b"90.0\n"));
        assert_eq!(records[2], Bytes::from_static(b"30.0,30.0\n"));

        handle.abort();
    }

    #[cfg(unix)]
    #[test]
    fn silent_device_does_not_block_shutdown() {
        let path = std::env::temp_dir().join(format!(
            "thermal-view-fifo-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());

        // Holding the write end open keeps reads blocked instead of hitting EOF.
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::fs::OpenOptions::new().write(true).open(writer_path)
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let device = path.display().to_string();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let (tx, mut rx) = mpsc::channel(4);
                let handle = tokio::spawn(run_reader(config(device), tx));
                // Session marker: the device is open and its reader is waiting.
                assert_eq!(rx.recv().await, Some(Bytes::new()));
                handle.abort();
            });
            drop(rt);
            let _ = done_tx.send(());
        });

        let writer = writer.join().unwrap().unwrap();
        let finished = done_rx.recv_timeout(Duration::from_secs(3));
        drop(writer);
        let _ = std::fs::remove_file(&path);
        assert!(finished.is_ok(), "runtime shutdown waited on a silent device");
    }
}
