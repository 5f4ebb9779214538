//! TCP accept loop, per-connection receive, and the goodput reporter.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use astraea::PerfSink;
use astraea::perf_log::{END_SENTINEL, START_SENTINEL, announce, epoch_millis};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::meter::{GoodputReporter, ThroughputMeter};

pub const GOODPUT_CSV_HEADER: &str = "time,goodput";

/// A connection idle for this long is dropped. Also applied as the socket's
/// send and receive timeouts.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

const RECV_BUFFER: usize = 64 * 1024;

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    meter: Arc<ThroughputMeter>,
    perf_sink: Option<Arc<PerfSink>>,
}

impl Server {
    /// Bind the listener and open the goodput log.
    ///
    /// Goodput rows always go to stdout while the reporter runs, with or
    /// without a log file.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let perf_sink = if config.wants_reporter() {
            let sink = PerfSink::create(config.perf_log.as_deref(), GOODPUT_CSV_HEADER, true)?;
            info!(
                log = config.perf_log.as_ref().map(|p| p.display().to_string()),
                echo = sink.echoes_to_terminal(),
                interval_ms = config.perf_interval.as_millis() as u64,
                "Goodput reporter enabled"
            );
            Some(Arc::new(sink))
        } else {
            None
        };

        let listener = TcpListener::bind(config.listen).await?;
        info!(
            addr = %listener.local_addr()?,
            one_off = config.one_off,
            "Server listening"
        );

        Ok(Self {
            listener,
            config,
            meter: ThroughputMeter::new(),
            perf_sink,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn meter(&self) -> Arc<ThroughputMeter> {
        Arc::clone(&self.meter)
    }

    /// Shared with the signal path so it can flush the log before exiting.
    pub fn perf_sink(&self) -> Option<Arc<PerfSink>> {
        self.perf_sink.clone()
    }

    /// Serve connections. Returns after the first connection in one-off mode,
    /// otherwise only on an accept error.
    pub async fn run(self) -> io::Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reporter = self.perf_sink.as_ref().map(|sink| {
            let reporter = GoodputReporter::new(self.meter(), self.config.perf_interval);
            tokio::spawn(report_goodput(reporter, Arc::clone(sink), stop_rx))
        });

        if self.config.terminal_out {
            announce(&mut io::stdout(), START_SENTINEL)?;
        }

        if self.config.one_off {
            let (stream, peer) = self.listener.accept().await?;
            receive(stream, peer, &self.config.congestion, self.meter()).await;
            info!(
                total_bytes = self.meter.total(),
                "One-off connection ended"
            );

            let _ = stop_tx.send(true);
            if let Some(reporter) = reporter {
                let _ = reporter.await;
            }
            if let Some(sink) = &self.perf_sink {
                sink.close();
            }
            announce(&mut io::stdout(), END_SENTINEL)?;
            return Ok(());
        }

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let congestion = self.config.congestion.clone();
            let meter = self.meter();
            tokio::spawn(async move { receive(stream, peer, &congestion, meter).await });
        }
    }
}

/// Drain one connection into the meter until EOF, error, or idle timeout.
async fn receive(mut stream: TcpStream, peer: SocketAddr, congestion: &str, meter: Arc<ThroughputMeter>) {
    info!(%peer, "Accepted connection");
    match set_congestion_control(&stream, congestion) {
        Ok(()) => debug!(%peer, congestion, "Set congestion control"),
        Err(e) => warn!(%peer, congestion, error = %e, "Failed to set congestion control"),
    }
    if let Err(e) = set_socket_timeouts(&stream, READ_TIMEOUT) {
        warn!(%peer, error = %e, "Failed to set socket timeouts");
    }

    let mut buf = vec![0u8; RECV_BUFFER];
    let mut received = 0u64;
    loop {
        match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                info!(%peer, received, "Connection closed by client");
                break;
            }
            Ok(Ok(n)) => {
                meter.record(n);
                received += n as u64;
            }
            Ok(Err(e)) => {
                warn!(%peer, received, error = %e, "Receive failed");
                break;
            }
            Err(_) => {
                warn!(%peer, received, timeout_secs = READ_TIMEOUT.as_secs(), "Connection idle, dropping");
                break;
            }
        }
    }
}

/// Emit one goodput row per interval until told to stop.
///
/// Ticks are scheduled from a fixed start, so slow writes do not shift later rows.
async fn report_goodput(
    mut reporter: GoodputReporter,
    sink: Arc<PerfSink>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(reporter.interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => sink.emit(&reporter.sample(epoch_millis())),
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Goodput reporter stopped");
}

#[cfg(target_os = "linux")]
fn set_congestion_control(stream: &TcpStream, name: &str) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt::TcpCongestion};

    setsockopt(stream, TcpCongestion, &std::ffi::OsString::from(name))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_congestion_control(_stream: &TcpStream, _name: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "TCP_CONGESTION is Linux-only",
    ))
}

/// SO_RCVTIMEO and SO_SNDTIMEO, whole seconds.
#[cfg(target_os = "linux")]
fn set_socket_timeouts(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    use nix::sys::time::{TimeVal, TimeValLike};

    let timeout = TimeVal::seconds(timeout.as_secs() as i64);
    setsockopt(stream, sockopt::ReceiveTimeout, &timeout)?;
    setsockopt(stream, sockopt::SendTimeout, &timeout)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_socket_timeouts(_stream: &TcpStream, _timeout: Duration) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            one_off: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn one_off_counts_bytes_and_returns() {
        let server = Server::bind(loopback_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let meter = server.meter();
        let serving = tokio::spawn(server.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&vec![b'a'; 300_000]).await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(meter.total(), 300_000);
    }

    #[tokio::test]
    async fn reporter_writes_goodput_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goodput.csv");
        let config = ServerConfig {
            perf_log: Some(path.clone()),
            perf_interval: Duration::from_millis(10),
            ..loopback_config()
        };

        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn(server.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..5 {
            client.write_all(&[b'a'; 8192]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(client);

        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(GOODPUT_CSV_HEADER));

        let rows: Vec<_> = lines.collect();
        assert!(!rows.is_empty());
        for row in rows {
            let (time, goodput) = row.split_once(',').unwrap();
            assert!(time.parse::<i64>().unwrap() > 0);
            assert!(goodput.parse::<f64>().unwrap() >= 0.0);
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn accepted_sockets_get_send_and_receive_timeouts() {
        use nix::sys::socket::{getsockopt, sockopt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        set_socket_timeouts(&accepted, READ_TIMEOUT).unwrap();

        let recv = getsockopt(&accepted, sockopt::ReceiveTimeout).unwrap();
        let send = getsockopt(&accepted, sockopt::SendTimeout).unwrap();
        assert_eq!(recv.tv_sec(), 10);
        assert_eq!(send.tv_sec(), 10);
        drop(client);
    }

    #[tokio::test]
    async fn reporter_always_echoes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            perf_log: Some(dir.path().join("goodput.csv")),
            terminal_out: false,
            ..loopback_config()
        };
        let server = Server::bind(config).await.unwrap();
        assert!(server.perf_sink().unwrap().echoes_to_terminal());

        let quiet = Server::bind(loopback_config()).await.unwrap();
        assert!(quiet.perf_sink().is_none());
    }

    #[tokio::test]
    async fn normal_mode_serves_concurrent_connections() {
        let config = ServerConfig {
            one_off: false,
            ..loopback_config()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let meter = server.meter();
        let serving = tokio::spawn(server.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        first.write_all(&[1; 1000]).await.unwrap();
        second.write_all(&[2; 500]).await.unwrap();
        drop(first);
        drop(second);

        tokio::time::timeout(Duration::from_secs(5), async {
            while meter.total() < 1500 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!serving.is_finished());
        serving.abort();
    }
}
