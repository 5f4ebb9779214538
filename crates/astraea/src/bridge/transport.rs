//! Filesystem socket channel between the client and the decision process.
//!
//! Socket path format: `{ipc_dir}/astraea{pid}`. The client binds and listens,
//! spawns the decision process with the path, and accepts exactly one peer.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::codec::{FormatError, HEADER_LEN, JsonCodec, declared_len};

/// Default directory for rendezvous sockets.
pub const DEFAULT_IPC_DIR: &str = "/tmp";

const SOCKET_PREFIX: &str = "astraea";

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("decision process closed the channel")]
    ConnectionClosed,
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Rendezvous path for the given process id.
pub fn rendezvous_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("{SOCKET_PREFIX}{pid}"))
}

/// Listening side of the rendezvous, owned by the client until the peer connects.
pub struct RendezvousListener {
    path: PathBuf,
    listener: UnixListener,
}

impl RendezvousListener {
    /// Bind `{dir}/astraea{pid}` for the current process.
    ///
    /// Creates `dir` if needed and replaces a stale socket left by an earlier
    /// process with the same pid. The socket file is not removed afterwards.
    pub fn bind(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = std::path::absolute(rendezvous_path(dir, std::process::id()))?;

        if path.exists() {
            tracing::debug!(path = %path.display(), "Removing stale rendezvous socket");
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        tracing::info!(path = %path.display(), "IPC listening");
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the decision process connects.
    pub fn accept(self) -> io::Result<IpcChannel> {
        tracing::trace!(path = %self.path.display(), "Waiting for decision process");
        let (stream, _) = self.listener.accept()?;
        tracing::debug!("Decision process connected");
        Ok(IpcChannel::from_stream(stream))
    }
}

/// Connected channel to the decision process.
pub struct IpcChannel {
    stream: UnixStream,
}

impl IpcChannel {
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// A second handle on the underlying socket, for shutting it down from
    /// another thread.
    pub fn try_clone_stream(&self) -> io::Result<UnixStream> {
        self.stream.try_clone()
    }

    /// Read exactly `n` bytes. A peer that closes first yields `ConnectionClosed`.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0u8; n];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ChannelError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write all of `bytes`. A vanished peer yields `ConnectionClosed`.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        match self.stream.write_all(bytes).and_then(|()| self.stream.flush()) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                ) =>
            {
                Err(ChannelError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Frame and send one message.
    pub fn send<T: Serialize>(&mut self, message: T) -> Result<(), ChannelError> {
        let mut buf = BytesMut::new();
        JsonCodec::<T>::new().encode(message, &mut buf)?;
        self.write(&buf)
    }

    /// Receive one framed message: the 2-byte header, then exactly that many bytes.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        let header = self.read_exact(HEADER_LEN)?;
        let len = declared_len(&header)?;
        let payload = self.read_exact(len)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&payload);
        JsonCodec::<T>::new()
            .decode(&mut buf)?
            .ok_or_else(|| ChannelError::Format(FormatError::Truncated {
                declared: len,
                available: payload.len(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::codec::encode;
    use crate::bridge::protocol::{ControlMessage, Decision, MessageKind};
    use crate::state::StateSnapshot;

    #[test]
    fn rendezvous_path_uses_pid() {
        let path = rendezvous_path(Path::new("/tmp"), 4242);
        assert_eq!(path, PathBuf::from("/tmp/astraea4242"));
    }

    #[test]
    fn bind_creates_directory_and_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let ipc_dir = dir.path().join("nested");

        let first = RendezvousListener::bind(&ipc_dir).unwrap();
        let path = first.path().to_path_buf();
        assert!(path.is_absolute());
        assert!(path.exists());
        drop(first);

        // The file outlives the listener; binding again must still work.
        let second = RendezvousListener::bind(&ipc_dir).unwrap();
        assert_eq!(second.path(), path);
    }

    #[test]
    fn accept_yields_connected_channel() {
        let dir = tempfile::tempdir().unwrap();
        let listener = RendezvousListener::bind(dir.path()).unwrap();
        let path = listener.path().to_path_buf();

        let peer = std::thread::spawn(move || {
            let mut stream = UnixStream::connect(path).unwrap();
            stream.write_all(&encode(&Decision { cwnd: 5 }).unwrap()).unwrap();
        });

        let mut channel = listener.accept().unwrap();
        let decision: Decision = channel.recv().unwrap();
        assert_eq!(decision.cwnd, 5);
        peer.join().unwrap();
    }

    #[test]
    fn send_writes_one_frame() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut channel = IpcChannel::from_stream(a);

        let message = ControlMessage::alive(Some(1), StateSnapshot::default());
        channel.send(&message).unwrap();
        drop(channel);

        let mut bytes = Vec::new();
        b.read_to_end(&mut bytes).unwrap();
        let decoded: ControlMessage = crate::bridge::codec::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, MessageKind::Alive);
        assert_eq!(
            declared_len(&bytes).unwrap(),
            bytes.len() - HEADER_LEN,
            "length field must equal payload length"
        );
    }

    #[test]
    fn peer_close_mid_frame_is_connection_closed() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut channel = IpcChannel::from_stream(a);

        let frame = encode(&Decision { cwnd: 5 }).unwrap();
        b.write_all(&frame[..frame.len() - 2]).unwrap();
        drop(b);

        assert!(matches!(
            channel.recv::<Decision>(),
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[test]
    fn peer_close_before_header_is_connection_closed() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let mut channel = IpcChannel::from_stream(a);
        assert!(matches!(
            channel.read_exact(2),
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[test]
    fn write_to_closed_peer_is_connection_closed() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let mut channel = IpcChannel::from_stream(a);
        assert!(matches!(
            channel.write(b"hello"),
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[test]
    fn bad_reply_is_format_error() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut channel = IpcChannel::from_stream(a);

        b.write_all(&encode(&serde_json::json!({"cwnd": "lots"})).unwrap())
            .unwrap();
        assert!(matches!(
            channel.recv::<Decision>(),
            Err(ChannelError::Format(FormatError::Malformed(_)))
        ));
    }
}
