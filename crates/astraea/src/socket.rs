//! Kernel TCP socket with the DeepCC extension.
//!
//! The patched kernel exposes three extra `IPPROTO_TCP` options: one to enable
//! the extension on a connected socket, one to read `struct tcp_deepcc_info`,
//! and one to impose a congestion window from user space.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};

use crate::state::{InfoRequest, StateSnapshot};

/// What the control, monitor and data paths need from the connection.
///
/// One handle is shared by all threads, so every operation takes `&self`.
pub trait FlowSocket: Send + Sync {
    /// Read the current DeepCC state.
    fn deepcc_info(&self, request: InfoRequest) -> io::Result<StateSnapshot>;

    /// Impose a congestion window (in packets).
    fn set_cwnd(&self, cwnd: u32) -> io::Result<()>;

    /// Write the whole buffer to the connection.
    fn send_all(&self, payload: &[u8]) -> io::Result<()>;
}

/// Extension level that lets user space set the window.
pub const DEEPCC_CONTROL_LEVEL: i32 = 2;

#[cfg(target_os = "linux")]
mod sys {
    pub const TCP_CWND: libc::c_int = 43;
    pub const TCP_DEEPCC_ENABLE: libc::c_int = 44;
    pub const TCP_DEEPCC_INFO: libc::c_int = 46;

    /// Layout of `struct tcp_deepcc_info`. `request` is read by the kernel
    /// before it fills in the rest.
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TcpDeepccInfo {
        pub request: u32,
        pub min_rtt: u32,
        pub avg_urtt: u32,
        pub cnt: u32,
        pub srtt_us: u32,
        pub thr_cnt: u32,
        pub avg_thr: u64,
        pub pacing_rate: u64,
        pub loss_bytes: u32,
        pub packets_out: u32,
        pub retrans_out: u32,
        pub max_packets_out: u32,
        pub cwnd: u32,
        pub _pad: u32,
    }
}

/// Connected TCP client socket with DeepCC controls.
#[cfg(target_os = "linux")]
pub struct DeepCcSocket {
    stream: TcpStream,
}

#[cfg(target_os = "linux")]
impl DeepCcSocket {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        tracing::debug!(%addr, "Connected");
        Ok(Self { stream })
    }

    pub fn set_congestion_control(&self, name: &str) -> io::Result<()> {
        use nix::sys::socket::{setsockopt, sockopt::TcpCongestion};

        setsockopt(&self.stream, TcpCongestion, &std::ffi::OsString::from(name))?;
        Ok(())
    }

    pub fn set_nodelay(&self) -> io::Result<()> {
        self.stream.set_nodelay(true)
    }

    /// Must be called after the connection is established.
    pub fn enable_deepcc(&self, level: i32) -> io::Result<()> {
        self.setsockopt(sys::TCP_DEEPCC_ENABLE, &level)
    }

    fn setsockopt<T>(&self, name: libc::c_int, value: &T) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        // SAFETY: value points to a live T of the advertised length.
        let rc = unsafe {
            libc::setsockopt(
                self.stream.as_raw_fd(),
                libc::IPPROTO_TCP,
                name,
                (value as *const T).cast(),
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn getsockopt<T>(&self, name: libc::c_int, value: &mut T) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        let mut len = std::mem::size_of::<T>() as libc::socklen_t;
        // SAFETY: value points to a live, writable T of len bytes.
        let rc = unsafe {
            libc::getsockopt(
                self.stream.as_raw_fd(),
                libc::IPPROTO_TCP,
                name,
                (value as *mut T).cast(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl FlowSocket for DeepCcSocket {
    fn deepcc_info(&self, request: InfoRequest) -> io::Result<StateSnapshot> {
        let mut info = sys::TcpDeepccInfo {
            request: request as u32,
            ..Default::default()
        };
        self.getsockopt(sys::TCP_DEEPCC_INFO, &mut info)?;

        Ok(StateSnapshot {
            min_rtt: info.min_rtt,
            avg_urtt: info.avg_urtt,
            cnt: info.cnt,
            srtt_us: info.srtt_us,
            avg_thr: info.avg_thr,
            thr_cnt: info.thr_cnt,
            pacing_rate: info.pacing_rate,
            loss_bytes: info.loss_bytes,
            packets_out: info.packets_out,
            retrans_out: info.retrans_out,
            max_packets_out: info.max_packets_out,
            cwnd: info.cwnd,
        })
    }

    fn set_cwnd(&self, cwnd: u32) -> io::Result<()> {
        self.setsockopt(sys::TCP_CWND, &cwnd)
    }

    fn send_all(&self, payload: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(payload)
    }
}
