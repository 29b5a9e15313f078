use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Byte stream carrying an FTP control connection.
///
/// Besides plain reads and writes the engine needs to send the TELNET Synch
/// as TCP urgent data, which only a raw TCP socket can do.
pub trait ControlStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Sends `data` as urgent (out-of-band) data and returns how many bytes
    /// went out.
    fn send_urgent(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "urgent data not supported on this stream",
        ))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub type BoxedStream = Box<dyn ControlStream>;

impl ControlStream for TcpStream {
    #[cfg(unix)]
    fn send_urgent(&mut self, data: &[u8]) -> io::Result<usize> {
        use std::os::unix::io::AsRawFd;

        let fd = self.as_raw_fd();
        // SAFETY: `fd` is a live socket owned by `self` and `data` outlives the call.
        let sent = unsafe {
            libc::send(
                fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_OOB,
            )
        };
        if sent < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(sent as usize)
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// In-memory pipe, used by scripted servers in tests.
impl ControlStream for DuplexStream {}
