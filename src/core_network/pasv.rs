use log::{debug, trace};
use regex::Regex;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

static PASV_ADDRESS: OnceLock<Option<Regex>> = OnceLock::new();

fn pasv_address_regex() -> Option<&'static Regex> {
    PASV_ADDRESS
        .get_or_init(|| {
            Regex::new(r"(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)").ok()
        })
        .as_ref()
}

/// Extracts the data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv_reply(reply: &str) -> Option<SocketAddrV4> {
    let text = reply.get(4..)?;
    let regex = pasv_address_regex()?;
    for caps in regex.captures_iter(text) {
        let mut numbers = [0u8; 6];
        let mut valid = true;
        for (i, slot) in numbers.iter_mut().enumerate() {
            match caps[i + 1].parse::<u8>() {
                Ok(n) => *slot = n,
                Err(_) => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
            let port = (u16::from(numbers[4]) << 8) | u16::from(numbers[5]);
            return Some(SocketAddrV4::new(ip, port));
        }
    }
    trace!("No IP address and port found in PASV reply: {:?}", reply);
    None
}

/// Connects to the address announced by the server in passive mode.
pub async fn open_pasv_connection(addr: SocketAddrV4) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    debug!("Passive data connection opened to {}", addr);
    Ok(stream)
}

/// Reads a data connection to its end, discarding the bytes.
pub async fn drain_data_connection(mut stream: TcpStream) -> io::Result<u64> {
    let mut buf = [0u8; 4096];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    debug!("Data connection drained, {} bytes discarded", total);
    Ok(total)
}
