use log::debug;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use tokio::net::{TcpListener, TcpStream};

/// Formats `PORT h1,h2,h3,h4,p1,p2\r\n` for `addr`.
pub fn format_port_command(addr: SocketAddrV4) -> String {
    let [h1, h2, h3, h4] = addr.ip().octets();
    let port = addr.port();
    format!(
        "PORT {},{},{},{},{},{}\r\n",
        h1,
        h2,
        h3,
        h4,
        port >> 8,
        port & 0xFF
    )
}

/// Opens a listener for an active mode (PORT) data connection on the local
/// address of the control connection. Returns the listener and the PORT command.
pub async fn setup_port_listener(local_ip: IpAddr) -> io::Result<(TcpListener, String)> {
    let IpAddr::V4(ip) = local_ip else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "PORT needs an IPv4 control connection",
        ));
    };
    let listener = TcpListener::bind((ip, 0)).await?;
    let port = match listener.local_addr()? {
        SocketAddr::V4(addr) => addr.port(),
        SocketAddr::V6(addr) => addr.port(),
    };
    debug!("PORT listener set up on IP: {}, Port: {}", ip, port);
    Ok((listener, format_port_command(SocketAddrV4::new(ip, port))))
}

/// Accepts the server's incoming data connection.
pub async fn accept_port_connection(listener: TcpListener) -> io::Result<TcpStream> {
    let (stream, addr) = listener.accept().await?;
    debug!("Accepted data connection from: {}", addr);
    Ok(stream)
}
