pub mod buffers;
pub mod connector;
pub mod events;
pub mod pasv;
pub mod port;
pub mod socket;
pub mod stream;

pub use buffers::{ReadBuffer, WriteBuffer};
pub use connector::{BoxFuture, Connector, TcpConnector};
pub use events::{EventQueue, SocketEvent};
pub use socket::{ControlSocket, SocketIo, SocketState};
pub use stream::{BoxedStream, ControlStream};
