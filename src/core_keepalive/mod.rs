pub mod keepalive;


pub use keepalive::{KeepAliveMode, KeepAliveState};
