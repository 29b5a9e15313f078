pub mod dir_reply;
pub mod parser;
pub mod reply;

#[cfg(test)]
mod test_reply;

pub use dir_reply::directory_from_reply;
pub use parser::{read_ftp_reply, RawReply};
pub use reply::{Reply, ReplyClass};
