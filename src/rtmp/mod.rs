// RTMP protocol utilities

mod chunk;
mod command;
mod constants;
mod data;
mod handshake;
mod messages;
mod packet;

pub use chunk::*;
pub use command::*;
pub use constants::*;
pub use data::*;
pub use handshake::*;
pub use messages::*;
pub use packet::*;
