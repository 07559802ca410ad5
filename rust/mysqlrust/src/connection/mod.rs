mod authenticator;
mod channel;
mod framed;

pub use authenticator::{Authenticator, HandshakeDriver};
pub use channel::PacketChannel;
pub use framed::FramedChannel;
