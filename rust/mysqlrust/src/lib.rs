pub mod config;
pub mod connection;
pub mod errors;
pub mod handshake;
pub mod protocol;
