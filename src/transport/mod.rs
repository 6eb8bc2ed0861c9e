// MIT License - Copyright (c) 2026 Peter Wright
// Transport layer

pub mod command;
pub mod connection;

pub use command::CommandDispatcher;
pub use connection::{Connection, FrameStream};
