mod room_command;
mod room_handle;
mod room_session;

pub use room_command::*;
pub use room_handle::*;
pub use room_session::*;
