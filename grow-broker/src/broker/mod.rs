mod broker_service;
mod ws_handler;

pub use broker_service::*;
pub use ws_handler::*;
