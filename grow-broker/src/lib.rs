pub mod broker;
pub mod config;
pub mod server;

pub use broker::{BrokerService, ClientId};
pub use config::BrokerConfig;
pub use server::BrokerServer;
