pub mod config;
mod error;
mod event;
mod gateway;
pub mod http;
pub mod registry;
pub mod udp;

pub use config::NotifyConfig;
pub use error::NotifyError;
pub use event::{Event, EventEnvelope, FieldChange};
pub use gateway::EventGateway;
pub use registry::SubscriberRegistry;
