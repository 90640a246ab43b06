//! Events - 进程内事件分发

pub mod publisher;

pub use publisher::{EventPublisher, GatewayEvent};
