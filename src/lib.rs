pub mod command;
pub mod endpoint;
pub mod protocol;
pub mod queue;

pub use command::Command;
pub use endpoint::{
    Endpoint, EndpointConfig, EndpointError, RetryPolicy, Role, ShutdownSignal,
};
pub use protocol::{CodecError, Registry, WireMessage};
pub use queue::MessageQueue;
