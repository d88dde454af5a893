pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod secrets;
pub mod transport;

pub use config::AppConfig;
pub use context::{ChannelContext, CommandBindings, Outcome, Request};
pub use error::{ErrorKind, SealError, SealResult};
pub use secrets::{HandshakeActor, Role, SecureChannel, TrustStore};
