//! Kernel module - collaborator contracts, their implementations and the
//! dependency container.

pub mod deps;
pub mod endpoints;
pub mod nats;
pub mod test_dependencies;
pub mod traits;
pub mod transport;

pub use deps::{DispatchSettings, NotifierDeps};
pub use endpoints::CachedEndpointLookup;
pub use nats::{JetStreamProducer, JetStreamSource};
pub use test_dependencies::TestDependencies;
pub use traits::*;
pub use transport::HttpCallbackTransport;
