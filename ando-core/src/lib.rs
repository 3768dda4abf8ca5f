pub mod config;
pub mod consumer;
pub mod error;
pub mod merge;
pub mod policy;
pub mod registry;
pub mod session;
pub mod spec;

pub use config::GatewayConfig;
pub use consumer::Consumer;
pub use error::{GatewayError, PolicyError};
pub use merge::{PolicyLookup, PolicyMerger};
pub use policy::Policy;
pub use registry::ApiSpecRegistry;
pub use session::{AccessRight, ApiLimit, Session};
pub use spec::ApiSpec;
