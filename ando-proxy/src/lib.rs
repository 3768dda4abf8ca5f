pub mod builder;
pub mod connection;
pub mod dispatcher;
pub mod health_check;
pub mod loop_dispatcher;
pub mod proxy;
pub mod registry;
pub mod worker;

pub use builder::{compile_all, BuildOutcome, BuildServices, PipelineBuilder};
pub use dispatcher::{DispatchResult, Dispatcher};
pub use health_check::{ActiveHealthCheckConfig, HealthChecker};
pub use loop_dispatcher::LoopDispatcher;
pub use registry::{CompiledApi, PipelineRegistry};
pub use worker::{SharedState, spawn_workers};
