//! Built-in `StageContract` implementations for the fixed pipeline order:
//! auth candidates, traffic control (CORS/IP lists/rate), org monitoring,
//! and the remaining named steps that have no bespoke state
//! (`stages::BuiltinStage`).

pub mod auth;
pub mod org_monitor;
pub mod stages;
pub mod traffic;

pub use auth::{BasicAuthStage, JwtAuthStage, TokenKeyStage};
pub use org_monitor::OrgMonitorStage;
pub use stages::{BuiltinStage, StageKind};
pub use traffic::{CorsStage, IPAllowListStage, IPDenyListStage, RateLimitAndQuotaStage, RateLimitForApiStage, TransformHeadersStage};
