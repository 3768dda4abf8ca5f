pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod vm;

pub use pipeline::{ChainResult, Pipeline};
pub use plugin::{StageContext, StageContract, StageInstance, StageOutcome, RESPOND_CODE};
pub use registry::StageRegistry;
