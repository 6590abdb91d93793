pub(crate) mod audit;
pub(crate) mod core;
pub(crate) mod engine;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod permissions;
pub(crate) mod platform;
pub(crate) mod queries;
pub(crate) mod ranks;
pub(crate) mod router;
pub(crate) mod settings;
pub(crate) mod store;
pub(crate) mod types;
pub(crate) mod verification;

pub use self::core::{AppConfig, PlatformEndpoints};
pub use errors::init_tracing;
pub use router::build_router;
pub use settings::{BranchManagerRanks, BridgeSettings, IdSetting};
