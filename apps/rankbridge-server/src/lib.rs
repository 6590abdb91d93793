#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, init_tracing, AppConfig, BranchManagerRanks, BridgeSettings, IdSetting,
    PlatformEndpoints,
};
