pub mod catalog;
pub mod commands;
pub mod common;
pub mod configfile;
pub mod output;
pub mod topologyfile;

pub type Error = crate::common::error::XaScaleError;
pub type Result<T> = std::result::Result<T, Error>;

// Reexports
pub use xacore;

pub const XA_VERSION: &str = {
    match option_env!("XA_BUILD_VERSION") {
        Some(version) => version,
        None => env!("CARGO_PKG_VERSION"),
    }
};
