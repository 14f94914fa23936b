pub mod cli;
pub mod error;
pub mod format;
pub mod globalsettings;
pub mod setup;
