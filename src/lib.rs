pub mod astrometry;
pub mod config;
pub mod constants;
pub mod env_state;
pub mod table;
pub mod tap;
pub mod tap_errors;

pub use tap::client::ArchiveClient;
pub use tap_errors::TapError;
