// builders + evaluation + experiment files
pub mod builders;
pub mod config;
pub mod utils;

#[cfg(feature = "test-utils")]
pub mod test_utils;
