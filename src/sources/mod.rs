mod base;
pub mod instagram;

pub use base::{FetchError, PostSnapshot, PostSource};
