pub mod error;
pub mod events;
pub mod formats;
pub mod job;
pub mod styles;

pub use error::JobError;
