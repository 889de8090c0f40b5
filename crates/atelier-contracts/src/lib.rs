pub mod aspect;
pub mod backends;
pub mod error;
pub mod events;
pub mod media;
pub mod normalize;
pub mod requests;

pub use error::{DispatchError, ErrorBody, Result};
