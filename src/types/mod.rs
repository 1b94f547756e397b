//! Type definitions for tokroll

mod error;
mod record;
mod summary;

pub use error::*;
pub use record::*;
pub use summary::*;
