//! Type definitions

pub mod messages;
pub mod plan;
pub mod stop;

pub use messages::*;
pub use plan::*;
pub use stop::*;
