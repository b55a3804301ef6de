pub mod domain;
pub mod events;

pub use domain::*;
pub use events::*;
