pub mod definition;
pub mod engine;
pub mod state;

pub use definition::*;
pub use engine::*;
pub use state::*;
