pub mod evaluator;
pub mod kind;
pub mod normalize;
pub mod outcome;
pub mod registry;

pub use evaluator::*;
pub use kind::*;
pub use outcome::*;
pub use registry::*;
