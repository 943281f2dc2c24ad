pub mod capture;
pub mod error;
pub mod limits;
pub mod result;
pub mod runner;

pub use error::*;
pub use limits::*;
pub use result::*;
pub use runner::*;
