pub mod audit;
pub mod engine;
pub mod journal;

pub use audit::*;
pub use engine::*;
pub use journal::*;
