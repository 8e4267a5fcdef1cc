pub mod apply;
pub mod detect;

pub use apply::*;
pub use detect::*;
