pub mod categorize;
pub mod parse;

pub use categorize::*;
pub use parse::*;
