pub mod form8949;
pub mod report;

pub use form8949::*;
pub use report::*;
