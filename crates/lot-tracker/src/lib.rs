pub mod assignment;
pub mod lots;
pub mod positions;
pub mod resolve;

pub use assignment::*;
pub use lots::*;
pub use positions::*;
pub use resolve::*;
