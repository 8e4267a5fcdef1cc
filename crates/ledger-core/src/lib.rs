pub mod chart;
pub mod db;
pub mod error;
pub mod models;
pub mod money;

pub use chart::*;
pub use db::*;
pub use error::*;
pub use models::*;
pub use money::*;
