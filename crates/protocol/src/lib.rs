pub mod config;
pub mod error;
pub mod ids;
pub mod messages;

pub use config::*;
pub use error::*;
pub use ids::*;
pub use messages::*;
