pub mod config;
pub mod error;
pub mod resource;
pub mod tags;

pub use config::Config;
pub use error::*;
pub use resource::*;
pub use tags::*;
