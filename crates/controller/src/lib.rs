pub mod claim;
pub mod controller;
pub mod error;
pub mod volume;

pub use controller::{run, Context};
pub use error::Error;
