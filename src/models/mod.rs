pub mod chart;
pub mod datetime;
pub mod enums;
pub mod evidence;
pub mod result;

pub use chart::*;
pub use enums::*;
pub use evidence::*;
pub use result::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid value '{value}' for {field}")]
    InvalidEnum { field: String, value: String },
}
