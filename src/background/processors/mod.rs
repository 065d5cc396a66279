pub mod image;
pub mod setup;
pub mod transformer;
