pub mod bytes;
pub mod color;
