pub mod debug;
pub mod macros;
