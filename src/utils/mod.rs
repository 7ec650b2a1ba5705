pub mod atomic;
pub mod digest;

pub use atomic::*;
pub use digest::*;
