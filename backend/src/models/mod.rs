//! Domain model for heart-rate samples and the changes that flow through the
//! real-time pipeline.

pub mod change;
pub mod macros;
pub mod sample;
pub mod window;

pub use change::*;
pub use sample::*;
pub use window::*;
