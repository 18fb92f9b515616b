//! Built-in commands.

pub mod light;
pub mod time;

pub use light::LightCommand;
pub use time::TimeCommand;
