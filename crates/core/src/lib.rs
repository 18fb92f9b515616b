//! Voice command interpretation and smart-light control.
//!
//! An utterance flows through the [`Interpreter`], which maps it onto one of
//! the commands in a [`CommandRegistry`]; the registry dispatches it, and the
//! light command drives devices through the [`device`] subsystem.

pub mod cache;
pub mod color;
pub mod command;
pub mod commands;
pub mod device;
pub mod error;
pub mod example_bank;
pub mod interpreter;
pub mod llm_client;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod speech;

pub use color::{ColorResolver, Hsv};
pub use command::{Command, CommandOutcome, CommandSpec, Example, ParamSpec, ResolvedCommand};
pub use error::{CacheError, DeviceError, RegistryError};
pub use interpreter::Interpreter;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use registry::{CommandRegistry, Dispatch};
pub use speech::{Announcer, AnnouncerHandle};
