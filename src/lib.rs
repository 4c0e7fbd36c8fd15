pub mod appointment;
pub mod chain;
pub mod clock;
pub mod component;
pub mod constants;
pub mod errors;
pub mod responder;
pub mod settings;
pub mod watcher;
