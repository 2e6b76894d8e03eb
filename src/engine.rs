pub mod cookies;

mod config;
mod engine;
mod errors;
mod events;
mod handle;
mod sequence;

pub use config::*;
pub use engine::CookieEngine;
pub use engine::CookiePredicate;
pub use engine::ReadyState;
pub use engine::TimeRange;
pub use errors::EngineError;
pub use events::CookieCommand;
pub use handle::CookieEngineHandle;
pub use sequence::SequenceTask;
pub use sequence::SequencedTaskRunner;
