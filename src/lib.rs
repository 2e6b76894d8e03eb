//! A cookie store engine.
//!
//! [`CookieEngine`] keeps cookies in memory, mirrors them to an optional
//! [`PersistentCookieStore`](cookies::PersistentCookieStore), enforces the per-domain
//! and global limits and notifies subscribers of every change. Run it on tokio with
//! [`CookieEngine::start`] and talk to it through a [`CookieEngineHandle`].

pub mod engine;

pub use engine::*;
