// Library entry so integration tests can drive the coordination core
// without a live socket.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod websocket;

pub use config::Config;
pub use coordinator::Coordinator;
