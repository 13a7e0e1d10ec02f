pub mod logger;

pub use logger::{TurnLog, TurnLogger};
