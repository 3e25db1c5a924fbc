// src/models/mod.rs
pub mod backend;
pub mod fare;
pub mod messages;
pub mod ride;

pub use backend::*;
pub use fare::*;
pub use messages::*;
pub use ride::*;
