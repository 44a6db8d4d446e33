pub mod config;
pub mod error;
pub mod models;
pub mod modes;
pub mod proxy;
pub mod rag;
pub mod session;

pub use error::{RagError, RagResult, Stage};
pub use session::Session;
