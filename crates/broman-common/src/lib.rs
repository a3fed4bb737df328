pub mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::{Message, Role, last_user_text};
