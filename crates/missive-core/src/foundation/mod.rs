//! Foundational types shared by every layer.

pub mod extensions;
pub mod message;
pub mod resolver;
pub mod types;

pub use extensions::Extensions;
pub use message::{Content, Message, MessageKind, MessageStatus};
pub use resolver::{EmptyResolver, Resolved, Resolver, ServiceMap};
pub use types::TypeKey;
