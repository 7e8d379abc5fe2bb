//! Who is calling, and which trust tree they see.

mod access;
mod identity;
mod registration;
mod resolver;

pub use access::{AccessController, AuthError, HeaderAccessController, TestingAccessController};
pub use identity::{Identity, Tree};
pub use registration::{OperatorKeys, RegistrationError, RootRegistration};
pub use resolver::{RootResolver, TreeSelector};
