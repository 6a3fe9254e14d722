//! External service integrations.

pub mod basic_client {
    pub use crate::basic_client::*;
}

pub mod signing {
    pub use crate::signing::*;
}

pub mod notifier {
    pub use crate::notifier::*;
}
