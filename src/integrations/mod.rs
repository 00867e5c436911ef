//! External service integrations.

pub mod thumbtack_client {
    pub use crate::thumbtack_client::*;
}

pub mod webhook_models {
    pub use crate::webhook_models::*;
}
