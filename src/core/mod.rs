// Domain-layer modules and shared errors/models
pub mod flatten {
    pub use crate::flatten::*;
}

pub mod normalizer {
    pub use crate::normalizer::*;
}

pub mod dates {
    pub use crate::dates::*;
}

pub mod analytics {
    pub use crate::analytics::*;
}

pub mod accounts {
    pub use crate::accounts::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
