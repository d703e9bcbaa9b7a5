// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod step_schema {
    pub use crate::step_schema::*;
}
