// Domain-layer modules and shared errors/models
pub mod applications {
    pub use crate::applications::*;
}

pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod party_resolution {
    pub use crate::party_resolution::*;
}

pub mod progress {
    pub use crate::progress::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
