// Domain-layer modules and shared errors/models
pub mod lead_lifecycle {
    pub use crate::lead_lifecycle::*;
}

pub mod lead_status {
    pub use crate::lead_status::*;
}

pub mod disbursement_pipeline {
    pub use crate::disbursement_pipeline::*;
}

pub mod monitor {
    pub use crate::monitor::*;
}

pub mod otp {
    pub use crate::otp::*;
}

pub mod validation {
    pub use crate::validation::*;
}

pub mod normalizer {
    pub use crate::normalizer::*;
}

pub mod models {
    pub use crate::models::*;
    pub use crate::disbursement_models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
