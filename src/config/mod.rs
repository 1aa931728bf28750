pub mod loader;
pub mod models;
pub mod validation;

pub use loader::load;
pub use models::*;
pub use validation::{ServerConfigValidator, ValidationError, ValidationResult};
