pub mod audience;
pub mod brand;
pub mod caption;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod package;
pub mod policy;
pub mod prompt;
pub mod types;
