pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, SeedCheck, SeedInfo, SeedResult, VerificationResult};
pub use repositories::{
    ApprovalRepository, InMemoryApprovalRepository, RecordFilter, RepositoryError,
    SqlApprovalRepository,
};
pub use workflow::ApprovalWorkflow;
