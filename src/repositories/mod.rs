pub mod account_repository;
pub mod approval_repository;

pub use account_repository::{
    AccountRepository, RepositoryError, RepositoryResult, SqliteAccountRepository,
};
pub use approval_repository::{ApprovalRepository, SqliteApprovalRepository};
