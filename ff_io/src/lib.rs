pub mod db;
pub mod manager;
pub mod remote;
pub mod retry;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use db::{DeployDb, DeployedRef};
pub use manager::{BuildManager, PullOptions, REMOTE_PREFIX};
pub use remote::Remote;
pub use retry::{retry, retry_with};
pub use store::{CommitState, ContentStore, ScopedBuildConfig, Transaction};
pub use traits::{HttpRemoteSource, RemoteSource};
