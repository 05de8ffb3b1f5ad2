//! The LXD endpoint as the provider sees it: a narrow capability interface,
//! its native data model, and the error classifier that interprets its
//! failures.

mod client;
pub mod errors;
pub mod models;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use client::LxdClient;
pub use models::{InstanceFull, InstanceStatePut, InstancesPost};

/// Handle to a long-running endpoint action (create, state change, delete).
#[async_trait]
pub trait Operation: Send + Sync {
    /// Block until the action reaches a terminal state or `cancel` fires.
    async fn wait(&self, cancel: &CancellationToken) -> Result<()>;
}

/// The subset of the LXD API the provider consumes.
#[async_trait]
pub trait InstanceServer: Send + Sync {
    async fn profile_names(&self) -> Result<Vec<String>>;

    async fn create_instance(&self, args: &InstancesPost) -> Result<Box<dyn Operation>>;

    async fn update_instance_state(
        &self,
        name: &str,
        state: &InstanceStatePut,
    ) -> Result<Box<dyn Operation>>;

    async fn instance_full(&self, name: &str) -> Result<InstanceFull>;

    /// Every instance in the project, containers and virtual machines alike.
    async fn instances_full(&self) -> Result<Vec<InstanceFull>>;

    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>>;
}
