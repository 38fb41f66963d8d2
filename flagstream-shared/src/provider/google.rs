/// Managed cloud pub/sub provider
///
/// The managed service is reached through a [`ManagedBackend`], which owns
/// the vendor client and its publish/receive behavior. [`GoogleClient`] adds
/// project scoping and input validation on top of it.

use crate::provider::{require, Client, ProviderError, PullerOptions};
use crate::pubsub::publisher::Publisher;
use crate::pubsub::puller::Puller;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Managed backend errors
#[derive(Error, Debug)]
pub enum ManagedError {
    #[error("managed resource not found: {0}")]
    NotFound(String),

    #[error("managed pub/sub request failed: {0}")]
    Request(String),
}

/// Managed pub/sub service
///
/// Every call names the project it applies to.
#[async_trait]
pub trait ManagedBackend: Send + Sync {
    async fn publisher(&self, project: &str, topic: &str)
        -> Result<Arc<dyn Publisher>, ManagedError>;

    async fn puller(
        &self,
        project: &str,
        subscription: &str,
        topic: &str,
        options: &PullerOptions,
    ) -> Result<Arc<dyn Puller>, ManagedError>;

    async fn subscription_exists(
        &self,
        project: &str,
        subscription: &str,
    ) -> Result<bool, ManagedError>;

    async fn delete_subscription(&self, project: &str, subscription: &str)
        -> Result<(), ManagedError>;

    async fn close(&self);
}

/// Client for the managed pub/sub service
#[derive(Clone)]
pub struct GoogleClient {
    project_id: String,
    backend: Arc<dyn ManagedBackend>,
}

impl GoogleClient {
    /// Creates a client scoped to a project
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if `project_id` is empty.
    pub fn new(
        project_id: impl Into<String>,
        backend: Arc<dyn ManagedBackend>,
    ) -> Result<Self, ProviderError> {
        let project_id = project_id.into();
        require(&project_id, "project id")?;

        Ok(Self {
            project_id,
            backend,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

#[async_trait]
impl Client for GoogleClient {
    async fn create_publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError> {
        self.create_publisher_in_project(topic, &self.project_id).await
    }

    async fn create_publisher_in_project(
        &self,
        topic: &str,
        project: &str,
    ) -> Result<Arc<dyn Publisher>, ProviderError> {
        require(topic, "topic")?;
        require(project, "project id")?;

        Ok(self.backend.publisher(project, topic).await?)
    }

    async fn create_puller(
        &self,
        subscription: &str,
        topic: &str,
        options: PullerOptions,
    ) -> Result<Arc<dyn Puller>, ProviderError> {
        require(subscription, "subscription")?;
        require(topic, "topic")?;

        tracing::info!(
            project = %self.project_id,
            subscription = %subscription,
            topic = %topic,
            "Creating managed puller"
        );

        Ok(self
            .backend
            .puller(&self.project_id, subscription, topic, &options)
            .await?)
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, ProviderError> {
        Ok(self
            .backend
            .subscription_exists(&self.project_id, subscription)
            .await?)
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), ProviderError> {
        Ok(self
            .backend
            .delete_subscription(&self.project_id, subscription)
            .await?)
    }

    async fn close(&self) {
        self.backend.close().await
    }
}
