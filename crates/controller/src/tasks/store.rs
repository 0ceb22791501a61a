//! Collaborator interfaces for the cluster API.
//!
//! The reconciler and the admission handlers only talk to the cluster through
//! these traits so they can be exercised with mocks.

use crate::crds::{BootDependency, BootDependencyStatus};
use crate::tasks::types::Result;
use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde_json::json;
use tracing::debug;

pub const CONTROLLER_NAME: &str = "bootchain-controller";

/// Scope-aware lookup of stored dependency sets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DependencyStore: Send + Sync {
    /// The `BootDependency` named `name` in `namespace`, if one exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BootDependency>>;

    /// Every `BootDependency` in `namespace`
    async fn list(&self, namespace: &str) -> Result<Vec<BootDependency>>;
}

/// Writes the status subresource
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: BootDependencyStatus,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A Kubernetes event about a `BootDependency`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEvent {
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
}

impl DependencyEvent {
    pub fn normal(reason: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            note: note.into(),
        }
    }

    pub fn warning(reason: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            note: note.into(),
        }
    }
}

/// Publishes events against a `BootDependency`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, resource: &BootDependency, event: DependencyEvent) -> Result<()>;
}

/// Cluster-backed store
#[derive(Clone)]
pub struct KubeDependencyStore {
    client: Client,
}

impl KubeDependencyStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyStore for KubeDependencyStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BootDependency>> {
        let api: Api<BootDependency> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<BootDependency>> {
        let api: Api<BootDependency> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        debug!(namespace, count = list.items.len(), "Listed BootDependencies");
        Ok(list.items)
    }
}

/// Cluster-backed status writer
#[derive(Clone)]
pub struct KubeStatusSink {
    client: Client,
}

impl KubeStatusSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: BootDependencyStatus,
    ) -> Result<()> {
        let api: Api<BootDependency> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = json!({ "status": serde_json::to_value(&status)? });

        // Status subresource only, so the spec generation is left alone
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}

/// Cluster-backed event recorder
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, resource: &BootDependency, event: DependencyEvent) -> Result<()> {
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason,
                    note: Some(event.note),
                    action: "Reconcile".to_string(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}
