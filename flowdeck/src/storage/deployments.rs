//! Deployment history store

use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::deployment::Deployment;
use crate::storage::layout::StorageLayout;
use crate::storage::table::{Record, Table};

impl Record for Deployment {
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct DeploymentStore {
    table: Table<Deployment>,
}

impl DeploymentStore {
    pub async fn open(layout: &StorageLayout) -> Result<Self, EngineError> {
        Ok(Self {
            table: Table::open("deployment", layout.deployments_file()).await?,
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Deployment> {
        self.table.get(id)
    }

    pub fn require(&self, id: Uuid) -> Result<Deployment, EngineError> {
        self.table.require(id)
    }

    pub async fn insert(&self, deployment: Deployment) -> Result<Deployment, EngineError> {
        self.table.upsert(deployment).await
    }

    pub async fn update<F>(&self, id: Uuid, change: F) -> Result<Deployment, EngineError>
    where
        F: FnOnce(&mut Deployment) -> Result<(), EngineError>,
    {
        self.table.update(id, change).await
    }

    /// The pending or running deployment of a project, if any
    pub fn active_for(&self, project_id: Uuid) -> Option<Deployment> {
        self.table
            .find(|d| d.project_id == project_id && d.is_active())
    }

    /// All deployments of a project, newest first
    pub fn for_project(&self, project_id: Uuid) -> Vec<Deployment> {
        let mut deployments = self.table.filter(|d| d.project_id == project_id);
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deployments
    }

    pub fn recent(&self, project_id: Uuid, limit: usize) -> Vec<Deployment> {
        let mut deployments = self.for_project(project_id);
        deployments.truncate(limit);
        deployments
    }

    /// Success-class deployments with a commit, newest first
    pub fn rollback_points(&self, project_id: Uuid, limit: usize) -> Vec<Deployment> {
        let mut points: Vec<Deployment> = self
            .for_project(project_id)
            .into_iter()
            .filter(|d| d.status.is_success_class() && d.commit_hash.is_some())
            .collect();
        points.truncate(limit);
        points
    }
}
