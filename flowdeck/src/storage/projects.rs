//! Project store

use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::project::Project;
use crate::storage::layout::StorageLayout;
use crate::storage::table::{Record, Table};

impl Record for Project {
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct ProjectStore {
    table: Table<Project>,
}

impl ProjectStore {
    pub async fn open(layout: &StorageLayout) -> Result<Self, EngineError> {
        Ok(Self {
            table: Table::open("project", layout.projects_file()).await?,
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Project> {
        self.table.get(id)
    }

    pub fn list(&self) -> Vec<Project> {
        let mut projects = self.table.list();
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        projects
    }

    /// Look a project up by slug or by id
    pub fn resolve(&self, key: &str) -> Result<Project, EngineError> {
        if let Ok(id) = key.parse::<Uuid>() {
            if let Some(project) = self.table.get(id) {
                return Ok(project);
            }
        }
        self.table
            .find(|p| p.slug == key)
            .ok_or_else(|| EngineError::NotFound(format!("project {}", key)))
    }

    /// Insert or replace a project; slugs must stay unique
    pub async fn save(&self, project: Project) -> Result<Project, EngineError> {
        validate_slug(&project.slug)?;
        if let Some(other) = self.table.find(|p| p.slug == project.slug && p.id != project.id) {
            return Err(EngineError::ValidationError(format!(
                "slug '{}' is already used by project {}",
                project.slug, other.id
            )));
        }
        self.table.upsert(project).await
    }

    pub async fn update<F>(&self, id: Uuid, change: F) -> Result<Project, EngineError>
    where
        F: FnOnce(&mut Project) -> Result<(), EngineError>,
    {
        self.table.update(id, change).await
    }
}

/// Slugs become directory, image and container names
pub fn validate_slug(slug: &str) -> Result<(), EngineError> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !slug.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::ValidationError(format!(
            "invalid slug '{}': use lowercase letters, digits, '-' and '_'",
            slug
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("shop-api_2").is_ok());
        assert!(validate_slug("Shop").is_err());
        assert!(validate_slug("a b").is_err());
        assert!(validate_slug("-rf").is_err());
        assert!(validate_slug("").is_err());
    }

    #[tokio::test]
    async fn test_resolve_by_slug_and_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(&StorageLayout::new(dir.path())).await.unwrap();
        let project = store
            .save(Project::new("blog", "Blog", "https://github.com/acme/blog.git"))
            .await
            .unwrap();

        assert_eq!(store.resolve("blog").unwrap().id, project.id);
        assert_eq!(store.resolve(&project.id.to_string()).unwrap().slug, "blog");
        assert!(matches!(store.resolve("nope"), Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_slug_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(&StorageLayout::new(dir.path())).await.unwrap();
        store
            .save(Project::new("blog", "Blog", "https://github.com/acme/blog.git"))
            .await
            .unwrap();
        let err = store
            .save(Project::new("blog", "Other", "https://github.com/acme/other.git"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }
}
