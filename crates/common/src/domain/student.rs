use crate::domain::result::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Student record as the notification relay reads it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub bus_id: Option<String>,
    #[serde(default)]
    pub current_status: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Rider entry carried by a tracked bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderSummary {
    pub id: String,
    pub name: Option<String>,
    pub parent_id: Option<String>,
}

impl From<&Student> for RiderSummary {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            parent_id: student.parent_id.clone(),
        }
    }
}

/// Repository trait for student lookups
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StudentRepository: Send + Sync {
    async fn get_student(&self, student_id: &str) -> DomainResult<Option<Student>>;

    async fn list_students_by_bus(&self, bus_id: &str) -> DomainResult<Vec<Student>>;

    /// Whether `parent_id` has at least one child assigned to `bus_id`
    async fn parent_has_student_on_bus(&self, parent_id: &str, bus_id: &str)
        -> DomainResult<bool>;
}
