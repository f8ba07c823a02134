use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub role: String,
    pub xp: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Module {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub xp_reward: i32,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Exercise {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub title: String,
    // raw JSONB; parse with `Exercise::content()` before use
    pub content: serde_json::Value,
    pub xp_reward: i32,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// Exercise payload, validated at the storage boundary instead of being
/// poked at as loose JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExerciseContent {
    MultipleChoice {
        question: String,
        options: Vec<String>,
        correct_option: usize,
    },
    Code {
        prompt: String,
        test_cases: Vec<CodeTestCase>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CodeTestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Error, Debug)]
#[error("exercise {exercise_id} has malformed content: {source}")]
pub struct ContentError {
    pub exercise_id: Uuid,
    #[source]
    pub source: serde_json::Error,
}

impl Exercise {
    pub fn content(&self) -> Result<ExerciseContent, ContentError> {
        serde_json::from_value(self.content.clone()).map_err(|source| ContentError {
            exercise_id: self.id,
            source,
        })
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct StudentProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lesson_id: Option<Uuid>,
    pub exercise_id: Option<Uuid>,
    pub completed: bool,
    pub score: Option<i32>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct CertificateTemplate {
    pub id: Uuid,
    pub name: String,
    pub template_type: String,
    pub min_score: Option<i32>,
    pub min_attendance: Option<i32>,
    pub hours_load: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub course_name: String,
    pub student_name: String,
    pub validation_code: String,
    pub issued_at: DateTime<Utc>,
    pub template_id: Uuid,
    pub hours_load: i32,
    pub score: i32,
    // filled in later by the external renderer
    pub pdf_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompleteExerciseReq {
    pub score: Option<i32>,
}
