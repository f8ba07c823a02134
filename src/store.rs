use async_trait::async_trait;
use sqlx::query_as;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Db;
use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Certificate to be persisted; `issued_at` and `id` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub course_name: String,
    pub student_name: String,
    pub validation_code: String,
    pub template_id: Uuid,
    pub hours_load: i32,
    pub score: i32,
}

/// Result of the issuance insert. The two duplicate cases map to the unique
/// constraints on certificates, so "already issued" and "code collision" are
/// decided by the database, not by a prior read.
#[derive(Debug)]
pub enum CertificateInsert {
    Inserted(Certificate),
    DuplicatePair,
    DuplicateCode,
}

/// Reads and the single write the issuance workflow performs. Kept as a trait
/// so the workflow can run against an in-memory store in tests.
#[async_trait]
pub trait IssuanceStore: Send + Sync {
    async fn lessons_for_module(&self, module_id: Uuid) -> Result<Vec<Lesson>, StoreError>;
    async fn exercises_for_lessons(&self, lesson_ids: &[Uuid]) -> Result<Vec<Exercise>, StoreError>;
    async fn progress_for_user(&self, user_id: Uuid) -> Result<Vec<StudentProgress>, StoreError>;
    async fn active_module_template(&self) -> Result<Option<CertificateTemplate>, StoreError>;
    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError>;
    async fn module(&self, module_id: Uuid) -> Result<Option<Module>, StoreError>;
    async fn course(&self, course_id: Uuid) -> Result<Option<Course>, StoreError>;
    async fn insert_certificate(&self, new: &NewCertificate)
        -> Result<CertificateInsert, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn lesson(&self, id: Uuid) -> Result<Option<Lesson>, StoreError> {
        Ok(query_as::<_, Lesson>("SELECT * FROM lessons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn exercise(&self, id: Uuid) -> Result<Option<Exercise>, StoreError> {
        Ok(query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    /// Marks a lesson complete. Returns true only for the first completion,
    /// so XP is awarded once.
    pub async fn complete_lesson(&self, user_id: Uuid, lesson_id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            INSERT INTO student_progress (user_id, lesson_id, completed, completed_at)
            VALUES ($1, $2, true, now())
            ON CONFLICT (user_id, lesson_id) WHERE lesson_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Marks an exercise complete with an optional score. A repeat completion
    /// keeps the row and updates the score when a new one is supplied.
    pub async fn complete_exercise(
        &self,
        user_id: Uuid,
        exercise_id: Uuid,
        score: Option<i32>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            INSERT INTO student_progress (user_id, exercise_id, completed, score, completed_at)
            VALUES ($1, $2, true, $3, now())
            ON CONFLICT (user_id, exercise_id) WHERE exercise_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(exercise_id)
        .bind(score)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 1 {
            return Ok(true);
        }
        sqlx::query(
            r#"
            UPDATE student_progress SET score = COALESCE($3, score)
            WHERE user_id = $1 AND exercise_id = $2
            "#,
        )
        .bind(user_id)
        .bind(exercise_id)
        .bind(score)
        .execute(&self.db)
        .await?;
        Ok(false)
    }

    pub async fn award_xp(&self, user_id: Uuid, amount: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE profiles SET xp = xp + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn xp_total(&self, user_id: Uuid) -> Result<Option<i64>, StoreError> {
        Ok(sqlx::query_scalar("SELECT xp FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn certificates_for_user(&self, user_id: Uuid) -> Result<Vec<Certificate>, StoreError> {
        Ok(query_as::<_, Certificate>(
            "SELECT * FROM certificates WHERE user_id = $1 ORDER BY issued_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn certificate_by_code(&self, code: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(
            query_as::<_, Certificate>("SELECT * FROM certificates WHERE validation_code = $1")
                .bind(code)
                .fetch_optional(&self.db)
                .await?,
        )
    }
}

#[async_trait]
impl IssuanceStore for PgStore {
    async fn lessons_for_module(&self, module_id: Uuid) -> Result<Vec<Lesson>, StoreError> {
        Ok(
            query_as::<_, Lesson>("SELECT * FROM lessons WHERE module_id = $1 ORDER BY position")
                .bind(module_id)
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn exercises_for_lessons(&self, lesson_ids: &[Uuid]) -> Result<Vec<Exercise>, StoreError> {
        Ok(
            query_as::<_, Exercise>("SELECT * FROM exercises WHERE lesson_id = ANY($1)")
                .bind(lesson_ids)
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn progress_for_user(&self, user_id: Uuid) -> Result<Vec<StudentProgress>, StoreError> {
        Ok(
            query_as::<_, StudentProgress>("SELECT * FROM student_progress WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn active_module_template(&self) -> Result<Option<CertificateTemplate>, StoreError> {
        // deterministic pick when several are active: most recently updated wins
        Ok(query_as::<_, CertificateTemplate>(
            r#"
            SELECT * FROM certificate_templates
            WHERE template_type = 'module' AND is_active = true
            ORDER BY updated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.db)
        .await?)
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn module(&self, module_id: Uuid) -> Result<Option<Module>, StoreError> {
        Ok(query_as::<_, Module>("SELECT * FROM modules WHERE id = $1")
            .bind(module_id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn course(&self, course_id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn insert_certificate(
        &self,
        new: &NewCertificate,
    ) -> Result<CertificateInsert, StoreError> {
        let inserted = query_as::<_, Certificate>(
            r#"
            INSERT INTO certificates
                (user_id, module_id, course_name, student_name, validation_code,
                 template_id, hours_load, score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(new.module_id)
        .bind(&new.course_name)
        .bind(&new.student_name)
        .bind(&new.validation_code)
        .bind(new.template_id)
        .bind(new.hours_load)
        .bind(new.score)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(cert) => Ok(CertificateInsert::Inserted(cert)),
            Err(e) => {
                let constraint = e
                    .as_database_error()
                    .and_then(|d| d.constraint())
                    .map(str::to_owned);
                match constraint.as_deref() {
                    Some("certificates_user_module_key") => Ok(CertificateInsert::DuplicatePair),
                    Some("certificates_validation_code_key") => Ok(CertificateInsert::DuplicateCode),
                    _ => Err(e.into()),
                }
            }
        }
    }
}
