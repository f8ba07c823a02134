use std::collections::HashSet;

use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Certificate, StudentProgress};
use crate::store::{CertificateInsert, IssuanceStore, NewCertificate, StoreError};

/// Stand-in attendance value. Full lesson completion is already required by
/// the eligibility gate, so the template's minimum is compared against 100.
const FULL_ATTENDANCE: i32 = 100;

const CODE_PREFIX: &str = "CERT-";
const CODE_LEN: usize = 10;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_RETRIES: usize = 3;

/// Why a run of the workflow did or did not produce a certificate. Business
/// non-satisfaction is an `Ok` outcome; only store/IO trouble is an error.
#[derive(Debug)]
pub enum IssueOutcome {
    /// Not every lesson and exercise of the module is completed yet
    /// (also covers modules with no lessons and attendance below minimum).
    NotEligible,
    /// No active certificate template of type "module" exists.
    NoActiveTemplate,
    /// Average exercise score is under the template minimum.
    BelowThreshold { average: i32, required: i32 },
    /// A certificate for this (user, module) pair already exists.
    AlreadyIssued,
    Issued(Certificate),
}

impl IssueOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            IssueOutcome::NotEligible => "not_eligible",
            IssueOutcome::NoActiveTemplate => "no_active_template",
            IssueOutcome::BelowThreshold { .. } => "below_threshold",
            IssueOutcome::AlreadyIssued => "already_issued",
            IssueOutcome::Issued(_) => "issued",
        }
    }
}

#[derive(Error, Debug)]
pub enum IssueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("missing {0} record during certificate issuance")]
    MissingRecord(&'static str),
    #[error("could not allocate a unique validation code")]
    CodeExhausted,
}

/// Runs the full module-completion / certificate-issuance workflow:
/// eligibility gate, score aggregation, template thresholds, then an atomic
/// insert whose unique-pair conflict is the "already issued" signal.
pub async fn issue_module_certificate(
    store: &dyn IssuanceStore,
    user_id: Uuid,
    module_id: Uuid,
    course_id: Uuid,
) -> Result<IssueOutcome, IssueError> {
    let lessons = store.lessons_for_module(module_id).await?;
    if lessons.is_empty() {
        tracing::debug!(%module_id, "module has no lessons, nothing to certify");
        return Ok(IssueOutcome::NotEligible);
    }
    let lesson_ids: Vec<Uuid> = lessons.iter().map(|l| l.id).collect();
    let exercises = store.exercises_for_lessons(&lesson_ids).await?;
    let exercise_ids: Vec<Uuid> = exercises.iter().map(|e| e.id).collect();
    let progress = store.progress_for_user(user_id).await?;

    let (done_lessons, done_exercises) = completed_sets(&progress);
    if !is_complete(&lesson_ids, &exercise_ids, &done_lessons, &done_exercises) {
        tracing::debug!(%user_id, %module_id, "module not fully completed");
        return Ok(IssueOutcome::NotEligible);
    }

    let average = average_score(&exercise_ids, &progress);

    let Some(template) = store.active_module_template().await? else {
        tracing::warn!(%module_id, "no active module certificate template");
        return Ok(IssueOutcome::NoActiveTemplate);
    };
    let required = template.min_score.unwrap_or(0);
    if average < required {
        tracing::info!(%user_id, %module_id, average, required, "score below template minimum");
        return Ok(IssueOutcome::BelowThreshold { average, required });
    }
    if FULL_ATTENDANCE < template.min_attendance.unwrap_or(0) {
        tracing::info!(%user_id, %module_id, "attendance below template minimum");
        return Ok(IssueOutcome::NotEligible);
    }

    let profile = store
        .profile(user_id)
        .await?
        .ok_or(IssueError::MissingRecord("profile"))?;
    let module = store
        .module(module_id)
        .await?
        .ok_or(IssueError::MissingRecord("module"))?;
    let course = store
        .course(course_id)
        .await?
        .ok_or(IssueError::MissingRecord("course"))?;

    // The unique (user_id, module_id) constraint makes the insert the
    // idempotency check; a code collision just means a fresh draw.
    for _ in 0..CODE_RETRIES {
        let new = NewCertificate {
            user_id,
            module_id,
            course_name: course.title.clone(),
            student_name: profile.full_name.clone(),
            validation_code: validation_code(&mut rand::thread_rng()),
            template_id: template.id,
            hours_load: template.hours_load,
            score: average,
        };
        match store.insert_certificate(&new).await? {
            CertificateInsert::Inserted(cert) => {
                tracing::info!(
                    %user_id, %module_id, module = %module.title,
                    code = %cert.validation_code, score = average,
                    "module certificate issued"
                );
                return Ok(IssueOutcome::Issued(cert));
            }
            CertificateInsert::DuplicatePair => {
                tracing::info!(%user_id, %module_id, "certificate already issued");
                return Ok(IssueOutcome::AlreadyIssued);
            }
            CertificateInsert::DuplicateCode => continue,
        }
    }
    Err(IssueError::CodeExhausted)
}

/// Splits a user's progress rows into completed lesson ids and completed
/// exercise ids.
pub fn completed_sets(progress: &[StudentProgress]) -> (HashSet<Uuid>, HashSet<Uuid>) {
    let mut lessons = HashSet::new();
    let mut exercises = HashSet::new();
    for row in progress.iter().filter(|p| p.completed) {
        if let Some(id) = row.lesson_id {
            lessons.insert(id);
        }
        if let Some(id) = row.exercise_id {
            exercises.insert(id);
        }
    }
    (lessons, exercises)
}

/// True iff every lesson and every exercise of the module is completed.
/// Exercises do not inherit completion from their lesson.
pub fn is_complete(
    lesson_ids: &[Uuid],
    exercise_ids: &[Uuid],
    done_lessons: &HashSet<Uuid>,
    done_exercises: &HashSet<Uuid>,
) -> bool {
    lesson_ids.iter().all(|id| done_lessons.contains(id))
        && exercise_ids.iter().all(|id| done_exercises.contains(id))
}

/// Average over the module's exercises that have a recorded score, rounded to
/// the nearest integer. Unscored exercises are left out of numerator and
/// denominator; if nothing is scored the average is 0.
pub fn average_score(exercise_ids: &[Uuid], progress: &[StudentProgress]) -> i32 {
    let in_module: HashSet<Uuid> = exercise_ids.iter().copied().collect();
    let scores: Vec<i32> = progress
        .iter()
        .filter_map(|p| match (p.exercise_id, p.score) {
            (Some(id), Some(score)) if in_module.contains(&id) => Some(score),
            _ => None,
        })
        .collect();
    if scores.is_empty() {
        return 0;
    }
    let sum: i64 = scores.iter().map(|&s| s as i64).sum();
    (sum as f64 / scores.len() as f64).round() as i32
}

fn validation_code<R: Rng>(rng: &mut R) -> String {
    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_LEN);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_LEN {
        let i = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[i] as char);
    }
    code
}
