//! Question supplier boundary
//!
//! The supplier is an unreliable external service. It may return fewer
//! questions than requested, malformed entries, repeats of earlier questions,
//! or fail outright. Everything it returns is validated here; the session
//! only ever sees a [`QuestionRecord`] or a [`SupplierError`].

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::SupplierError,
    ids::UserId,
    question::{QuestionRecord, RawQuestion},
    scoring,
    settings::Difficulty,
};

/// Parameters of a generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Theme chosen by the admin
    pub theme: String,
    /// Requested difficulty
    pub difficulty: Difficulty,
    /// Language to generate in
    pub language: String,
    /// Number of questions wanted
    pub count: usize,
    /// Round the questions are for, starting at one
    pub round: usize,
    /// Texts of questions that must not be repeated
    pub exclusions: Vec<String>,
}

/// One answer to be judged by the supplier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckItem {
    /// Index of the question within the round
    pub question_index: usize,
    /// Who answered
    pub user_id: UserId,
    /// Question text
    pub question: String,
    /// Expected answer
    pub canonical_answer: String,
    /// Answer given
    pub answer: String,
}

/// Parameters of a check call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Theme chosen by the admin
    pub theme: String,
    /// Language of the questions
    pub language: String,
    /// Answers to judge, in order
    pub items: Vec<CheckItem>,
}

/// Verdict exactly as a supplier produced it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVerdict {
    /// Whether the answer is correct
    #[serde(default, alias = "is_correct")]
    pub correct: Option<bool>,
    /// Why
    #[serde(default)]
    pub explanation: Option<String>,
}

/// A well-formed verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the answer is correct
    pub correct: bool,
    /// Why, when the supplier said
    pub explanation: Option<String>,
}

/// External question generator and optional answer judge
#[async_trait]
pub trait QuestionSupplier: Send + Sync {
    /// Generates questions
    ///
    /// The result may contain fewer entries than requested and entries that
    /// fail validation.
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<RawQuestion>, SupplierError>;

    /// Judges the answers of a round
    ///
    /// Returns `Ok(None)` when the supplier does not judge answers, in which
    /// case answers are scored locally.
    async fn check(&self, request: &CheckRequest) -> Result<Option<Vec<RawVerdict>>, SupplierError> {
        let _ = request;
        Ok(None)
    }
}

#[async_trait]
impl<Q: QuestionSupplier + ?Sized> QuestionSupplier for Arc<Q> {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<RawQuestion>, SupplierError> {
        (**self).generate(request).await
    }

    async fn check(&self, request: &CheckRequest) -> Result<Option<Vec<RawVerdict>>, SupplierError> {
        (**self).check(request).await
    }
}

/// Bounds a supplier call in time
///
/// # Errors
///
/// * `SupplierError::Unavailable` - No response within `limit`
/// * Whatever the call itself returns
pub async fn with_deadline<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SupplierError>>,
) -> Result<T, SupplierError> {
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(SupplierError::Unavailable(format!(
            "no response within {} seconds",
            limit.as_secs()
        )))
    })
}

/// Obtains one usable question
///
/// Entries that fail validation, score too low on
/// [`QuestionRecord::quality`] or repeat an excluded text are dropped. When
/// a call yields nothing usable, up to `backfill_attempts` further calls are
/// made before giving up.
///
/// # Arguments
///
/// * `supplier` - The supplier to call
/// * `request` - What to generate; `exclusions` are compared after normalization
/// * `backfill_attempts` - Additional calls allowed after the first one
/// * `call_timeout` - How long each call may take
///
/// # Errors
///
/// * The last supplier error, when every call failed or timed out
/// * `SupplierError::Exhausted` - Calls succeeded but nothing was usable
pub async fn fetch_question<Q: QuestionSupplier + ?Sized>(
    supplier: &Q,
    request: &GenerateRequest,
    backfill_attempts: usize,
    call_timeout: Duration,
) -> Result<QuestionRecord, SupplierError> {
    let excluded: HashSet<String> = request
        .exclusions
        .iter()
        .map(|text| scoring::normalize(text))
        .collect();
    let attempts = backfill_attempts + 1;
    let mut last_error = None;
    let mut answered = false;

    for attempt in 1..=attempts {
        match with_deadline(call_timeout, supplier.generate(request)).await {
            Ok(batch) => {
                answered = true;
                let received = batch.len();
                let usable = batch
                    .into_iter()
                    .filter_map(|raw| match QuestionRecord::try_from(raw) {
                        Ok(question) => Some(question),
                        Err(reason) => {
                            debug!(%reason, "dropping supplier entry");
                            None
                        }
                    })
                    .filter(|question| {
                        let quality = question.quality();
                        if !quality.is_acceptable() {
                            debug!(
                                score = quality.score,
                                issues = ?quality.issues,
                                "dropping low quality question"
                            );
                        }
                        quality.is_acceptable()
                    })
                    .find(|question| !excluded.contains(&question.dedup_key()));

                if let Some(question) = usable {
                    return Ok(question);
                }
                warn!(attempt, received, "supplier returned no usable question");
            }
            Err(error) => {
                warn!(attempt, %error, "question generation failed");
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(error) if !answered => Err(error),
        _ => Err(SupplierError::Exhausted { attempts }),
    }
}

/// Accepts a check result only when every item has exactly one well-formed verdict
///
/// # Returns
///
/// The verdicts in item order
///
/// # Errors
///
/// * `SupplierError::Malformed` - The count differs from the items or a
///   verdict has no decision; local scoring must be used
pub fn validate_verdicts(
    items: &[CheckItem],
    verdicts: Vec<RawVerdict>,
) -> Result<Vec<Verdict>, SupplierError> {
    if verdicts.len() != items.len() {
        return Err(SupplierError::Malformed(format!(
            "expected {} verdicts, received {}",
            items.len(),
            verdicts.len()
        )));
    }

    verdicts
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            let correct = raw.correct.ok_or_else(|| {
                SupplierError::Malformed(format!("verdict {position} has no decision"))
            })?;
            Ok(Verdict {
                correct,
                explanation: raw
                    .explanation
                    .map(|text| text.trim().to_owned())
                    .filter(|text| !text.is_empty()),
            })
        })
        .collect()
}
