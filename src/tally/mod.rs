//! Aggregation under k-anonymity.
//!
//! Two privacy mechanisms stack on top of the raw counts:
//!
//! 1. Overall option totals are released only once the poll has at least `k`
//!    ballots; until then every cell reads "below threshold".
//! 2. Demographic breakdowns suppress every cell with fewer than `k` members,
//!    and when exactly one cell of a group is suppressed, the next smallest
//!    cell is suppressed too - the hidden count must not be recoverable by
//!    subtraction from the group total.
//!
//! Optional Laplace noise (configurable ε) perturbs released breakdown
//! counts. The noise is seeded from the poll and cell identity, so the same
//! inputs always release the same numbers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::store::polls::{PollOption, SurveyQuestion};
use crate::store::votes::VoteRow;

/// Demographic axis for a breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Gender,
    BirthBucket,
    Region,
}

impl Dimension {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "gender" => Some(Dimension::Gender),
            "birth_bucket" => Some(Dimension::BirthBucket),
            "region" => Some(Dimension::Region),
            _ => None,
        }
    }

    fn of(self, vote: &VoteRow) -> String {
        match self {
            Dimension::Gender => vote.gender.clone(),
            Dimension::BirthBucket => vote.birth_bucket.clone(),
            Dimension::Region => vote.region_code.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TallyConfig {
    pub k: u32,
    /// Laplace ε when noise is enabled.
    pub noise_epsilon: Option<f64>,
}

/// One released (or withheld) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedCell {
    pub label: String,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionResult {
    pub option_id: String,
    pub label: String,
    pub cell: ReportedCell,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<ReportedCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub prompt: String,
    pub options: Vec<OptionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollResults {
    pub poll_id: String,
    pub total_votes: u64,
    /// True when the poll-level threshold withheld the totals.
    pub suppressed: bool,
    pub options: Vec<OptionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<QuestionResult>,
}

/// 10-year birth bucket recorded on each ballot ("1990s", "2000s", ...).
pub fn birth_bucket(birth_year: i32) -> String {
    format!("{}s", (birth_year / 10) * 10)
}

/// Suppress a group of cells under k with complementary suppression.
pub fn suppress_group(cells: &[(String, u64)], k: u32) -> Vec<ReportedCell> {
    let mut reported: Vec<ReportedCell> = cells
        .iter()
        .map(|(label, count)| ReportedCell {
            label: label.clone(),
            suppressed: *count < k as u64,
            count: Some(*count as i64),
        })
        .collect();

    let suppressed_count = reported.iter().filter(|c| c.suppressed).count();
    if suppressed_count == 1 {
        // Hide the next smallest cell too, so subtraction from the group
        // total cannot recover the suppressed one.
        let next_smallest = reported
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.suppressed)
            .min_by_key(|(_, c)| c.count.unwrap_or(0))
            .map(|(i, _)| i);
        if let Some(i) = next_smallest {
            reported[i].suppressed = true;
        }
    }

    for cell in &mut reported {
        if cell.suppressed {
            cell.count = None;
        }
    }
    reported
}

/// Deterministic Laplace(1/ε) noise for one cell.
fn laplace_noise(poll_id: &str, cell_key: &str, epsilon: f64) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(poll_id.as_bytes());
    hasher.update(b"|");
    hasher.update(cell_key.as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    let mut rng = StdRng::from_seed(seed);
    // Inverse-CDF sampling from a uniform in (-0.5, 0.5).
    let u: f64 = rng.gen_range(-0.499_999..0.499_999);
    let noise = -(1.0 / epsilon) * u.signum() * (1.0 - 2.0 * u.abs()).ln();
    noise.round() as i64
}

fn apply_noise(cell: &mut ReportedCell, poll_id: &str, cell_key: &str, epsilon: Option<f64>) {
    if let (Some(eps), Some(count)) = (epsilon, cell.count) {
        cell.count = Some((count + laplace_noise(poll_id, cell_key, eps)).max(0));
    }
}

/// Aggregate a poll's ballots.
pub fn tally(
    poll_id: &str,
    votes: &[VoteRow],
    options: &[PollOption],
    questions: &[SurveyQuestion],
    config: &TallyConfig,
    dimension: Option<Dimension>,
) -> PollResults {
    let total_votes = votes.len() as u64;
    let below_threshold = total_votes < config.k as u64;

    let mut option_results = Vec::with_capacity(options.len());
    for option in options {
        let count = votes
            .iter()
            .filter(|v| v.option_id.as_deref() == Some(option.id.as_str()))
            .count() as u64;

        let cell = if below_threshold {
            ReportedCell {
                label: option.label.clone(),
                suppressed: true,
                count: None,
            }
        } else {
            ReportedCell {
                label: option.label.clone(),
                suppressed: false,
                count: Some(count as i64),
            }
        };

        let breakdown = match (dimension, below_threshold) {
            (Some(dim), false) => {
                let mut cells: BTreeMap<String, u64> = BTreeMap::new();
                for vote in votes
                    .iter()
                    .filter(|v| v.option_id.as_deref() == Some(option.id.as_str()))
                {
                    *cells.entry(dim.of(vote)).or_insert(0) += 1;
                }
                let grouped: Vec<(String, u64)> = cells.into_iter().collect();
                let mut reported = suppress_group(&grouped, config.k);
                for cell in &mut reported {
                    let key = format!("{}|{}", option.id, cell.label);
                    apply_noise(cell, poll_id, &key, config.noise_epsilon);
                }
                reported
            }
            _ => Vec::new(),
        };

        option_results.push(OptionResult {
            option_id: option.id.clone(),
            label: option.label.clone(),
            cell,
            breakdown,
        });
    }

    let mut question_results = Vec::with_capacity(questions.len());
    for question in questions {
        let mut per_option = Vec::with_capacity(question.options.len());
        for option in &question.options {
            let count = votes
                .iter()
                .filter_map(|v| v.survey_response.as_ref())
                .filter(|resp| {
                    resp.get(question.id.as_str())
                        .and_then(|v| v.as_str())
                        .map(|selected| selected == option.id)
                        .unwrap_or(false)
                })
                .count() as u64;
            let cell = if below_threshold {
                ReportedCell {
                    label: option.label.clone(),
                    suppressed: true,
                    count: None,
                }
            } else {
                ReportedCell {
                    label: option.label.clone(),
                    suppressed: false,
                    count: Some(count as i64),
                }
            };
            per_option.push(OptionResult {
                option_id: option.id.clone(),
                label: option.label.clone(),
                cell,
                breakdown: Vec::new(),
            });
        }
        question_results.push(QuestionResult {
            question_id: question.id.clone(),
            prompt: question.prompt.clone(),
            options: per_option,
        });
    }

    PollResults {
        poll_id: poll_id.to_string(),
        total_votes,
        suppressed: below_threshold,
        options: option_results,
        questions: question_results,
    }
}
