use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const TOTAL_QUESTIONS: u8 = 20;
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Likert answers keyed by 1-based question number.
pub type SurveyResponses = BTreeMap<u8, u8>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SurveyCategory {
    Technology,
    Environment,
    Governance,
    Economy,
    Social,
}

impl SurveyCategory {
    pub const ALL: [Self; 5] =
        [Self::Technology, Self::Environment, Self::Governance, Self::Economy, Self::Social];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technology => "technology",
            Self::Environment => "environment",
            Self::Governance => "governance",
            Self::Economy => "economy",
            Self::Social => "social",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Technology => "Technology & Innovation",
            Self::Environment => "Environmental Policy",
            Self::Governance => "Governance & Transparency",
            Self::Economy => "Economic Development",
            Self::Social => "Social Impact",
        }
    }

    /// Question numbers that feed this category. Questions may feed several.
    #[must_use]
    pub fn questions(self) -> &'static [u8] {
        match self {
            Self::Technology => &[2, 7, 9, 11, 13, 15],
            Self::Environment => &[1, 8, 16, 20],
            Self::Governance => &[3, 11, 18, 20],
            Self::Economy => &[5, 6, 17, 18],
            Self::Social => &[10, 12, 14, 19],
        }
    }

    #[must_use]
    pub fn description(self, score: f64) -> &'static str {
        let high = score >= 4.0;
        match (self, high) {
            (Self::Technology, true) => {
                "You strongly support government investment in technology and innovation initiatives."
            }
            (Self::Technology, false) => {
                "You have moderate support for technology initiatives in government."
            }
            (Self::Environment, true) => {
                "You are highly aligned with environmental protection and renewable energy policies."
            }
            (Self::Environment, false) => {
                "You show moderate support for environmental policy initiatives."
            }
            (Self::Governance, true) => {
                "You strongly value transparency and accountability in government operations."
            }
            (Self::Governance, false) => {
                "You support governance improvements with some reservations."
            }
            (Self::Economy, true) => {
                "You strongly support policies that promote economic development and innovation."
            }
            (Self::Economy, false) => {
                "You have moderate support for economic development initiatives."
            }
            (Self::Social, true) => {
                "You are highly committed to social equity and community empowerment."
            }
            (Self::Social, false) => "You support social initiatives with some considerations.",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    VeryStrongSupport,
    StrongSupport,
    ModerateSupport,
    MixedViews,
    SomeOpposition,
    StrongOpposition,
}

impl SupportLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 4.5 {
            Self::VeryStrongSupport
        } else if score >= 4.0 {
            Self::StrongSupport
        } else if score >= 3.5 {
            Self::ModerateSupport
        } else if score >= 2.5 {
            Self::MixedViews
        } else if score >= 2.0 {
            Self::SomeOpposition
        } else {
            Self::StrongOpposition
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::VeryStrongSupport => "Very Strong Support",
            Self::StrongSupport => "Strong Support",
            Self::ModerateSupport => "Moderate Support",
            Self::MixedViews => "Mixed Views",
            Self::SomeOpposition => "Some Opposition",
            Self::StrongOpposition => "Strong Opposition",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub category: SurveyCategory,
    pub label: String,
    pub score: f64,
    pub count: u32,
    pub support_level: SupportLevel,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyProfile {
    pub answered: usize,
    pub total_questions: u8,
    pub categories: Vec<CategoryScore>,
}

impl SurveyProfile {
    /// Best `n` categories by score, keeping category order among ties.
    #[must_use]
    pub fn top_categories(&self, n: usize) -> Vec<&CategoryScore> {
        let mut ranked = self.categories.iter().collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        ranked.truncate(n);
        ranked
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.answered == usize::from(self.total_questions)
    }
}

/// Average the answered questions of every fixed category.
///
/// # Errors
/// Returns [`CoreError::Validation`] when a question number is outside
/// `1..=TOTAL_QUESTIONS` or a score is outside `MIN_SCORE..=MAX_SCORE`.
pub fn score_survey(responses: &SurveyResponses) -> Result<SurveyProfile, CoreError> {
    for (question, score) in responses {
        if !(1..=TOTAL_QUESTIONS).contains(question) {
            return Err(CoreError::Validation(format!(
                "question {question} MUST be in 1..={TOTAL_QUESTIONS}"
            )));
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(score) {
            return Err(CoreError::Validation(format!(
                "score for question {question} MUST be in {MIN_SCORE}..={MAX_SCORE}, got {score}"
            )));
        }
    }

    let categories = SurveyCategory::ALL
        .iter()
        .filter_map(|category| {
            let (sum, count) = category
                .questions()
                .iter()
                .filter_map(|question| responses.get(question))
                .fold((0_u32, 0_u32), |(sum, count), score| (sum + u32::from(*score), count + 1));
            if count == 0 {
                return None;
            }
            let score = f64::from(sum) / f64::from(count);
            Some(CategoryScore {
                category: *category,
                label: category.label().to_string(),
                score,
                count,
                support_level: SupportLevel::from_score(score),
                description: category.description(score).to_string(),
            })
        })
        .collect();

    Ok(SurveyProfile { answered: responses.len(), total_questions: TOTAL_QUESTIONS, categories })
}
