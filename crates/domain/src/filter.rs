use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::forms::{FormDefinition, QuestionType};
use crate::query::{DocField, QueryExpr};
use crate::submissions::{AnswerValue, Answers, SubmissionRecord};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub question_id: String,
    pub question_type: QuestionType,
    pub operator: FilterOperator,
    #[serde(default, alias = "value")]
    pub values: Vec<String>,
}

/// Inclusive bounds on `created_at_ms`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, at_ms: i64) -> bool {
        self.start_ms.is_none_or(|start| at_ms >= start)
            && self.end_ms.is_none_or(|end| at_ms <= end)
    }
}

/// A single compiled answer test. Scalar clauses apply to single_choice,
/// judgment and text_input answers; choice clauses to multi_choice answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnswerClause {
    TextEquals { question_id: String, value: String },
    /// Holds when the question is unanswered too.
    TextNotEquals { question_id: String, value: String },
    ChoicesIntersect { question_id: String, values: Vec<String> },
    /// Needs a list answer; an unanswered question does not match.
    ChoicesDisjoint { question_id: String, values: Vec<String> },
    /// Same length and every wanted value present; duplicates are not counted.
    ChoicesEqual { question_id: String, values: Vec<String> },
    ChoicesNotEqual { question_id: String, values: Vec<String> },
}

impl AnswerClause {
    /// `None` when the operator has no meaning for the question type; such a
    /// condition is ignored rather than rejected.
    fn compile(condition: &FilterCondition) -> DomainResult<Option<Self>> {
        let question_id = condition.question_id.clone();
        let values = condition.values.clone();
        match condition.question_type {
            QuestionType::SingleChoice | QuestionType::Judgment | QuestionType::TextInput => {
                match condition.operator {
                    FilterOperator::Equals => Ok(Some(Self::TextEquals {
                        question_id,
                        value: single_value(condition)?,
                    })),
                    FilterOperator::NotEquals => Ok(Some(Self::TextNotEquals {
                        question_id,
                        value: single_value(condition)?,
                    })),
                    FilterOperator::Contains | FilterOperator::NotContains => {
                        tracing::debug!(
                            question_id = %condition.question_id,
                            question_type = condition.question_type.as_str(),
                            operator = condition.operator.as_str(),
                            "ignoring choice operator on scalar question"
                        );
                        Ok(None)
                    }
                }
            }
            QuestionType::MultiChoice => Ok(Some(match condition.operator {
                FilterOperator::Contains => Self::ChoicesIntersect { question_id, values },
                FilterOperator::NotContains => Self::ChoicesDisjoint { question_id, values },
                FilterOperator::Equals => Self::ChoicesEqual { question_id, values },
                FilterOperator::NotEquals => Self::ChoicesNotEqual { question_id, values },
            })),
        }
    }

    fn question_id(&self) -> &str {
        match self {
            Self::TextEquals { question_id, .. }
            | Self::TextNotEquals { question_id, .. }
            | Self::ChoicesIntersect { question_id, .. }
            | Self::ChoicesDisjoint { question_id, .. }
            | Self::ChoicesEqual { question_id, .. }
            | Self::ChoicesNotEqual { question_id, .. } => question_id,
        }
    }

    fn matches(&self, answers: &Answers) -> bool {
        let answer = answers.get(self.question_id());
        match self {
            Self::TextEquals { value, .. } => text_equals(answer, value),
            Self::TextNotEquals { value, .. } => !text_equals(answer, value),
            Self::ChoicesIntersect { values, .. } => choices_intersect(answer, values),
            Self::ChoicesDisjoint { values, .. } => {
                matches!(answer, Some(AnswerValue::Choices(_))) && !choices_intersect(answer, values)
            }
            Self::ChoicesEqual { values, .. } => choices_equal(answer, values),
            Self::ChoicesNotEqual { values, .. } => !choices_equal(answer, values),
        }
    }

    fn to_query(&self) -> QueryExpr {
        let field = DocField::Answer(self.question_id().to_string());
        match self {
            Self::TextEquals { value, .. } => QueryExpr::Eq(field, value.clone().into()),
            Self::TextNotEquals { value, .. } => QueryExpr::Any(vec![
                QueryExpr::Missing(field.clone()),
                QueryExpr::not(QueryExpr::Eq(field, value.clone().into())),
            ]),
            Self::ChoicesIntersect { values, .. } => QueryExpr::Intersects(field, values.clone()),
            Self::ChoicesDisjoint { values, .. } => QueryExpr::All(vec![
                QueryExpr::IsArray(field.clone()),
                QueryExpr::not(QueryExpr::Intersects(field, values.clone())),
            ]),
            Self::ChoicesEqual { values, .. } => choices_equal_query(field, values),
            Self::ChoicesNotEqual { values, .. } => {
                QueryExpr::not(choices_equal_query(field, values))
            }
        }
    }
}

fn single_value(condition: &FilterCondition) -> DomainResult<String> {
    match condition.values.as_slice() {
        [value] => Ok(value.clone()),
        _ => Err(DomainError::Validation(format!(
            "operator {} on {} question '{}' takes exactly one value",
            condition.operator.as_str(),
            condition.question_type.as_str(),
            condition.question_id
        ))),
    }
}

fn text_equals(answer: Option<&AnswerValue>, wanted: &str) -> bool {
    matches!(answer, Some(AnswerValue::Text(text)) if text == wanted)
}

fn choices_intersect(answer: Option<&AnswerValue>, wanted: &[String]) -> bool {
    match answer {
        Some(AnswerValue::Choices(choices)) => choices.iter().any(|choice| wanted.contains(choice)),
        _ => false,
    }
}

fn choices_equal(answer: Option<&AnswerValue>, wanted: &[String]) -> bool {
    match answer {
        Some(AnswerValue::Choices(choices)) => {
            choices.len() == wanted.len() && wanted.iter().all(|value| choices.contains(value))
        }
        _ => false,
    }
}

fn choices_equal_query(field: DocField, values: &[String]) -> QueryExpr {
    QueryExpr::All(vec![
        QueryExpr::LenEq(field.clone(), values.len()),
        QueryExpr::ContainsAll(field, values.to_vec()),
    ])
}

/// A compiled filter: exact form, optional time bounds, and answer clauses
/// combined with AND. No clauses and no bounds selects the whole form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    pub form_id: u64,
    pub range: TimeRange,
    pub clauses: Vec<AnswerClause>,
}

impl Predicate {
    pub fn for_form(form_id: u64) -> Self {
        Self {
            form_id,
            range: TimeRange::default(),
            clauses: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.range == TimeRange::default() && self.clauses.is_empty()
    }

    /// In-memory evaluation over a materialised record. An undecodable
    /// answers payload behaves as if every question were unanswered.
    pub fn matches(&self, record: &SubmissionRecord) -> bool {
        if record.form_id != self.form_id || !self.range.contains(record.created_at_ms) {
            return false;
        }
        if self.clauses.is_empty() {
            return true;
        }
        let answers = record.decoded_answers().unwrap_or_default();
        self.clauses.iter().all(|clause| clause.matches(&answers))
    }

    /// Lowers the predicate to the store-side query form.
    pub fn to_query(&self) -> QueryExpr {
        let mut parts = vec![QueryExpr::Eq(DocField::FormId, self.form_id.into())];
        if let Some(start) = self.range.start_ms {
            parts.push(QueryExpr::Gte(DocField::CreatedAt, start));
        }
        if let Some(end) = self.range.end_ms {
            parts.push(QueryExpr::Lte(DocField::CreatedAt, end));
        }
        parts.extend(self.clauses.iter().map(AnswerClause::to_query));
        QueryExpr::All(parts)
    }
}

pub fn compile(
    form_id: u64,
    range: TimeRange,
    conditions: &[FilterCondition],
) -> DomainResult<Predicate> {
    if let (Some(start), Some(end)) = (range.start_ms, range.end_ms) {
        if start > end {
            return Err(DomainError::Validation(
                "start time must not be after end time".into(),
            ));
        }
    }
    let clauses = conditions
        .iter()
        .filter_map(|condition| AnswerClause::compile(condition).transpose())
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(Predicate {
        form_id,
        range,
        clauses,
    })
}

/// Like [`compile`], but first drops conditions on questions the current
/// definition does not know about.
pub fn compile_for_definition(
    form_id: u64,
    definition: &FormDefinition,
    range: TimeRange,
    conditions: &[FilterCondition],
) -> DomainResult<Predicate> {
    let known: HashSet<&str> = definition
        .questions
        .iter()
        .map(|question| question.id.as_str())
        .collect();
    let kept: Vec<FilterCondition> = conditions
        .iter()
        .filter(|condition| {
            let keep = known.contains(condition.question_id.as_str());
            if !keep {
                tracing::debug!(
                    question_id = %condition.question_id,
                    "ignoring filter on unknown question"
                );
            }
            keep
        })
        .cloned()
        .collect();
    compile(form_id, range, &kept)
}
