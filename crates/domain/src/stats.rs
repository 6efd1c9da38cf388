use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::forms::{FormDefinition, Question, QuestionType};
use crate::submissions::{AnswerValue, SubmissionRecord};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionStat {
    pub option_id: String,
    pub text: String,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSummary {
    OptionStats(Vec<OptionStat>),
    TextAnswers(Vec<String>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionStat {
    pub question_id: String,
    pub question_type: QuestionType,
    pub title: String,
    #[serde(flatten)]
    pub summary: QuestionSummary,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormStats {
    pub total_submissions: usize,
    pub question_stats: Vec<QuestionStat>,
}

enum Tally<'a> {
    Options {
        slots: HashMap<&'a str, usize>,
        counts: Vec<usize>,
    },
    Text(Vec<String>),
}

impl<'a> Tally<'a> {
    fn for_question(question: &'a Question) -> Self {
        match question.question_type {
            QuestionType::SingleChoice | QuestionType::MultiChoice | QuestionType::Judgment => {
                let mut slots = HashMap::with_capacity(question.options.len());
                for (index, option) in question.options.iter().enumerate() {
                    slots.entry(option.id.as_str()).or_insert(index);
                }
                Self::Options {
                    slots,
                    counts: vec![0; question.options.len()],
                }
            }
            QuestionType::TextInput => Self::Text(Vec::new()),
        }
    }

    fn observe(&mut self, question_type: QuestionType, answer: &AnswerValue) {
        match (self, question_type, answer) {
            (
                Self::Options { slots, counts },
                QuestionType::SingleChoice | QuestionType::Judgment,
                AnswerValue::Text(option_id),
            ) => bump(slots, counts, option_id),
            (Self::Options { slots, counts }, QuestionType::MultiChoice, AnswerValue::Choices(ids)) => {
                for option_id in ids {
                    bump(slots, counts, option_id);
                }
            }
            (Self::Text(answers), QuestionType::TextInput, AnswerValue::Text(text)) => {
                if !text.trim().is_empty() {
                    answers.push(text.clone());
                }
            }
            _ => {}
        }
    }

    fn finish(self, question: &Question) -> QuestionSummary {
        match self {
            Self::Options { counts, .. } => QuestionSummary::OptionStats(
                question
                    .options
                    .iter()
                    .zip(counts)
                    .map(|(option, count)| OptionStat {
                        option_id: option.id.clone(),
                        text: option.text.clone(),
                        count,
                    })
                    .collect(),
            ),
            Self::Text(answers) => QuestionSummary::TextAnswers(answers),
        }
    }
}

fn bump(slots: &HashMap<&str, usize>, counts: &mut [usize], option_id: &str) {
    if let Some(&slot) = slots.get(option_id) {
        counts[slot] += 1;
    }
}

/// Summarises `records` against `definition`.
///
/// `total_submissions` counts every record, including ones whose answers
/// cannot be decoded; those are otherwise skipped. Answers to questions the
/// definition does not have and unknown option ids are ignored. Text answers
/// keep the order of `records`.
pub fn aggregate(definition: &FormDefinition, records: &[SubmissionRecord]) -> FormStats {
    let mut tallies: Vec<Tally<'_>> = definition
        .questions
        .iter()
        .map(Tally::for_question)
        .collect();
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(definition.questions.len());
    for (index, question) in definition.questions.iter().enumerate() {
        positions.entry(question.id.as_str()).or_insert(index);
    }

    let mut skipped = 0usize;
    for record in records {
        let Ok(answers) = record.decoded_answers() else {
            skipped += 1;
            continue;
        };
        for (question_id, answer) in &answers {
            if let Some(&index) = positions.get(question_id.as_str()) {
                tallies[index].observe(definition.questions[index].question_type, answer);
            }
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "skipped records with undecodable answers");
    }

    let question_stats = definition
        .questions
        .iter()
        .zip(tallies)
        .map(|(question, tally)| QuestionStat {
            question_id: question.id.clone(),
            question_type: question.question_type,
            title: question.title.clone(),
            summary: tally.finish(question),
        })
        .collect();

    FormStats {
        total_submissions: records.len(),
        question_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> FormDefinition {
        FormDefinition::parse(&json!({
            "questions": [
                {
                    "id": "q1",
                    "type": "multi_choice",
                    "title": "Fruits",
                    "options": [
                        {"id": "a", "text": "Apple"},
                        {"id": "b", "text": "Banana"},
                        {"id": "c", "text": "Cherry"}
                    ]
                },
                {
                    "id": "q2",
                    "type": "judgment",
                    "title": "Agree?",
                    "options": [{"id": "yes", "text": "Yes"}, {"id": "no", "text": "No"}]
                },
                {"id": "q3", "type": "text_input", "title": "Comments"}
            ]
        }))
        .unwrap()
    }

    fn record(index: i64, answers: serde_json::Value) -> SubmissionRecord {
        SubmissionRecord {
            record_id: format!("rec-{index}"),
            envelope_id: format!("{index}-0"),
            form_id: 1,
            submitter_id: None,
            answers,
            client_ip: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            created_at_ms: index,
        }
    }

    fn option_counts(stats: &FormStats, index: usize) -> Vec<(String, usize)> {
        match &stats.question_stats[index].summary {
            QuestionSummary::OptionStats(options) => options
                .iter()
                .map(|option| (option.option_id.clone(), option.count))
                .collect(),
            QuestionSummary::TextAnswers(_) => panic!("expected option stats"),
        }
    }

    #[test]
    fn multi_choice_counts_every_selected_option() {
        let records = vec![
            record(1, json!({"q1": ["a", "b"]})),
            record(2, json!({"q1": ["b"]})),
            record(3, json!({"q1": []})),
        ];
        let stats = aggregate(&definition(), &records);
        assert_eq!(stats.total_submissions, 3);
        assert_eq!(
            option_counts(&stats, 0),
            vec![("a".into(), 1), ("b".into(), 2), ("c".into(), 0)]
        );
    }

    #[test]
    fn every_option_is_listed_even_without_answers() {
        let stats = aggregate(&definition(), &[]);
        assert_eq!(stats.total_submissions, 0);
        assert_eq!(
            option_counts(&stats, 1),
            vec![("yes".into(), 0), ("no".into(), 0)]
        );
        assert_eq!(
            stats.question_stats[2].summary,
            QuestionSummary::TextAnswers(vec![])
        );
    }

    #[test]
    fn unknown_options_questions_and_shapes_are_ignored() {
        let records = vec![
            record(1, json!({"q2": "maybe", "q9": "yes"})),
            record(2, json!({"q2": ["yes"], "q1": "a"})),
            record(3, json!({"q2": "yes"})),
        ];
        let stats = aggregate(&definition(), &records);
        assert_eq!(
            option_counts(&stats, 1),
            vec![("yes".into(), 1), ("no".into(), 0)]
        );
        assert_eq!(
            option_counts(&stats, 0),
            vec![("a".into(), 0), ("b".into(), 0), ("c".into(), 0)]
        );
    }

    #[test]
    fn undecodable_records_count_toward_total_only() {
        let records = vec![
            record(1, json!("garbage")),
            record(2, json!({"q2": "no"})),
        ];
        let stats = aggregate(&definition(), &records);
        assert_eq!(stats.total_submissions, 2);
        assert_eq!(
            option_counts(&stats, 1),
            vec![("yes".into(), 0), ("no".into(), 1)]
        );
    }

    #[test]
    fn text_answers_skip_blanks_and_keep_record_order() {
        let records = vec![
            record(1, json!({"q3": "first"})),
            record(2, json!({"q3": "   "})),
            record(3, json!({"q3": ""})),
            record(4, json!({"q3": "second"})),
        ];
        let stats = aggregate(&definition(), &records);
        assert_eq!(
            stats.question_stats[2].summary,
            QuestionSummary::TextAnswers(vec!["first".into(), "second".into()])
        );
    }

    #[test]
    fn serialises_with_flattened_summary() {
        let stats = aggregate(&definition(), &[record(1, json!({"q3": "hi"}))]);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["question_stats"][2]["text_answers"], json!(["hi"]));
        assert_eq!(value["question_stats"][0]["option_stats"][0]["text"], json!("Apple"));
        assert_eq!(value["question_stats"][1]["question_type"], json!("judgment"));
    }
}
