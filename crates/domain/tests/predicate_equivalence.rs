use proptest::prelude::*;
use questflow_domain::filter::{FilterCondition, FilterOperator, TimeRange, compile};
use questflow_domain::forms::QuestionType;
use questflow_domain::submissions::SubmissionRecord;
use serde_json::{Map, Value, json};

const QUESTIONS: [&str; 3] = ["q1", "q2", "q3"];
const OPTIONS: [&str; 4] = ["a", "b", "c", "d"];

fn option() -> impl Strategy<Value = String> {
    prop::sample::select(OPTIONS.to_vec()).prop_map(str::to_string)
}

/// Mostly option ids with the odd stray number mixed in.
fn mixed_item() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => option().prop_map(Value::String),
        1 => any::<i16>().prop_map(|number| json!(number)),
        1 => Just(Value::Null),
    ]
}

/// Answer shapes that reach the store: producer-admitted values plus the
/// odd scalars and mixed lists older payloads may carry.
fn answer_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        option().prop_map(Value::String),
        prop::collection::vec(option(), 0..4)
            .prop_map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        prop::collection::vec(mixed_item(), 0..4).prop_map(Value::Array),
        Just(Value::Null),
        any::<i32>().prop_map(|number| json!(number)),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn answers_document() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => prop::collection::btree_map(
            prop::sample::select(QUESTIONS.to_vec()).prop_map(str::to_string),
            answer_value(),
            0..4,
        )
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>())),
        1 => Just(json!("legacy text payload")),
        1 => Just(json!([1, 2, 3])),
    ]
}

fn record() -> impl Strategy<Value = SubmissionRecord> {
    (1u64..3, 0i64..100, answers_document()).prop_map(|(form_id, created_at_ms, answers)| {
        SubmissionRecord {
            record_id: format!("rec-{created_at_ms}"),
            envelope_id: format!("{created_at_ms}-0"),
            form_id,
            submitter_id: None,
            answers,
            client_ip: "127.0.0.1".to_string(),
            user_agent: "proptest".to_string(),
            created_at_ms,
        }
    })
}

fn condition() -> impl Strategy<Value = FilterCondition> {
    let scalar = (
        prop::sample::select(QUESTIONS.to_vec()),
        prop::sample::select(vec![
            QuestionType::SingleChoice,
            QuestionType::Judgment,
            QuestionType::TextInput,
        ]),
        prop::sample::select(vec![
            FilterOperator::Equals,
            FilterOperator::NotEquals,
            FilterOperator::Contains,
            FilterOperator::NotContains,
        ]),
        option(),
    )
        .prop_map(|(question_id, question_type, operator, value)| FilterCondition {
            question_id: question_id.to_string(),
            question_type,
            operator,
            values: vec![value],
        });
    let multi = (
        prop::sample::select(QUESTIONS.to_vec()),
        prop::sample::select(vec![
            FilterOperator::Equals,
            FilterOperator::NotEquals,
            FilterOperator::Contains,
            FilterOperator::NotContains,
        ]),
        prop::collection::vec(option(), 0..4),
    )
        .prop_map(|(question_id, operator, values)| FilterCondition {
            question_id: question_id.to_string(),
            question_type: QuestionType::MultiChoice,
            operator,
            values,
        });
    prop_oneof![scalar, multi]
}

fn time_range() -> impl Strategy<Value = TimeRange> {
    (prop::option::of(0i64..50), prop::option::of(50i64..100))
        .prop_map(|(start_ms, end_ms)| TimeRange { start_ms, end_ms })
}

proptest! {
    #[test]
    fn in_memory_and_store_evaluation_agree(
        records in prop::collection::vec(record(), 0..12),
        conditions in prop::collection::vec(condition(), 0..4),
        range in time_range(),
        form_id in 1u64..3,
    ) {
        let predicate = compile(form_id, range, &conditions).unwrap();
        let query = predicate.to_query();
        let in_memory: Vec<&str> = records
            .iter()
            .filter(|record| predicate.matches(record))
            .map(|record| record.record_id.as_str())
            .collect();
        let pushed_down: Vec<&str> = records
            .iter()
            .filter(|record| query.eval(&record.to_document()))
            .map(|record| record.record_id.as_str())
            .collect();
        prop_assert_eq!(in_memory, pushed_down);
    }

    #[test]
    fn empty_filter_selects_exactly_the_form(
        records in prop::collection::vec(record(), 0..12),
        form_id in 1u64..3,
    ) {
        let predicate = compile(form_id, TimeRange::default(), &[]).unwrap();
        for record in &records {
            prop_assert_eq!(predicate.matches(record), record.form_id == form_id);
        }
    }
}

#[test]
fn multi_choice_equals_matches_only_the_exact_set() {
    let predicate = compile(
        1,
        TimeRange::default(),
        &[FilterCondition {
            question_id: "q1".to_string(),
            question_type: QuestionType::MultiChoice,
            operator: FilterOperator::Equals,
            values: vec!["a".to_string(), "b".to_string()],
        }],
    )
    .unwrap();
    let query = predicate.to_query();
    let cases = [
        (json!({"q1": ["a", "b"]}), true),
        (json!({"q1": ["b"]}), false),
        (json!({"q1": []}), false),
        (json!({"q1": ["a", "b", "c"]}), false),
        (json!({"q1": ["a", 1, "b"]}), true),
        (json!({"q1": ["a", 1]}), false),
    ];
    for (answers, expected) in cases {
        let record = SubmissionRecord {
            record_id: "r".to_string(),
            envelope_id: "1-0".to_string(),
            form_id: 1,
            submitter_id: None,
            answers,
            client_ip: String::new(),
            user_agent: String::new(),
            created_at_ms: 0,
        };
        assert_eq!(predicate.matches(&record), expected);
        assert_eq!(query.eval(&record.to_document()), expected);
    }
}

#[test]
fn not_contains_needs_an_answered_list() {
    let predicate = compile(
        1,
        TimeRange::default(),
        &[FilterCondition {
            question_id: "q1".to_string(),
            question_type: QuestionType::MultiChoice,
            operator: FilterOperator::NotContains,
            values: vec!["a".to_string()],
        }],
    )
    .unwrap();
    let query = predicate.to_query();
    let cases = [
        (json!({"q1": ["b"]}), true),
        (json!({"q1": ["b", 1]}), true),
        (json!({"q1": ["a", 1]}), false),
        (json!({"q1": "b"}), false),
        (json!({"q1": null}), false),
        (json!({}), false),
    ];
    for (answers, expected) in cases {
        let record = SubmissionRecord {
            record_id: "r".to_string(),
            envelope_id: "1-0".to_string(),
            form_id: 1,
            submitter_id: None,
            answers,
            client_ip: String::new(),
            user_agent: String::new(),
            created_at_ms: 0,
        };
        assert_eq!(predicate.matches(&record), expected);
        assert_eq!(query.eval(&record.to_document()), expected);
    }
}
