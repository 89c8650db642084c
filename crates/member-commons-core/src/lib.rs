use std::cmp::Ordering;

use serde_json::{Map, Value};

mod recommend;
mod survey;
mod table;

pub use recommend::{known_preferences, recommend_projects, PreferenceFilter, PREFERENCE_FILTERS};
pub use survey::{
    score_survey, CategoryScore, SupportLevel, SurveyCategory, SurveyProfile, SurveyResponses,
    MAX_SCORE, MIN_SCORE, TOTAL_QUESTIONS,
};
pub use table::RecordTable;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// One item of a backend list response.
pub type Record = Map<String, Value>;

/// A [`Record`] with every nested mapping merged into dotted-path keys.
pub type FlatRecord = Map<String, Value>;

/// A [`FlatRecord`] after prefix stripping, identifier ordering, and title synthesis.
pub type NormalizedRecord = Map<String, Value>;

pub const TITLE_KEY: &str = "title";

/// Flattened keys searched for a title, in priority order.
const FLATTENED_TITLE_PATHS: [&str; 7] = [
    "project_description",
    "projectDescription",
    "description.project",
    "project.description",
    "data.project_description",
    "content.project_description",
    "details.project_description",
];

/// The same candidates walked directly on the unflattened record.
const NESTED_TITLE_PATHS: [&[&str]; 7] = [
    &["project_description"],
    &["projectDescription"],
    &["description", "project"],
    &["project", "description"],
    &["data", "project_description"],
    &["content", "project_description"],
    &["details", "project_description"],
];

const DESCRIPTION_KEYS: [&str; 3] = ["project_description", "projectDescription", "description"];
const DESCRIPTION_MARKERS: [&str; 2] = ["project_description", "projectDescription"];

/// Result of normalizing a backend payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    /// The payload was a list; object items were normalized, anything else kept as-is.
    Normalized(Vec<Value>),
    /// The payload was not a list and is handed back untouched.
    Unchanged(Value),
}

impl Listing {
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::Normalized(_))
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Normalized(items) => Value::Array(items),
            Self::Unchanged(value) => value,
        }
    }
}

/// Flatten nested mappings into dotted-path keys. Lists are leaves.
#[must_use]
pub fn flatten(record: &Record) -> FlatRecord {
    flatten_with_prefix(record, "")
}

/// Flatten `record`, joining every emitted key under `prefix` when it is non-empty.
///
/// Later keys overwrite earlier ones that flatten to the same path.
#[must_use]
pub fn flatten_with_prefix(record: &Record, prefix: &str) -> FlatRecord {
    let mut out = FlatRecord::new();
    flatten_into(record, prefix, &mut out);
    out
}

fn flatten_into(record: &Record, prefix: &str, out: &mut FlatRecord) {
    for (key, value) in record {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Value::Object(nested) => flatten_into(nested, &path, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Detect a key prefix shared by every key that can be stripped without leaving
/// an empty or degenerate field name. Returns an empty string when in doubt.
#[must_use]
pub fn detect_common_prefix<S: AsRef<str>>(keys: &[S]) -> String {
    let chars = keys.iter().map(|key| key.as_ref().chars().collect::<Vec<_>>()).collect::<Vec<_>>();
    let Some(min_len) = chars.iter().map(Vec::len).min() else {
        return String::new();
    };
    if min_len == 0 {
        return String::new();
    }

    let mut candidate = String::new();
    for index in 0..min_len {
        let ch = chars[0][index];
        if chars.iter().all(|key| key[index] == ch) {
            candidate.push(ch);
        } else {
            break;
        }
    }

    let length = candidate.chars().count();
    if length <= 2 || !(candidate.ends_with('_') || length >= 4) {
        return String::new();
    }

    let strips_cleanly = keys.iter().all(|key| {
        let remainder = &key.as_ref()[candidate.len()..];
        // "__" would clean down to "_".
        !remainder.is_empty() && remainder != "_" && remainder != "__"
    });

    if strips_cleanly {
        candidate
    } else {
        String::new()
    }
}

/// Strip `prefix` and then at most one leading underscore from `key`.
#[must_use]
pub fn clean_key(key: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.strip_prefix('_').unwrap_or(rest).to_string(),
        None => key.to_string(),
    }
}

/// Case-sensitive: `id`, `ID`, or a `_id` / `ID` suffix.
#[must_use]
pub fn is_identifier_key(cleaned_key: &str) -> bool {
    cleaned_key == "id"
        || cleaned_key == "ID"
        || cleaned_key.ends_with("_id")
        || cleaned_key.ends_with("ID")
}

fn identifier_order(left: &str, right: &str) -> Ordering {
    match (left == "id", right == "id") {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => left.cmp(right),
    }
}

#[derive(Debug)]
struct Field<'a> {
    original: &'a str,
    cleaned: String,
    value: &'a Value,
}

impl Field<'_> {
    fn is_description_source(&self) -> bool {
        DESCRIPTION_KEYS.contains(&self.cleaned.as_str())
            || DESCRIPTION_MARKERS
                .iter()
                .any(|marker| self.cleaned.contains(marker) || self.original.contains(marker))
    }
}

/// A usable title value. Mappings never qualify; their leaves are reached through the flattened keys.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Object(_) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn nested_lookup<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter().try_fold(record.get(*first)?, |current, segment| current.as_object()?.get(*segment))
}

/// Pick the title for one record, consuming an explicit `title` field from `remainder`.
fn synthesize_title(record: &Record, flat: &FlatRecord, remainder: &mut Vec<Field<'_>>) -> Option<Value> {
    if let Some(position) =
        remainder.iter().position(|field| field.cleaned == TITLE_KEY && is_present(field.value))
    {
        let field = remainder.remove(position);
        return Some(field.value.clone());
    }

    FLATTENED_TITLE_PATHS
        .iter()
        .filter_map(|path| flat.get(*path))
        .find(|value| is_present(value))
        .or_else(|| {
            NESTED_TITLE_PATHS
                .iter()
                .filter_map(|path| nested_lookup(record, path))
                .find(|value| is_present(value))
        })
        .cloned()
}

/// Normalize a single record for display.
///
/// Output order is identifiers (`id` first, then by name), the synthesized `title`,
/// then every other field in its original order under its cleaned name.
#[must_use]
pub fn normalize_record(record: &Record) -> NormalizedRecord {
    let flat = flatten(record);
    let prefix = detect_common_prefix(&flat.keys().collect::<Vec<_>>());

    let mut identifiers = Vec::new();
    let mut remainder = Vec::new();
    for (original, value) in &flat {
        let field = Field { original, cleaned: clean_key(original, &prefix), value };
        if is_identifier_key(&field.cleaned) {
            identifiers.push(field);
        } else {
            remainder.push(field);
        }
    }
    identifiers.sort_by(|left, right| identifier_order(&left.cleaned, &right.cleaned));

    let title = synthesize_title(record, &flat, &mut remainder);
    remainder.retain(|field| !field.is_description_source());
    if title.is_some() {
        remainder.retain(|field| field.cleaned != TITLE_KEY);
    }

    let mut out = NormalizedRecord::new();
    for field in identifiers {
        out.insert(field.cleaned, field.value.clone());
    }
    if let Some(title) = title {
        out.insert(TITLE_KEY.to_string(), title);
    }
    for field in remainder {
        out.insert(field.cleaned, field.value.clone());
    }
    out
}

#[must_use]
pub fn normalize_records(records: &[Record]) -> Vec<NormalizedRecord> {
    records.iter().map(normalize_record).collect()
}

/// Normalize a backend payload, passing anything that is not a list through unchanged.
#[must_use]
pub fn normalize_listing(input: Value) -> Listing {
    match input {
        Value::Array(items) => Listing::Normalized(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Value::Object(normalize_record(&record)),
                    other => other,
                })
                .collect(),
        ),
        other => Listing::Unchanged(other),
    }
}

#[must_use]
pub fn normalize(input: Value) -> Value {
    normalize_listing(input).into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object: {other}"),
        }
    }

    fn keys(record: &NormalizedRecord) -> Vec<&str> {
        record.keys().map(String::as_str).collect()
    }

    #[test]
    fn flatten_joins_nested_keys_with_dots_and_keeps_lists() {
        let input = record(json!({
            "id": 7,
            "owner": { "name": "Ada", "contact": { "email": "ada@example.org" } },
            "tags": [{ "label": "water" }],
            "note": null
        }));

        let flat = flatten(&input);
        assert_eq!(keys(&flat), vec!["id", "owner.name", "owner.contact.email", "tags", "note"]);
        assert_eq!(flat.get("tags"), Some(&json!([{ "label": "water" }])));
        assert_eq!(flat.get("note"), Some(&Value::Null));
    }

    #[test]
    fn flatten_with_prefix_roots_every_key() {
        let input = record(json!({ "a": 1, "b": { "c": 2 } }));
        let flat = flatten_with_prefix(&input, "row");
        assert_eq!(keys(&flat), vec!["row.a", "row.b.c"]);
    }

    #[test]
    fn flatten_collisions_are_last_write_wins() {
        let input = record(json!({ "a.b": 1, "a": { "b": 2 } }));
        let flat = flatten(&input);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("a.b"), Some(&json!(2)));
    }

    #[test]
    fn flatten_drops_empty_nested_objects() {
        let input = record(json!({ "meta": {}, "name": "x" }));
        assert_eq!(keys(&flatten(&input)), vec!["name"]);
    }

    #[test]
    fn common_prefix_strips_table_prefix() {
        assert_eq!(
            detect_common_prefix(&["tbl_projects_id", "tbl_projects_name", "tbl_projects_status"]),
            "tbl_projects_"
        );
        assert_eq!(detect_common_prefix(&["project_id", "project_name"]), "project_");
    }

    #[test]
    fn common_prefix_rejects_short_or_degenerate_candidates() {
        let empty: [&str; 0] = [];
        assert_eq!(detect_common_prefix(&empty), "");
        assert_eq!(detect_common_prefix(&["", "abc"]), "");
        assert_eq!(detect_common_prefix(&["ab_x", "ab_y"]), "ab_");
        assert_eq!(detect_common_prefix(&["abx", "aby"]), "");
        // Three characters without a trailing underscore are too short.
        assert_eq!(detect_common_prefix(&["abcx", "abcy"]), "");
        assert_eq!(detect_common_prefix(&["abcdx", "abcdy"]), "abcd");
        // A key equal to the prefix would be emptied.
        assert_eq!(detect_common_prefix(&["name", "name_full"]), "");
        assert_eq!(detect_common_prefix(&["user_", "user_x"]), "");
        assert_eq!(detect_common_prefix(&["abcd__", "abcdx"]), "");
    }

    #[test]
    fn single_key_record_uses_the_whole_key_as_candidate_and_rejects_it() {
        assert_eq!(detect_common_prefix(&["project_name"]), "");
    }

    #[test]
    fn clean_key_strips_prefix_and_one_underscore() {
        assert_eq!(clean_key("tbl_name", "tbl"), "name");
        assert_eq!(clean_key("tbl__name", "tbl"), "_name");
        assert_eq!(clean_key("project_id", "project_"), "id");
        assert_eq!(clean_key("other", "project_"), "other");
        assert_eq!(clean_key("project_id", ""), "project_id");
    }

    #[test]
    fn identifier_keys_are_case_sensitive_suffix_matches() {
        assert!(is_identifier_key("id"));
        assert!(is_identifier_key("ID"));
        assert!(is_identifier_key("member_id"));
        assert!(is_identifier_key("externalID"));
        assert!(!is_identifier_key("Id"));
        assert!(!is_identifier_key("identity"));
        assert!(!is_identifier_key("paid"));
    }

    #[test]
    fn bare_description_is_dropped_without_a_title() {
        let input = record(json!({ "id": "1", "name": "X", "description": "Y" }));
        let out = normalize_record(&input);
        assert_eq!(Value::Object(out), json!({ "id": "1", "name": "X" }));
    }

    #[test]
    fn prefixed_project_record_gets_title_from_description() {
        let input =
            record(json!({ "project_id": "9", "project_name": "Z", "project_description": "Desc" }));
        let out = normalize_record(&input);
        assert_eq!(keys(&out), vec!["id", "title", "name"]);
        assert_eq!(Value::Object(out), json!({ "id": "9", "title": "Desc", "name": "Z" }));
    }

    #[test]
    fn empty_record_normalizes_to_empty() {
        assert!(normalize_record(&Record::new()).is_empty());
    }

    #[test]
    fn capitalized_title_is_not_a_title_source() {
        let input = record(json!({ "Name": "A", "Title": "B" }));
        let out = normalize_record(&input);
        assert_eq!(keys(&out), vec!["Name", "Title"]);
    }

    #[test]
    fn explicit_title_is_consumed_and_moved_after_identifiers() {
        let input = record(json!({
            "status": "open",
            "title": "River cleanup",
            "owner_id": 4,
            "id": 2,
            "project_description": "Ignored once a title exists"
        }));
        let out = normalize_record(&input);
        assert_eq!(keys(&out), vec!["id", "owner_id", "title", "status"]);
        assert_eq!(out.get("title"), Some(&json!("River cleanup")));
    }

    #[test]
    fn empty_title_falls_back_to_description_candidates() {
        let input = record(json!({
            "id": 1,
            "title": "",
            "details": { "project_description": "From details" }
        }));
        let out = normalize_record(&input);
        assert_eq!(Value::Object(out), json!({ "id": 1, "title": "From details" }));
    }

    #[test]
    fn empty_title_without_fallback_stays_as_a_field() {
        let input = record(json!({ "id": 1, "title": "" }));
        let out = normalize_record(&input);
        assert_eq!(Value::Object(out), json!({ "id": 1, "title": "" }));
    }

    #[test]
    fn flattened_candidates_follow_priority_order() {
        let input = record(json!({
            "content": { "project_description": "content" },
            "description": { "project": "nested description" },
            "name": "n"
        }));
        let out = normalize_record(&input);
        assert_eq!(out.get("title"), Some(&json!("nested description")));
        assert!(!out.contains_key("content.project_description"));
        assert_eq!(out.get("name"), Some(&json!("n")));
    }

    #[test]
    fn mapping_candidates_never_become_the_title() {
        let input = record(json!({ "id": 1, "project_description": { "en": "Wells" } }));
        let out = normalize_record(&input);
        assert_eq!(out.get("title"), None);
        assert!(out.values().all(|value| !value.is_object()));
        assert_eq!(Value::Object(out), json!({ "id": 1 }));
    }

    #[test]
    fn mapping_candidate_falls_through_to_later_paths() {
        let input = record(json!({
            "projectDescription": { "en": "Wells" },
            "details": { "project_description": "Clean water" }
        }));
        let out = normalize_record(&input);
        assert_eq!(out.get("title"), Some(&json!("Clean water")));
        assert!(out.values().all(|value| !value.is_object()));
    }

    #[test]
    fn null_candidates_are_skipped() {
        let input = record(json!({
            "projectDescription": null,
            "project": { "description": "from project" },
            "owner": "o"
        }));
        let out = normalize_record(&input);
        assert_eq!(out.get("title"), Some(&json!("from project")));
        assert_eq!(keys(&out), vec!["title", "project.description", "owner"]);
    }

    #[test]
    fn identifiers_sort_with_id_first_then_by_name() {
        let input = record(json!({
            "zone_id": 3,
            "name": "n",
            "ID": 9,
            "area_id": 1,
            "id": 0,
            "city": "c"
        }));
        let out = normalize_record(&input);
        assert_eq!(keys(&out), vec!["id", "ID", "area_id", "zone_id", "name", "city"]);
    }

    #[test]
    fn normalize_passes_non_lists_through() {
        let error_payload = json!({ "error": "backend unavailable" });
        assert_eq!(normalize(error_payload.clone()), error_payload);
        assert_eq!(normalize_listing(error_payload.clone()), Listing::Unchanged(error_payload));
        assert_eq!(normalize(json!("oops")), json!("oops"));
    }

    #[test]
    fn normalize_keeps_empty_list_contents() {
        assert_eq!(normalize(json!([])), json!([]));
    }

    #[test]
    fn normalize_maps_each_record_independently() {
        let input = json!([
            { "project_id": 1, "project_name": "A", "project_description": "first" },
            { "id": 2, "name": "B" },
            "not a record"
        ]);
        let out = normalize(input);
        assert_eq!(
            out,
            json!([
                { "id": 1, "title": "first", "name": "A" },
                { "id": 2, "name": "B" },
                "not a record"
            ])
        );
    }

    #[test]
    fn normalize_records_matches_listing_output() {
        let records = vec![record(json!({ "id": 1, "projectDescription": "d" }))];
        let out = normalize_records(&records);
        assert_eq!(Value::Object(out[0].clone()), json!({ "id": 1, "title": "d" }));
    }

    fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("id".to_string()),
            Just("title".to_string()),
            Just("description".to_string()),
            Just("project_description".to_string()),
            Just("projectDescription".to_string()),
            Just("project".to_string()),
            Just("owner_id".to_string()),
            "[a-z_]{1,6}",
            "tbl_[a-z]{1,4}(_id)?",
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-z ]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
                prop::collection::vec((arb_key(), inner), 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        prop::collection::vec((arb_key(), arb_value()), 0..6)
            .prop_map(|entries| entries.into_iter().collect())
    }

    proptest! {
        #[test]
        fn property_flatten_is_idempotent(input in arb_record()) {
            let once = flatten(&input);
            let twice = flatten(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn property_flatten_leaves_no_nested_objects(input in arb_record()) {
            let flat = flatten(&input);
            prop_assert!(flat.values().all(|value| !value.is_object()));
        }

        #[test]
        fn property_prefix_is_safe_to_strip(
            prefix in "[a-z_]{0,6}",
            suffixes in prop::collection::vec("[a-z_]{0,4}", 1..5),
        ) {
            let keys = suffixes.iter().map(|suffix| format!("{prefix}{suffix}")).collect::<Vec<_>>();
            let detected = detect_common_prefix(&keys);
            if !detected.is_empty() {
                for key in &keys {
                    prop_assert!(key.starts_with(&detected));
                    let cleaned = clean_key(key, &detected);
                    prop_assert!(!cleaned.is_empty());
                    prop_assert_ne!(cleaned.as_str(), "_");
                }
            }
        }

        #[test]
        fn property_title_never_coexists_with_description_fields(input in arb_record()) {
            let out = normalize_record(&input);
            if out.contains_key(TITLE_KEY) {
                for key in DESCRIPTION_KEYS {
                    prop_assert!(!out.contains_key(key));
                }
            }
        }

        #[test]
        fn property_normalized_records_hold_no_mappings(input in arb_record()) {
            let out = normalize_record(&input);
            prop_assert!(out.values().all(|value| !value.is_object()));
        }

        #[test]
        fn property_identifiers_come_first(input in arb_record()) {
            let out = normalize_record(&input);
            let flags = out.keys().map(|key| is_identifier_key(key)).collect::<Vec<_>>();
            if let Some(first_plain) = flags.iter().position(|flag| !flag) {
                prop_assert!(flags[first_plain..].iter().all(|flag| !flag));
            }
            if out.contains_key("id") {
                prop_assert_eq!(out.keys().next().map(String::as_str), Some("id"));
            }
        }
    }
}
