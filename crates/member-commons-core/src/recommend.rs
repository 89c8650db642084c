use serde_json::Value;

use crate::NormalizedRecord;

/// Sectors and departments a member preference maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceFilter {
    pub preference: &'static str,
    pub sectors: &'static [&'static str],
    pub departments: &'static [&'static str],
}

impl PreferenceFilter {
    fn matches(&self, record: &NormalizedRecord) -> bool {
        let sector = field_text(record, &["naics_sector", "NAICS Sector"]);
        let department = field_text(record, &["department", "Department"]);
        sector.is_some_and(|sector| self.sectors.contains(&sector))
            || department.is_some_and(|department| self.departments.contains(&department))
    }
}

pub const PREFERENCE_FILTERS: [PreferenceFilter; 14] = [
    PreferenceFilter {
        preference: "Agriculture",
        sectors: &["Agriculture"],
        departments: &["Technical Assistance"],
    },
    PreferenceFilter {
        preference: "Education",
        sectors: &["Educational Services"],
        departments: &["Technical Assistance"],
    },
    PreferenceFilter {
        preference: "Healthcare Access",
        sectors: &["Health Care"],
        departments: &["Equity Investments"],
    },
    PreferenceFilter {
        preference: "Financial Inclusion",
        sectors: &["Finance and Insurance"],
        departments: &["Investment Funds", "Finance"],
    },
    PreferenceFilter {
        preference: "Infrastructure Development",
        sectors: &["Utilities"],
        departments: &["Finance"],
    },
    PreferenceFilter {
        preference: "Technology Innovation",
        sectors: &["Information"],
        departments: &["Investment Funds"],
    },
    PreferenceFilter {
        preference: "Small Business Support",
        sectors: &["Finance and Insurance"],
        departments: &["Investment Funds"],
    },
    PreferenceFilter {
        preference: "Rural Development",
        sectors: &[],
        departments: &["Technical Assistance"],
    },
    PreferenceFilter {
        preference: "Environmental Sustainability",
        sectors: &["Utilities"],
        departments: &["Finance"],
    },
    PreferenceFilter {
        preference: "Renewable Energy",
        sectors: &["Utilities"],
        departments: &["Finance"],
    },
    PreferenceFilter {
        preference: "Water & Sanitation",
        sectors: &["Utilities"],
        departments: &["Finance"],
    },
    PreferenceFilter {
        preference: "Digital Inclusion",
        sectors: &["Information", "Educational Services"],
        departments: &["Technical Assistance"],
    },
    PreferenceFilter {
        preference: "Economic Growth",
        sectors: &["Finance and Insurance"],
        departments: &["Investment Funds"],
    },
    PreferenceFilter {
        preference: "Food Security",
        sectors: &["Agriculture"],
        departments: &["Technical Assistance"],
    },
];

#[must_use]
pub fn known_preferences() -> Vec<&'static str> {
    PREFERENCE_FILTERS.iter().map(|filter| filter.preference).collect()
}

fn field_text<'a>(record: &'a NormalizedRecord, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| record.get(*key).and_then(Value::as_str))
}

/// Keep every record matching at least one preference, in input order.
///
/// Unknown preference names are ignored.
#[must_use]
pub fn recommend_projects<S: AsRef<str>>(
    records: &[NormalizedRecord],
    preferences: &[S],
) -> Vec<NormalizedRecord> {
    let filters = PREFERENCE_FILTERS
        .iter()
        .filter(|filter| preferences.iter().any(|preference| preference.as_ref() == filter.preference))
        .collect::<Vec<_>>();

    records
        .iter()
        .filter(|record| filters.iter().any(|filter| filter.matches(record)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(value: Value) -> NormalizedRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object: {other}"),
        }
    }

    fn fixtures() -> Vec<NormalizedRecord> {
        vec![
            project(json!({ "id": 1, "title": "Irrigation", "naics_sector": "Agriculture", "department": "Finance" })),
            project(json!({ "id": 2, "title": "Clinic", "NAICS Sector": "Health Care", "Department": "Equity Investments" })),
            project(json!({ "id": 3, "title": "Broadband", "naics_sector": "Information", "department": "Technical Assistance" })),
            project(json!({ "id": 4, "title": "Untagged" })),
        ]
    }

    fn ids(records: &[NormalizedRecord]) -> Vec<i64> {
        records.iter().filter_map(|record| record.get("id").and_then(Value::as_i64)).collect()
    }

    #[test]
    fn matches_on_sector_or_department() {
        let picked = recommend_projects(&fixtures(), &["Agriculture"]);
        // Record 3 matches through its Technical Assistance department.
        assert_eq!(ids(&picked), vec![1, 3]);
    }

    #[test]
    fn display_style_column_names_are_matched() {
        let picked = recommend_projects(&fixtures(), &["Healthcare Access"]);
        assert_eq!(ids(&picked), vec![2]);
    }

    #[test]
    fn null_snake_case_field_falls_back_to_display_name() {
        let records = vec![project(json!({
            "id": 5,
            "naics_sector": null,
            "NAICS Sector": "Agriculture",
            "department": 7,
            "Department": "Finance"
        }))];
        assert_eq!(ids(&recommend_projects(&records, &["Food Security"])), vec![5]);
        assert_eq!(ids(&recommend_projects(&records, &["Renewable Energy"])), vec![5]);
    }

    #[test]
    fn each_record_appears_once_in_input_order() {
        let picked =
            recommend_projects(&fixtures(), &["Digital Inclusion", "Food Security", "Healthcare Access"]);
        assert_eq!(ids(&picked), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_or_empty_preferences_recommend_nothing() {
        let none: [&str; 0] = [];
        assert!(recommend_projects(&fixtures(), &none).is_empty());
        assert!(recommend_projects(&fixtures(), &["Space Tourism"]).is_empty());
    }

    #[test]
    fn known_preferences_lists_every_filter() {
        let known = known_preferences();
        assert_eq!(known.len(), 14);
        assert!(known.contains(&"Water & Sanitation"));
    }
}
