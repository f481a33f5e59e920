use gridflow_client::domain::UsageFact;
use serde::Deserialize;

pub const MASK: &str = "***MASKED***";

/// Who is going to read the facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiAccessLevel {
    /// Pipeline and governance use; nothing is masked.
    Internal,
    /// Applications and API consumers.
    #[default]
    External,
}

fn mask(field: &Option<String>) -> Option<String> {
    field.as_ref().map(|_| MASK.to_string())
}

fn zip3(zip: &Option<String>) -> Option<String> {
    zip.as_ref()
        .map(|z| format!("{}**", z.chars().take(3).collect::<String>()))
}

/// Returns a copy of `facts` fit for `level`.
///
/// `street`, `house_num` and `house_supp` identify a household and are
/// masked; `zip` keeps its first three characters for regional analytics.
pub fn mask_usage_facts(facts: &[UsageFact], level: PiiAccessLevel) -> Vec<UsageFact> {
    match level {
        PiiAccessLevel::Internal => facts.to_vec(),
        PiiAccessLevel::External => facts
            .iter()
            .map(|fact| UsageFact {
                street: mask(&fact.street),
                house_num: mask(&fact.house_num),
                house_supp: mask(&fact.house_supp),
                zip: zip3(&fact.zip),
                ..fact.clone()
            })
            .collect(),
    }
}
