use std::{cmp::Ordering, collections::HashMap};

use common::{error::AppError, storage::types::firm_profile::FirmProfile};

use crate::{
    locations::{normalize, LocationVariants},
    store::AttributeStore,
    types::{
        Constraint, NarrativeMatch, ProvenanceStage, QueryIntent, QueryShape, RankDirection,
        RankedResult, FILTER_AUM, FILTER_CITY, FILTER_STATE, RANK_AUM,
    },
};

/// Two rank keys closer than this are considered equal, so the stable sort
/// preserves their input order.
const RANK_KEY_TOLERANCE: f64 = 1e-9;

/// Joins narrative matches with their firm profiles, applies the intent's
/// filters, orders per the query shape and truncates to `limit`.
pub async fn merge_and_filter(
    attributes: &dyn AttributeStore,
    matches: Vec<NarrativeMatch>,
    intent: &QueryIntent,
    limit: usize,
    variants: &LocationVariants,
) -> Result<Vec<RankedResult>, AppError> {
    // One row per firm, keeping the best-scoring narrative.
    let mut best_per_firm: HashMap<String, NarrativeMatch> = HashMap::new();
    for candidate in matches {
        match best_per_firm.get(&candidate.crd_number) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best_per_firm.insert(candidate.crd_number.clone(), candidate);
            }
        }
    }

    let mut deduped: Vec<NarrativeMatch> = best_per_firm.into_values().collect();
    deduped.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.crd_number.cmp(&b.crd_number))
    });

    let crd_numbers: Vec<String> = deduped.iter().map(|m| m.crd_number.clone()).collect();
    let profiles = attributes.fetch_batch(crd_numbers).await?;
    let by_crd: HashMap<&str, &FirmProfile> =
        profiles.iter().map(|p| (p.id.as_str(), p)).collect();

    let stage = match intent.shape {
        QueryShape::Similarity => ProvenanceStage::Semantic,
        QueryShape::RankedByAttribute => ProvenanceStage::AttributeRanked,
    };

    let mut results: Vec<RankedResult> = deduped
        .into_iter()
        .filter_map(|m| by_crd.get(m.crd_number.as_str()).map(|p| (m, (*p).clone())))
        .filter(|(_, profile)| {
            intent
                .filters
                .iter()
                .all(|(key, constraint)| constraint_allows(profile, key, constraint, variants))
        })
        .map(|(m, profile)| RankedResult {
            profile,
            similarity: m.score,
            stage,
        })
        .collect();

    if intent.shape == QueryShape::RankedByAttribute {
        let attribute = intent.rank_attribute.as_deref().unwrap_or(RANK_AUM);
        sort_ranked_results(&mut results, attribute, intent.rank_direction);
    }

    results.truncate(limit);
    Ok(results)
}

/// Stable re-sort by a rank attribute. Rows without the attribute sort last
/// regardless of direction; near-equal keys keep their input order.
pub fn sort_ranked_results(
    results: &mut [RankedResult],
    attribute: &str,
    direction: RankDirection,
) {
    results.sort_by(|a, b| {
        compare_rank_keys(
            rank_key(&a.profile, attribute),
            rank_key(&b.profile, attribute),
            direction,
        )
    });
}

/// Numeric rank key for a profile attribute. Unknown attributes rank as
/// absent, so every row ties and input order survives.
pub fn rank_key(profile: &FirmProfile, attribute: &str) -> Option<f64> {
    match attribute {
        RANK_AUM => profile.aum,
        "employee_count" => profile.employee_count.map(f64::from),
        _ => None,
    }
}

fn compare_rank_keys(a: Option<f64>, b: Option<f64>, direction: RankDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            if (a - b).abs() <= RANK_KEY_TOLERANCE {
                return Ordering::Equal;
            }
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            match direction {
                RankDirection::Descending => ord.reverse(),
                RankDirection::Ascending => ord,
            }
        }
    }
}

/// Whether a profile satisfies one filter constraint. Unknown filter keys
/// never exclude a row.
pub fn constraint_allows(
    profile: &FirmProfile,
    key: &str,
    constraint: &Constraint,
    variants: &LocationVariants,
) -> bool {
    match key {
        FILTER_CITY => text_allows(&profile.city, constraint, variants),
        FILTER_STATE => text_allows(&profile.state, constraint, variants),
        FILTER_AUM => numeric_allows(profile.aum, constraint),
        _ => true,
    }
}

fn text_allows(stored: &str, constraint: &Constraint, variants: &LocationVariants) -> bool {
    let stored_norm = normalize(stored);
    match constraint {
        Constraint::Equals { value } => stored_norm == normalize(value),
        Constraint::AnyVariant { variants: expanded } => {
            let stored_collapsed = stored_norm.replace(' ', "");
            expanded.iter().any(|variant| {
                stored_norm.contains(variant.as_str())
                    || stored_collapsed == *variant
                    || variants.matches(stored, variant)
            })
        }
        Constraint::Range { .. } => false,
    }
}

fn numeric_allows(stored: Option<f64>, constraint: &Constraint) -> bool {
    match constraint {
        Constraint::Range { min, max } => match stored {
            // A null attribute fails when a range filter exists.
            None => false,
            Some(value) => {
                min.is_none_or(|m| value >= m) && max.is_none_or(|m| value <= m)
            }
        },
        Constraint::Equals { value } => match (stored, value.parse::<f64>()) {
            (Some(stored), Ok(wanted)) => (stored - wanted).abs() <= RANK_KEY_TOLERANCE,
            _ => false,
        },
        Constraint::AnyVariant { .. } => false,
    }
}
