use std::{collections::HashMap, sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::{
    config::EngineTuning,
    locations::LocationVariants,
    types::{Constraint, QueryIntent, QueryShape, RankDirection, FILTER_AUM, FILTER_CITY, FILTER_STATE, RANK_AUM},
};

const DECOMPOSE_SYSTEM_PROMPT: &str = "You decompose a natural-language question \
about investment adviser firms into structured search parameters. Extract the \
semantic topic of the question, any city or US state it names, any assets-under-\
management bounds in US dollars, and whether the question asks for a ranking by \
firm size. Leave fields null when the question does not specify them.";

/// Fields the structured chat call is asked to produce.
#[derive(Debug, Deserialize)]
struct DecomposedFields {
    semantic_query: Option<String>,
    city: Option<String>,
    state: Option<String>,
    min_aum: Option<f64>,
    max_aum: Option<f64>,
    rank: Option<String>,
}

fn decompose_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "semantic_query": { "type": ["string", "null"] },
            "city": { "type": ["string", "null"] },
            "state": { "type": ["string", "null"] },
            "min_aum": { "type": ["number", "null"] },
            "max_aum": { "type": ["number", "null"] },
            "rank": { "type": ["string", "null"], "enum": ["descending", "ascending", null] }
        },
        "required": ["semantic_query", "city", "state", "min_aum", "max_aum", "rank"],
        "additionalProperties": false
    })
}

/// Turns raw queries into [`QueryIntent`]s. The chat model is the primary
/// path; any failure there falls back to the deterministic heuristic, so
/// decomposition never errors outward.
#[derive(Clone)]
pub struct QueryDecomposer {
    openai_client: Option<Arc<async_openai::Client<async_openai::config::OpenAIConfig>>>,
    model: String,
    tuning: EngineTuning,
    variants: LocationVariants,
}

impl QueryDecomposer {
    pub fn new(
        openai_client: Option<Arc<async_openai::Client<async_openai::config::OpenAIConfig>>>,
        model: String,
        tuning: EngineTuning,
        variants: LocationVariants,
    ) -> Self {
        Self {
            openai_client,
            model,
            tuning,
            variants,
        }
    }

    /// Heuristic-only decomposer, used in tests and offline setups.
    pub fn heuristic_only(tuning: EngineTuning, variants: LocationVariants) -> Self {
        Self::new(None, String::new(), tuning, variants)
    }

    #[instrument(skip(self), fields(query_len = raw.len()))]
    pub async fn decompose(&self, raw: &str) -> QueryIntent {
        if let Some(client) = &self.openai_client {
            let call = self.decompose_via_chat(client, raw);
            match tokio::time::timeout(Duration::from_millis(self.tuning.decompose_timeout_ms), call)
                .await
            {
                Ok(Ok(intent)) => return intent,
                Ok(Err(error)) => {
                    warn!(%error, "query decomposition chat call failed, using heuristic");
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.tuning.decompose_timeout_ms,
                        "query decomposition chat call timed out, using heuristic"
                    );
                }
            }
        }

        self.decompose_heuristic(raw)
    }

    async fn decompose_via_chat(
        &self,
        client: &async_openai::Client<async_openai::config::OpenAIConfig>,
        raw: &str,
    ) -> anyhow::Result<QueryIntent> {
        let request = self.build_chat_request(raw)?;
        let response = client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no content in decomposition response"))?;

        let fields: DecomposedFields = serde_json::from_str(content)?;
        debug!(?fields, "decomposed query via chat model");
        Ok(self.intent_from_fields(raw, fields))
    }

    fn build_chat_request(&self, raw: &str) -> Result<CreateChatCompletionRequest, async_openai::error::OpenAIError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Adviser search query decomposition".into()),
                name: "query_decomposition".into(),
                schema: Some(decompose_response_schema()),
                strict: Some(true),
            },
        };

        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(0.0)
            .max_tokens(256u32)
            .messages([
                ChatCompletionRequestSystemMessage::from(DECOMPOSE_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(raw.to_owned()).into(),
            ])
            .response_format(response_format)
            .build()
    }

    fn intent_from_fields(&self, raw: &str, fields: DecomposedFields) -> QueryIntent {
        let mut filters = HashMap::new();

        if let Some(city) = fields.city.filter(|c| !c.trim().is_empty()) {
            filters.insert(
                FILTER_CITY.to_string(),
                Constraint::AnyVariant {
                    variants: self.variants.expand(&city),
                },
            );
        }
        if let Some(state) = fields.state.filter(|s| !s.trim().is_empty()) {
            filters.insert(
                FILTER_STATE.to_string(),
                Constraint::Equals {
                    value: state.trim().to_owned(),
                },
            );
        }
        if fields.min_aum.is_some() || fields.max_aum.is_some() {
            filters.insert(
                FILTER_AUM.to_string(),
                Constraint::Range {
                    min: fields.min_aum,
                    max: fields.max_aum,
                },
            );
        }

        let rank_direction = match fields.rank.as_deref() {
            Some("ascending") => Some(RankDirection::Ascending),
            Some("descending") => Some(RankDirection::Descending),
            _ => None,
        };

        let semantic_query = fields
            .semantic_query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| raw.to_owned());

        build_intent(raw, semantic_query, filters, rank_direction)
    }

    /// Deterministic fallback: ranking-verb scan, trailing location phrase,
    /// dollar-bound phrases. Always produces a usable intent.
    pub fn decompose_heuristic(&self, raw: &str) -> QueryIntent {
        let lowered = raw.to_ascii_lowercase();
        let mut filters = HashMap::new();

        let rank_direction = self.scan_rank_verbs(&lowered);

        if let Some(location) = trailing_location_phrase(&lowered) {
            let (city, state) = split_city_state(&location);
            if !city.is_empty() {
                filters.insert(
                    FILTER_CITY.to_string(),
                    Constraint::AnyVariant {
                        variants: self.variants.expand(&city),
                    },
                );
            }
            if let Some(state) = state {
                filters.insert(FILTER_STATE.to_string(), Constraint::Equals { value: state });
            }
        }

        if let Some((min, max)) = scan_aum_bounds(&lowered) {
            filters.insert(FILTER_AUM.to_string(), Constraint::Range { min, max });
        }

        build_intent(raw, raw.to_owned(), filters, rank_direction)
    }

    fn scan_rank_verbs(&self, lowered: &str) -> Option<RankDirection> {
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            if self.tuning.descending_rank_verbs.iter().any(|v| v == token) {
                return Some(RankDirection::Descending);
            }
        }
        for token in &tokens {
            if self.tuning.ascending_rank_verbs.iter().any(|v| v == token) {
                return Some(RankDirection::Ascending);
            }
        }
        None
    }
}

fn build_intent(
    raw: &str,
    semantic_query: String,
    filters: HashMap<String, Constraint>,
    rank_direction: Option<RankDirection>,
) -> QueryIntent {
    let shape = if rank_direction.is_some() {
        QueryShape::RankedByAttribute
    } else {
        QueryShape::Similarity
    };

    QueryIntent {
        raw_query: raw.to_owned(),
        semantic_query,
        filters,
        shape,
        rank_attribute: rank_direction.map(|_| RANK_AUM.to_string()),
        rank_direction: rank_direction.unwrap_or_default(),
    }
}

/// Takes the phrase after the last " in " as a candidate location, stripped
/// of trailing punctuation and dollar clauses.
fn trailing_location_phrase(lowered: &str) -> Option<String> {
    // Cut dollar clauses first so "over $2 billion in assets" cannot win
    // the trailing-"in" scan: "in st louis with over $2 billion in assets".
    let head = lowered.split(" with ").next().unwrap_or(lowered);
    let head = head.split(" over ").next().unwrap_or(head);
    let head = head.split(" under ").next().unwrap_or(head);

    let idx = head.rfind(" in ")?;
    let tail = &head[idx + 4..];
    let tail = tail
        .split(|c: char| c == '?' || c == '!')
        .next()
        .unwrap_or(tail);
    let trimmed = tail.trim().trim_end_matches(',').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Splits "st louis, mo" into city and state. A trailing comma-separated
/// two-letter token is treated as a state code.
fn split_city_state(location: &str) -> (String, Option<String>) {
    if let Some((city, state)) = location.rsplit_once(',') {
        let state = state.trim();
        if state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()) {
            return (city.trim().to_owned(), Some(state.to_ascii_uppercase()));
        }
    }
    (location.trim().to_owned(), None)
}

/// Scans for dollar-bound phrases such as "over $2 billion" or
/// "under $500 million in assets".
fn scan_aum_bounds(lowered: &str) -> Option<(Option<f64>, Option<f64>)> {
    let mut min = None;
    let mut max = None;

    for (marker, is_min) in [
        ("over $", true),
        ("above $", true),
        ("at least $", true),
        ("more than $", true),
        ("under $", false),
        ("below $", false),
        ("less than $", false),
    ] {
        if let Some(idx) = lowered.find(marker) {
            if let Some(amount) = parse_dollar_amount(&lowered[idx + marker.len()..]) {
                if is_min {
                    min = Some(amount);
                } else {
                    max = Some(amount);
                }
            }
        }
    }

    if min.is_none() && max.is_none() {
        None
    } else {
        Some((min, max))
    }
}

fn parse_dollar_amount(rest: &str) -> Option<f64> {
    let mut tokens = rest.split_whitespace();
    let number: f64 = tokens.next()?.replace(',', "").parse().ok()?;
    let multiplier = match tokens.next() {
        Some(token) if token.starts_with("billion") => 1e9,
        Some(token) if token.starts_with("million") => 1e6,
        Some(token) if token.starts_with("trillion") => 1e12,
        _ => 1.0,
    };
    Some(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decomposer() -> QueryDecomposer {
        QueryDecomposer::heuristic_only(EngineTuning::default(), LocationVariants::default())
    }

    #[test]
    fn plain_question_is_similarity_shaped() {
        let intent = decomposer().decompose_heuristic("firms focused on fixed income");
        assert_eq!(intent.shape, QueryShape::Similarity);
        assert_eq!(intent.semantic_query, "firms focused on fixed income");
        assert!(intent.rank_attribute.is_none());
        assert!(intent.filters.is_empty());
    }

    #[test]
    fn largest_triggers_descending_rank() {
        let intent = decomposer().decompose_heuristic("largest firms in St. Louis");
        assert_eq!(intent.shape, QueryShape::RankedByAttribute);
        assert_eq!(intent.rank_attribute.as_deref(), Some(RANK_AUM));
        assert_eq!(intent.rank_direction, RankDirection::Descending);
    }

    #[test]
    fn smallest_triggers_ascending_rank() {
        let intent = decomposer().decompose_heuristic("smallest advisers in Chicago");
        assert_eq!(intent.rank_direction, RankDirection::Ascending);
    }

    #[test]
    fn trailing_location_becomes_city_filter() {
        let intent = decomposer().decompose_heuristic("largest firms in St. Louis");
        let Some(Constraint::AnyVariant { variants }) = intent.filters.get(FILTER_CITY) else {
            panic!("expected a city variant filter");
        };
        assert!(variants.contains(&"st louis".to_string()));
        assert!(variants.contains(&"saint louis".to_string()));
        assert!(variants.contains(&"saintlouis".to_string()));
    }

    #[test]
    fn city_state_pair_splits() {
        let intent = decomposer().decompose_heuristic("top firms in st louis, mo");
        assert!(matches!(
            intent.filters.get(FILTER_STATE),
            Some(Constraint::Equals { value }) if value == "MO"
        ));
        assert!(intent.filters.contains_key(FILTER_CITY));
    }

    #[test]
    fn aum_bound_phrase_becomes_range() {
        let intent =
            decomposer().decompose_heuristic("firms in st louis with over $2 billion in assets");
        let Some(Constraint::Range { min, max }) = intent.filters.get(FILTER_AUM) else {
            panic!("expected an aum range filter");
        };
        assert_eq!(*min, Some(2e9));
        assert_eq!(*max, None);
        // The dollar clause must not leak into the city phrase.
        let Some(Constraint::AnyVariant { variants }) = intent.filters.get(FILTER_CITY) else {
            panic!("expected a city variant filter");
        };
        assert!(variants.contains(&"st louis".to_string()));
    }

    #[test]
    fn under_phrase_sets_max() {
        let intent = decomposer().decompose_heuristic("advisers under $500 million");
        assert!(matches!(
            intent.filters.get(FILTER_AUM),
            Some(Constraint::Range { min: None, max: Some(m) }) if (*m - 5e8).abs() < 1.0
        ));
    }

    #[tokio::test]
    async fn decompose_without_client_never_errors() {
        let intent = decomposer().decompose("anything at all").await;
        assert_eq!(intent.raw_query, "anything at all");
    }
}
