//! The generative selection protocol: one structured round-trip with the
//! external model per attempt, driven as a bounded retry machine
//! (Building -> Sent -> Parsing -> Validating -> Accepted / Retryable /
//! Exhausted).
//!
//! Validation is a pure function so the acceptance rules can be tested
//! apart from the retry policy, and vice versa.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api_connection::endpoints::{
    ChatCompletionRequest, ChatMessage, JsonSchema, JsonSchemaDefinition, JsonSchemaProperty,
    Provider, ResponseFormat, DEFAULT_MODEL,
};
use crate::sampler::{Prototype, PrototypeBounds};
use crate::targets::MacroTargets;

/// One dish as the model proposed it. The two lists are only trusted
/// after validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedDish {
    pub dish_name: String,
    pub ingredients: Vec<String>,
    pub weights_g: Vec<f32>,
}

/// The model's whole response. `{}` and `{"dishes": []}` both decode to
/// an empty menu, which is the contract's "nothing satisfiable" value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeneratedMenu {
    #[serde(default)]
    pub dishes: Vec<GeneratedDish>,
}

/// Why a structurally decodable response was still rejected. Logged for
/// diagnostics, never surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("dish name is empty")]
    EmptyDishName,
    #[error("ingredient list length {ingredients} does not match weight list length {weights}")]
    LengthMismatch { ingredients: usize, weights: usize },
    #[error("ingredient count {count} outside [{min}, {max}]")]
    CountOutOfRange { count: usize, min: usize, max: usize },
    #[error("ingredient '{0}' is not in the prototype set")]
    UnknownIngredient(String),
    #[error("weight {0} is not a positive number")]
    NonPositiveWeight(f32),
}

/// Checks every invariant the prompt demanded. Only exact prototype
/// names pass; resolution fuzziness belongs to a later stage.
pub fn validate_menu(
    menu: &GeneratedMenu,
    allowed_names: &HashSet<&str>,
    bounds: PrototypeBounds,
) -> Result<(), RejectReason> {
    for dish in &menu.dishes {
        if dish.dish_name.trim().is_empty() {
            return Err(RejectReason::EmptyDishName);
        }
        if dish.ingredients.len() != dish.weights_g.len() {
            return Err(RejectReason::LengthMismatch {
                ingredients: dish.ingredients.len(),
                weights: dish.weights_g.len(),
            });
        }
        let count = dish.ingredients.len();
        if count < bounds.min_ing || count > bounds.max_ing {
            return Err(RejectReason::CountOutOfRange {
                count,
                min: bounds.min_ing,
                max: bounds.max_ing,
            });
        }
        for name in &dish.ingredients {
            if !allowed_names.contains(name.as_str()) {
                return Err(RejectReason::UnknownIngredient(name.clone()));
            }
        }
        for &weight in &dish.weights_g {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(RejectReason::NonPositiveWeight(weight));
            }
        }
    }
    Ok(())
}

/// Drops a leading/trailing markdown fence if the model wrapped its JSON.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

/// Bounded attempt counter of the retry machine.
#[derive(Debug, Clone, Copy)]
struct AttemptBudget {
    used: u32,
    max: u32,
}

impl AttemptBudget {
    fn new(max: u32) -> Self {
        AttemptBudget { used: 0, max }
    }

    fn try_consume(&mut self) -> bool {
        if self.used < self.max {
            self.used += 1;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.max - self.used
    }
}

enum AttemptOutcome {
    Accepted(GeneratedMenu),
    Retry(String),
}

#[derive(Debug, Clone)]
pub struct SelectionProtocol {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub bounds: PrototypeBounds,
}

impl Default for SelectionProtocol {
    fn default() -> Self {
        SelectionProtocol {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            bounds: PrototypeBounds::default(),
        }
    }
}

impl SelectionProtocol {
    /// Lightly increasing delay between attempts.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay * attempt
    }

    /// Runs the full retry machine. Exhaustion returns an empty menu, not
    /// an error, so callers can tell "nothing satisfiable" apart from a
    /// hard connection failure at initialization time.
    pub async fn request_dishes(
        &self,
        provider: &Provider,
        prototypes: &[Prototype],
        targets: &MacroTargets,
        num_dishes: usize,
    ) -> GeneratedMenu {
        // Building
        let allowed: HashSet<&str> = prototypes.iter().map(|p| p.name.as_str()).collect();
        let request = self.build_request(prototypes, targets, num_dishes);

        let mut budget = AttemptBudget::new(self.max_retries);
        while budget.try_consume() {
            let attempt = budget.used;
            info!(attempt, max = self.max_retries, "requesting dish selection");
            match self.attempt(provider, request.clone(), &allowed).await {
                AttemptOutcome::Accepted(menu) => {
                    info!(attempt, dishes = menu.dishes.len(), "dish selection accepted");
                    return menu;
                }
                AttemptOutcome::Retry(reason) => {
                    warn!(attempt, reason = %reason, "dish selection attempt rejected");
                    if budget.remaining() > 0 {
                        sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        info!("generative retry budget exhausted, returning empty selection");
        GeneratedMenu::default()
    }

    /// Sent -> Parsing -> Validating for a single attempt. Every failure
    /// mode collapses into a retry with a logged reason.
    async fn attempt(
        &self,
        provider: &Provider,
        request: ChatCompletionRequest,
        allowed: &HashSet<&str>,
    ) -> AttemptOutcome {
        // Sent
        let response = match provider.call_chat_completion(request).await {
            Ok(response) => response,
            Err(err) => return AttemptOutcome::Retry(format!("api call failed: {err}")),
        };
        let Some(choice) = response.choices.first() else {
            return AttemptOutcome::Retry("response carried no choices".to_string());
        };

        // Parsing
        let content = strip_code_fences(&choice.message.content);
        if content.is_empty() {
            return AttemptOutcome::Retry("response content empty after stripping".to_string());
        }
        let menu: GeneratedMenu = match serde_json::from_str(content) {
            Ok(menu) => menu,
            Err(err) => return AttemptOutcome::Retry(format!("undecodable JSON: {err}")),
        };

        // Validating
        match validate_menu(&menu, allowed, self.bounds) {
            Ok(()) => AttemptOutcome::Accepted(menu),
            Err(reason) => AttemptOutcome::Retry(reason.to_string()),
        }
    }

    fn build_request(
        &self,
        prototypes: &[Prototype],
        targets: &MacroTargets,
        num_dishes: usize,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "/no_thinking
You are a master chef and expert nutritionist. You compose real, recognizable dishes from a fixed list of prototype ingredients.
Respond ONLY with a JSON object; no explanatory text, comments, or markdown fences around it."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(prototypes, targets, num_dishes, self.bounds),
                },
            ],
            response_format: Some(ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: Some(dish_selection_schema()),
            }),
            temperature: Some(0.2),
            max_tokens: Some(1024),
        }
    }
}

fn build_prompt(
    prototypes: &[Prototype],
    targets: &MacroTargets,
    num_dishes: usize,
    bounds: PrototypeBounds,
) -> String {
    let prototype_json =
        serde_json::to_string_pretty(prototypes).unwrap_or_else(|_| "[]".to_string());
    let names = prototypes
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = format!(
        "Available prototype ingredients (nutrition per 100 g):\n```json\n{prototype_json}\n```\n\n\
Compose exactly {num_dishes} real, globally recognized dish(es). For EACH dish:\n\
1. Use between {min} and {max} ingredients chosen EXCLUSIVELY from this list: {names}.\n\
2. Name the dish ('dish_name'); it must be a real, recognizable dish.\n\
3. List the EXACT ingredient names used ('ingredients'), matching the prototype names perfectly.\n\
4. Give the amount of each ingredient in grams ('weights_g') as positive numbers, adjusted so each dish meets ALL of:\n",
        min = bounds.min_ing,
        max = bounds.max_ing,
    );
    if let Some((lo, hi)) = targets.calories {
        let _ = writeln!(prompt, "   - Total energy: {lo} - {hi} kcal");
    }
    let _ = writeln!(
        prompt,
        "   - Carbohydrate energy share: {} - {} %",
        targets.carbs_pct.0, targets.carbs_pct.1
    );
    let _ = writeln!(
        prompt,
        "   - Protein energy share: {} - {} %",
        targets.protein_pct.0, targets.protein_pct.1
    );
    let _ = writeln!(
        prompt,
        "   - Fat energy share: {} - {} %",
        targets.fat_pct.0, targets.fat_pct.1
    );
    prompt.push_str(
        "Respond ONLY with a JSON object holding a 'dishes' list, each element an object with \
'dish_name' (string), 'ingredients' (list of strings) and 'weights_g' (list of positive numbers).\n\
If no combination can strictly satisfy every condition with the given prototypes, respond with \
{\"dishes\": []} or {}.",
    );
    prompt
}

fn dish_selection_schema() -> JsonSchemaDefinition {
    let mut dish_properties = HashMap::new();
    dish_properties.insert(
        "dish_name".to_string(),
        JsonSchemaProperty {
            property_type: "string".to_string(),
            description: Some("Name of a real, recognizable dish.".to_string()),
            r#enum: None,
            items: None,
        },
    );
    dish_properties.insert(
        "ingredients".to_string(),
        JsonSchemaProperty {
            property_type: "array".to_string(),
            description: Some("Exact prototype ingredient names.".to_string()),
            r#enum: None,
            items: Some(Box::new(JsonSchema {
                schema_type: "string".to_string(),
                properties: None,
                required: None,
                additional_properties: None,
            })),
        },
    );
    dish_properties.insert(
        "weights_g".to_string(),
        JsonSchemaProperty {
            property_type: "array".to_string(),
            description: Some("Gram weight per ingredient, same order.".to_string()),
            r#enum: None,
            items: Some(Box::new(JsonSchema {
                schema_type: "number".to_string(),
                properties: None,
                required: None,
                additional_properties: None,
            })),
        },
    );

    let dish_schema = JsonSchema {
        schema_type: "object".to_string(),
        properties: Some(dish_properties),
        required: Some(vec![
            "dish_name".to_string(),
            "ingredients".to_string(),
            "weights_g".to_string(),
        ]),
        additional_properties: Some(false),
    };

    let mut response_properties = HashMap::new();
    response_properties.insert(
        "dishes".to_string(),
        JsonSchemaProperty {
            property_type: "array".to_string(),
            description: Some("Composed dishes; empty when nothing satisfies.".to_string()),
            r#enum: None,
            items: Some(Box::new(dish_schema)),
        },
    );

    JsonSchemaDefinition {
        name: "dish_selection_schema".to_string(),
        strict: Some(false),
        schema: JsonSchema {
            schema_type: "object".to_string(),
            properties: Some(response_properties),
            // 'dishes' stays optional so a bare {} remains a valid
            // "nothing satisfiable" reply.
            required: None,
            additional_properties: Some(false),
        },
    }
}
