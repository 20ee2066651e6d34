//! Next-action decisions: prompt construction, tolerant reply decoding and
//! the engine that asks the model gateway.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::{ChatMessage, Gateway, LlmConfig};
use crate::{ElementDescriptor, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Click,
    Fill,
    Goto,
    Done,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Click => "click",
            DecisionAction::Fill => "fill",
            DecisionAction::Goto => "goto",
            DecisionAction::Done => "done",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The model's chosen next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    /// Element id for click/fill, URL for goto
    #[serde(default, deserialize_with = "lenient_string")]
    pub target: String,
    /// Text to type for fill
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

impl Decision {
    pub fn done(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Done,
            target: String::new(),
            value: None,
            reason: reason.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.action == DecisionAction::Done
    }
}

/// Models sometimes answer `"target": 12` instead of `"12"`.
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    Ok(lenient_opt_string(de)?.unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Why a reply could not be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    /// No balanced JSON object anywhere in the reply
    NoObject,
    /// An object was found but does not describe a decision
    Schema(String),
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFailure::NoObject => f.write_str("no JSON object in reply"),
            DecodeFailure::Schema(e) => write!(f, "reply is not a decision: {}", e),
        }
    }
}

/// Outcome of decoding a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Decision(Decision),
    Failure(DecodeFailure),
}

impl Decoded {
    /// Collapse a failure into `done` with reason "parse failure", which ends
    /// the loop instead of acting on garbage.
    pub fn into_decision(self) -> Decision {
        match self {
            Decoded::Decision(d) => d,
            Decoded::Failure(_) => Decision::done("parse failure"),
        }
    }
}

/// First balanced `{...}` in `text` that parses as a JSON object.
///
/// Braces inside string literals are ignored, so prose, code fences and
/// trailing commentary around the object do not matter.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if let Ok(Value::Object(map)) = serde_json::from_str(candidate) {
                            return Some(map);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Decode a model reply into a decision.
pub fn decode(text: &str) -> Decoded {
    let Some(object) = extract_json_object(text) else {
        return Decoded::Failure(DecodeFailure::NoObject);
    };
    match serde_json::from_value::<Decision>(Value::Object(object)) {
        Ok(decision) => Decoded::Decision(decision),
        Err(e) => Decoded::Failure(DecodeFailure::Schema(e.to_string())),
    }
}

/// The decision prompt: goal, URL, the first `limit` elements, rules and the
/// reply shape.
pub fn build_prompt(goal: &str, url: &str, elements: &[ElementDescriptor], limit: usize) -> String {
    let listing = elements
        .iter()
        .take(limit)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an autonomous browser agent.
GOAL: "{goal}"
URL: "{url}"

UI ELEMENTS:
{listing}

Decide the SINGLE next interaction.

RULES:
1. Location first: if the site asks for a location or address, set it before anything else.
2. Search engines: on a results page, click a result to leave the search engine.
3. Autocomplete: for "From"/"To" or location fields, type the text and pick the suggestion in a later step; do not submit right away.
4. Be precise: use the exact id of an element from the list.
5. Done: answer "done" only when you are on the final page for the goal.

Return JSON: {{ "action": "click"|"fill"|"goto"|"done", "target": "ID", "value": "text", "reason": "reason" }}"#
    )
}

/// Asks the gateway for the next action.
pub struct DecisionEngine {
    gateway: Gateway,
    max_elements: usize,
}

impl DecisionEngine {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            max_elements: 300,
        }
    }

    /// Engine over the configured decision models. Fails without a credential.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Gateway::openrouter(config, &config.models, config.timeout_ms)
            .map(Self::new)
            .ok_or(Error::NoBackend)
    }

    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Prompt the backends in order. The first reply that comes back is
    /// decoded, usable or not; only transport failures, timeouts and error
    /// statuses move on to the next backend.
    pub async fn decide(
        &self,
        goal: &str,
        url: &str,
        elements: &[ElementDescriptor],
    ) -> Result<Decoded> {
        let prompt = build_prompt(goal, url, elements, self.max_elements);
        let messages = [ChatMessage::user(prompt)];

        let completion = self
            .gateway
            .complete_with(&messages, |text| Ok(decode(text)))
            .await?;

        debug!("decision from {}: {:?}", completion.backend, completion.value);
        if let Decoded::Failure(failure) = &completion.value {
            warn!("{} replied with an unusable decision: {}", completion.backend, failure);
        }
        Ok(completion.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(backends: Vec<Arc<ScriptedBackend>>) -> DecisionEngine {
        DecisionEngine::new(Gateway::new(
            backends.into_iter().map(|b| b as Arc<dyn crate::ChatBackend>).collect(),
            Duration::from_secs(20),
        ))
    }

    #[test]
    fn test_decode_plain_object() {
        let d = decode(r#"{"action":"click","target":"12","reason":"open the menu"}"#).into_decision();
        assert_eq!(d.action, DecisionAction::Click);
        assert_eq!(d.target, "12");
        assert_eq!(d.value, None);
    }

    #[test]
    fn test_decode_object_in_prose_and_fence() {
        let reply = "Sure! Here is my answer:\n```json\n{\"action\": \"fill\", \"target\": \"3\", \"value\": \"ramen\", \"reason\": \"search box\"}\n```\nGood luck.";
        let d = decode(reply).into_decision();
        assert_eq!(d.action, DecisionAction::Fill);
        assert_eq!(d.value.as_deref(), Some("ramen"));
    }

    #[test]
    fn test_decode_braces_inside_strings() {
        let reply = r#"{"action":"fill","target":"5","value":"a } b { c","reason":"type {weird} text"}"#;
        let d = decode(reply).into_decision();
        assert_eq!(d.value.as_deref(), Some("a } b { c"));
    }

    #[test]
    fn test_decode_numeric_target() {
        let d = decode(r#"{"action":"click","target":7,"reason":"x"}"#).into_decision();
        assert_eq!(d.target, "7");
    }

    #[test]
    fn test_decode_skips_non_json_braces() {
        let reply = r#"I considered {click 4} but {"action":"done","reason":"already there"}"#;
        let d = decode(reply).into_decision();
        assert!(d.is_done());
        assert_eq!(d.reason, "already there");
    }

    #[test]
    fn test_decode_without_object() {
        assert_eq!(decode("I would click the button"), Decoded::Failure(DecodeFailure::NoObject));
        let d = decode("no json").into_decision();
        assert!(d.is_done());
        assert_eq!(d.reason, "parse failure");
    }

    #[test]
    fn test_decode_unknown_action() {
        let decoded = decode(r#"{"action":"scroll","target":"1"}"#);
        assert!(matches!(decoded, Decoded::Failure(DecodeFailure::Schema(_))));
        assert_eq!(decoded.into_decision().reason, "parse failure");
    }

    #[test]
    fn test_prompt_lists_elements_up_to_limit() {
        let elements: Vec<_> = (1..=5)
            .map(|i| ElementDescriptor::new(i, "a", format!("Link {i}")))
            .collect();
        let prompt = build_prompt("find ramen", "https://example.com", &elements, 3);
        assert!(prompt.contains("GOAL: \"find ramen\""));
        assert!(prompt.contains("URL: \"https://example.com\""));
        assert!(prompt.contains("3: <a> Link 3"));
        assert!(!prompt.contains("4: <a> Link 4"));
        assert!(prompt.contains(r#""action": "click"|"fill"|"goto"|"done""#));
    }

    #[tokio::test]
    async fn test_decide_keeps_reply_without_json() {
        let a = ScriptedBackend::always("a", "I think you should click the search box");
        let b = ScriptedBackend::always("b", r#"{"action":"click","target":"2","reason":"search"}"#);
        let decoded = engine(vec![a, b.clone()]).decide("g", "u", &[]).await.unwrap();
        assert_eq!(decoded, Decoded::Failure(DecodeFailure::NoObject));
        assert_eq!(b.calls(), 0);
        assert_eq!(decoded.into_decision().reason, "parse failure");
    }

    #[tokio::test]
    async fn test_decide_falls_back_only_on_backend_failure() {
        let a = ScriptedBackend::failing("a");
        let b = ScriptedBackend::always("b", r#"{"action":"click","target":"2","reason":"search"}"#);
        let decoded = engine(vec![a, b]).decide("g", "u", &[]).await.unwrap();
        assert_eq!(decoded.into_decision().target, "2");
    }

    #[tokio::test]
    async fn test_decide_keeps_schema_failure() {
        let a = ScriptedBackend::always("a", r#"{"verdict":"click"}"#);
        let b = ScriptedBackend::always("b", r#"{"action":"click","target":"2"}"#);
        let decoded = engine(vec![a, b.clone()]).decide("g", "u", &[]).await.unwrap();
        assert!(matches!(decoded, Decoded::Failure(DecodeFailure::Schema(_))));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_decide_all_backends_failing() {
        let err = engine(vec![ScriptedBackend::failing("a")])
            .decide("g", "u", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exhausted { .. }));
    }
}
