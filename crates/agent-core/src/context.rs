//! Execution context for a single analysis run
//!
//! The `Context` is a JSON key-value store threaded through the stages of one
//! run. Each stage's payload is recorded under a well-known key so that stage
//! N+1 can read what stage N produced.

use crate::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known context keys
pub mod keys {
    /// Identifier of the run, for log correlation on the collaborator side
    pub const RUN_ID: &str = "run_id";
    /// Language preference for generated text (e.g., "en", "zh")
    pub const LANGUAGE: &str = "language";
    /// Requested analysis depth
    pub const DEPTH: &str = "depth";
    /// Roles bound to the stage currently executing
    pub const AGENT_ROLES: &str = "agent_roles";
    /// Set once the run has entered its extra-depth round
    pub const DEEPENED: &str = "deepened";
    /// Prefix under which stage payloads are recorded
    pub const STAGE_PREFIX: &str = "stage.";
}

/// Context passed to the collaborator on every stage call
///
/// # Example
///
/// ```
/// use agent_core::{Context, Stage};
/// use serde_json::json;
///
/// let mut ctx = Context::new().with_language("zh");
/// ctx.record_stage(Stage::DataCollection, json!({"price": 187.2}));
///
/// assert_eq!(ctx.language(), Some("zh"));
/// assert_eq!(ctx.stage_output(Stage::DataCollection), Some(&json!({"price": 187.2})));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    data: BTreeMap<String, serde_json::Value>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context tagged with a fresh run id
    pub fn for_run() -> Self {
        Self::new().with_run_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.insert(keys::RUN_ID, serde_json::json!(run_id.into()));
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.insert(keys::LANGUAGE, serde_json::json!(lang.into()));
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.get(keys::RUN_ID).and_then(|v| v.as_str())
    }

    pub fn language(&self) -> Option<&str> {
        self.get(keys::LANGUAGE).and_then(|v| v.as_str())
    }

    // =========== Stage Outputs ===========

    /// Record the payload a stage produced
    pub fn record_stage(&mut self, stage: Stage, payload: serde_json::Value) {
        self.insert(stage_key(stage), payload);
    }

    /// Payload recorded for `stage`, if it ran and produced one
    pub fn stage_output(&self, stage: Stage) -> Option<&serde_json::Value> {
        self.get(&stage_key(stage))
    }

    /// Stages that have recorded output, in pipeline order
    pub fn completed_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.contains_key(&stage_key(*stage)))
            .collect()
    }

    // =========== Generic Key-Value Operations ===========

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Insert a typed value, serializing it to JSON first
    pub fn insert_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value).map_err(|e| {
            crate::Error::ProcessingFailed(format!("Failed to serialize context value: {e}"))
        })?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a typed value, deserializing it from JSON
    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => {
                let typed = serde_json::from_value(value.clone()).map_err(|e| {
                    crate::Error::ProcessingFailed(format!(
                        "Failed to deserialize context value: {e}"
                    ))
                })?;
                Ok(Some(typed))
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn stage_key(stage: Stage) -> String {
    format!("{}{}", keys::STAGE_PREFIX, stage.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Roles {
        names: Vec<String>,
    }

    #[test]
    fn test_basic_operations() {
        let mut ctx = Context::new();
        assert!(ctx.is_empty());

        ctx.insert("key", json!("value"));
        assert_eq!(ctx.len(), 1);
        assert!(ctx.contains_key("key"));
        assert_eq!(ctx.get("key"), Some(&json!("value")));

        ctx.remove("key");
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_typed_insert_get() {
        let mut ctx = Context::new();
        let roles = Roles {
            names: vec!["risk_assessor".to_string()],
        };

        ctx.insert_typed(keys::AGENT_ROLES, &roles).unwrap();

        let retrieved: Roles = ctx.get_typed(keys::AGENT_ROLES).unwrap().unwrap();
        assert_eq!(retrieved, roles);
        assert!(ctx.get_typed::<Roles>("missing").unwrap().is_none());
    }

    #[test]
    fn test_stage_outputs_in_pipeline_order() {
        let mut ctx = Context::new();
        ctx.record_stage(Stage::Risk, json!({"score": 30}));
        ctx.record_stage(Stage::DataCollection, json!({"price": 1.0}));

        assert_eq!(
            ctx.completed_stages(),
            vec![Stage::DataCollection, Stage::Risk]
        );
        assert_eq!(ctx.stage_output(Stage::Risk), Some(&json!({"score": 30})));
        assert!(ctx.stage_output(Stage::Decision).is_none());
    }

    #[test]
    fn test_run_id_and_language() {
        let ctx = Context::for_run().with_language("en");
        assert!(ctx.run_id().is_some());
        assert_eq!(ctx.language(), Some("en"));
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let mut ctx = Context::new().with_run_id("run-1");
        ctx.record_stage(Stage::Fundamental, json!({"score": 80}));

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["stage.fundamental"]["score"], 80);
    }
}
