//! Named task graphs that can be submitted with a few parameters.

use serde_json::{json, Value};

use crate::{EngineError, TaskDefinition};

pub const ARTICLE_SAVE_PIPELINE: &str = "article-save-pipeline";
pub const ARTICLE_CENSOR_PIPELINE: &str = "article-censor-pipeline";

/// Names accepted by [`build_template`].
pub fn template_names() -> &'static [&'static str] {
    &[ARTICLE_SAVE_PIPELINE, ARTICLE_CENSOR_PIPELINE]
}

/// Build the task list of a named template.
///
/// # Errors
/// - [`EngineError::UnknownTemplate`] for an unregistered name.
/// - [`EngineError::InvalidTemplateParams`] when a required parameter is missing.
pub fn build_template(name: &str, params: &Value) -> Result<Vec<TaskDefinition>, EngineError> {
    match name {
        ARTICLE_SAVE_PIPELINE => {
            let target_id = require_target_id(name, params)?;
            Ok(article_save_pipeline(&target_id))
        }
        ARTICLE_CENSOR_PIPELINE => {
            let target_id = require_target_id(name, params)?;
            Ok(article_censor_pipeline(&target_id))
        }
        other => Err(EngineError::UnknownTemplate(other.to_owned())),
    }
}

/// `target_id` as a JSON string or number; blank strings count as missing.
fn require_target_id(template: &str, params: &Value) -> Result<Value, EngineError> {
    match params.get("target_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Value::String(s.clone())),
        Some(n @ Value::Number(_)) => Ok(n.clone()),
        _ => Err(EngineError::InvalidTemplateParams {
            template: template.to_owned(),
            message: "target_id is required".to_owned(),
        }),
    }
}

fn source_ref(target_id: &Value) -> String {
    match target_id {
        Value::String(s) => format!("article:{s}"),
        other => format!("article:{other}"),
    }
}

//   save
//   ├── summary
//   │   ├── embedding ── update-embedding
//   │   └── update-summary
//   └── censor ── update-censor
fn article_save_pipeline(target_id: &Value) -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new("save", "save")
            .tracked()
            .with_payload(json!({ "target": "article", "target_id": target_id, "metadata": {} })),
        TaskDefinition::new("summary", "llm")
            .with_fathers(["save"])
            .tracked()
            .with_payload(json!({ "target": "summary", "metadata": {} })),
        TaskDefinition::new("censor", "llm")
            .with_fathers(["save"])
            .tracked()
            .with_payload(json!({ "target": "censor", "metadata": {} })),
        TaskDefinition::new("embedding", "llm")
            .with_fathers(["summary"])
            .with_payload(json!({ "target": "embedding", "metadata": {} })),
        TaskDefinition::new("update-embedding", "update")
            .with_fathers(["embedding"])
            .with_payload(json!({
                "target": "article_embedding",
                "target_id": target_id,
                "metadata": {},
            })),
        TaskDefinition::new("update-summary", "update")
            .with_fathers(["summary"])
            .with_payload(json!({
                "target": "article_summary",
                "target_id": target_id,
                "metadata": {},
            })),
        update_censor(target_id),
    ]
}

fn article_censor_pipeline(target_id: &Value) -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new("censor", "llm").tracked().with_payload(json!({
            "target": "censor",
            "source_id": source_ref(target_id),
            "metadata": {},
        })),
        update_censor(target_id),
    ]
}

fn update_censor(target_id: &Value) -> TaskDefinition {
    TaskDefinition::new("update-censor", "update")
        .with_fathers(["censor"])
        .with_payload(json!({
            "target": "censor",
            "target_id": target_id,
            "metadata": { "censor_target": "article" },
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{topological_sort, validate_graph};

    #[test]
    fn every_template_is_a_valid_graph() {
        for name in template_names() {
            let tasks = build_template(name, &json!({ "target_id": "42" })).unwrap();
            validate_graph(&tasks).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn save_pipeline_orders_by_input_position() {
        let tasks = build_template(ARTICLE_SAVE_PIPELINE, &json!({ "target_id": 7 })).unwrap();
        let order: Vec<&str> = topological_sort(&tasks)
            .unwrap()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "save",
                "summary",
                "censor",
                "embedding",
                "update-summary",
                "update-censor",
                "update-embedding",
            ]
        );
        assert_eq!(tasks[0].payload["target_id"], 7);
    }

    #[test]
    fn censor_pipeline_references_the_article() {
        let tasks = build_template(ARTICLE_CENSOR_PIPELINE, &json!({ "target_id": "a1" })).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].payload["source_id"], "article:a1");
        assert_eq!(tasks[1].fathers, vec!["censor"]);
    }

    #[test]
    fn missing_target_id_is_rejected() {
        for params in [json!({}), json!({ "target_id": "  " }), json!({ "target_id": null })] {
            assert!(matches!(
                build_template(ARTICLE_SAVE_PIPELINE, &params),
                Err(EngineError::InvalidTemplateParams { .. })
            ));
        }
    }

    #[test]
    fn unknown_template_is_rejected() {
        assert!(matches!(
            build_template("nope", &json!({ "target_id": 1 })),
            Err(EngineError::UnknownTemplate(name)) if name == "nope"
        ));
    }
}
