//! Typed response schemas for generation-service calls.
//!
//! Schemas are assembled from `SchemaNode`s and checked when built: a
//! required key must be a declared property. `to_value` renders the JSON
//! Schema object sent as the request `format`.

use crate::error::{Result, VibeError};
use crate::types::SuggestedAction;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String { allowed: Vec<String> },
    Integer { allowed: Vec<i64>, minimum: Option<i64> },
    Number,
    Boolean,
    Array(Box<SchemaNode>),
    Object(ObjectSchema),
}

impl SchemaNode {
    #[must_use]
    pub const fn string() -> Self {
        Self::String {
            allowed: Vec::new(),
        }
    }

    #[must_use]
    pub fn one_of(values: &[&str]) -> Self {
        Self::String {
            allowed: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    #[must_use]
    pub const fn integer() -> Self {
        Self::Integer {
            allowed: Vec::new(),
            minimum: None,
        }
    }

    #[must_use]
    pub fn array_of(item: Self) -> Self {
        Self::Array(Box::new(item))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::String { allowed } if allowed.is_empty() => json!({"type": "string"}),
            Self::String { allowed } => json!({"type": "string", "enum": allowed}),
            Self::Integer { allowed, minimum } => {
                let mut node = Map::new();
                node.insert("type".to_string(), json!("integer"));
                if !allowed.is_empty() {
                    node.insert("enum".to_string(), json!(allowed));
                }
                if let Some(min) = minimum {
                    node.insert("minimum".to_string(), json!(min));
                }
                Value::Object(node)
            }
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(item) => json!({"type": "array", "items": item.to_value()}),
            Self::Object(object) => object.to_value(),
        }
    }
}

/// Conditional constraint keyed on `suggested_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRule {
    pub action: SuggestedAction,
    pub requires: Vec<String>,
    pub forbids: Vec<String>,
    pub score_min: Option<i64>,
    pub score_max: Option<i64>,
}

impl ActionRule {
    fn to_value(&self) -> Value {
        let mut score = Map::new();
        if let Some(min) = self.score_min {
            score.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = self.score_max {
            score.insert("maximum".to_string(), json!(max));
        }

        let mut then = Map::new();
        if !self.requires.is_empty() {
            then.insert("required".to_string(), json!(self.requires));
        }
        then.insert("properties".to_string(), json!({"score": score}));
        let forbidden = match self.forbids.as_slice() {
            [] => None,
            [single] => Some(json!({"required": [single]})),
            many => Some(json!({
                "anyOf": many.iter().map(|f| json!({"required": [f]})).collect::<Vec<_>>()
            })),
        };
        if let Some(forbidden) = forbidden {
            then.insert("not".to_string(), forbidden);
        }

        json!({
            "if": {"properties": {"suggested_action": {"const": self.action.as_str()}}},
            "then": Value::Object(then),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    properties: Vec<(String, SchemaNode)>,
    required: Vec<String>,
    rules: Vec<ActionRule>,
}

impl ObjectSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or replaces) a property.
    #[must_use]
    pub fn property(mut self, name: &str, node: SchemaNode) -> Self {
        if let Some(slot) = self.properties.iter_mut().find(|(key, _)| key == name) {
            slot.1 = node;
        } else {
            self.properties.push((name.to_string(), node));
        }
        self
    }

    /// Marks declared properties as required.
    ///
    /// # Errors
    ///
    /// Returns `Schema` if a name was never declared.
    pub fn require(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            if !self.has_property(name) {
                return Err(VibeError::Schema(format!(
                    "required key '{name}' is not a declared property"
                )));
            }
            if !self.required.iter().any(|r| r == name) {
                self.required.push((*name).to_string());
            }
        }
        Ok(self)
    }

    /// Adds a conditional rule on `suggested_action`.
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the rule references undeclared fields.
    pub fn rule(mut self, rule: ActionRule) -> Result<Self> {
        if !self.has_property("suggested_action") {
            return Err(VibeError::Schema(
                "action rules need a suggested_action property".to_string(),
            ));
        }
        if let Some(missing) = rule
            .requires
            .iter()
            .chain(rule.forbids.iter())
            .find(|field| !self.has_property(field))
        {
            return Err(VibeError::Schema(format!(
                "rule for '{}' references undeclared '{missing}'",
                rule.action
            )));
        }
        self.rules.push(rule);
        Ok(self)
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|(key, _)| key == name)
    }

    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(key, node)| (key.clone(), node.to_value()))
            .collect();
        let mut object = Map::new();
        object.insert("type".to_string(), json!("object"));
        object.insert("properties".to_string(), Value::Object(properties));
        if !self.required.is_empty() {
            object.insert("required".to_string(), json!(self.required));
        }
        if !self.rules.is_empty() {
            object.insert(
                "allOf".to_string(),
                Value::Array(self.rules.iter().map(ActionRule::to_value).collect()),
            );
        }
        Value::Object(object)
    }
}

/// The `format` field of a generation request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseFormat {
    #[default]
    FreeText,
    Json,
    Schema(ObjectSchema),
}

impl ResponseFormat {
    #[must_use]
    pub const fn requires_json(&self) -> bool {
        !matches!(self, Self::FreeText)
    }

    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::FreeText => None,
            Self::Json => Some(json!("json")),
            Self::Schema(schema) => Some(schema.to_value()),
        }
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

/// Artifact generation: four string fields, all required.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn artifacts_schema() -> Result<ObjectSchema> {
    ObjectSchema::new()
        .property("yamlfilecontent", SchemaNode::string())
        .property("containerfilecontent", SchemaNode::string())
        .property("pythonfilecontent", SchemaNode::string())
        .property("requirements", SchemaNode::string())
        .require(&[
            "pythonfilecontent",
            "containerfilecontent",
            "yamlfilecontent",
            "requirements",
        ])
}

/// Repair: one slot per artifact file name plus an explanation.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn fix_schema() -> Result<ObjectSchema> {
    ObjectSchema::new()
        .property("vibe.yaml", SchemaNode::string())
        .property("Dockerfile", SchemaNode::string())
        .property("myapp.py", SchemaNode::string())
        .property("requirements.txt", SchemaNode::string())
        .property("explanation", SchemaNode::string())
        .require(&[
            "explanation",
            "vibe.yaml",
            "Dockerfile",
            "requirements.txt",
            "myapp.py",
        ])
}

/// Entry of the `improvement_plan` array.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn improvement_schema() -> Result<ObjectSchema> {
    ObjectSchema::new()
        .property("issue", SchemaNode::string())
        .property("fix", SchemaNode::string())
        .property("evidence_from_previous", SchemaNode::string())
        .require(&["issue", "fix", "evidence_from_previous"])
}

fn resources_schema() -> Result<ObjectSchema> {
    let quota = || {
        ObjectSchema::new()
            .property("cpu", SchemaNode::string())
            .property("memory", SchemaNode::string())
            .require(&["cpu", "memory"])
    };
    ObjectSchema::new()
        .property("requests", SchemaNode::Object(quota()?))
        .property("limits", SchemaNode::Object(quota()?))
        .require(&["requests", "limits"])
}

fn layout_schema() -> Result<ObjectSchema> {
    let codefile = ObjectSchema::new()
        .property("language", SchemaNode::one_of(&["python"]))
        .property("version", SchemaNode::string())
        .property("dependencies", SchemaNode::array_of(SchemaNode::string()))
        .property("file", SchemaNode::one_of(&["myapp.py"]))
        .require(&["language", "version", "file"])?;
    let containerfile = ObjectSchema::new()
        .property("runtime", SchemaNode::one_of(&["docker"]))
        .property("base_image", SchemaNode::string())
        .property(
            "image_name",
            SchemaNode::one_of(&["localhost:32000/myapp:latest"]),
        )
        .property("file", SchemaNode::one_of(&["Dockerfile"]))
        .require(&["runtime", "base_image", "image_name", "file"])?;
    let yamlfile = ObjectSchema::new()
        .property(
            "include",
            SchemaNode::array_of(SchemaNode::one_of(&["deployment", "service"])),
        )
        .property("image", SchemaNode::one_of(&["localhost:32000/myapp:latest"]))
        .property("file", SchemaNode::one_of(&["vibe.yaml"]))
        .require(&["include", "image", "file"])?;
    ObjectSchema::new()
        .property("codefile", SchemaNode::Object(codefile))
        .property("containerfile", SchemaNode::Object(containerfile))
        .property("yamlfile", SchemaNode::Object(yamlfile))
        .property("requirements", SchemaNode::array_of(SchemaNode::string()))
        .require(&["codefile", "containerfile", "yamlfile"])
}

/// Structured service intent used by `json-with-required` curation.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn service_schema() -> Result<ObjectSchema> {
    let ports = vec![80, 443, 5000];
    let service = ObjectSchema::new()
        .property("type", SchemaNode::one_of(&["ClusterIP", "NodePort"]))
        .property(
            "port",
            SchemaNode::Integer {
                allowed: ports.clone(),
                minimum: None,
            },
        )
        .property(
            "target_port",
            SchemaNode::Integer {
                allowed: ports,
                minimum: None,
            },
        )
        .require(&["type", "port", "target_port"])?;
    let deployment = ObjectSchema::new()
        .property(
            "replicas",
            SchemaNode::Integer {
                allowed: Vec::new(),
                minimum: Some(1),
            },
        )
        .property("resources", SchemaNode::Object(resources_schema()?))
        .property("service", SchemaNode::Object(service))
        .require(&["replicas", "resources", "service"])?;
    let endpoint = ObjectSchema::new()
        .property("method", SchemaNode::one_of(&["GET", "POST"]))
        .property("path", SchemaNode::string())
        .property("summary", SchemaNode::string())
        .require(&["method", "path"])?;
    let interface = ObjectSchema::new()
        .property("http", SchemaNode::array_of(SchemaNode::Object(endpoint)))
        .require(&["http"])?;
    let case = ObjectSchema::new()
        .property("input", SchemaNode::string())
        .property("expect_output", SchemaNode::string())
        .require(&["input", "expect_output"])?;
    let tests = ObjectSchema::new()
        .property("cases", SchemaNode::array_of(SchemaNode::Object(case)))
        .require(&["cases"])?;
    let artifacts = ObjectSchema::new()
        .property("layout", SchemaNode::Object(layout_schema()?))
        .require(&["layout"])?;

    ObjectSchema::new()
        .property("version", SchemaNode::one_of(&["1.0"]))
        .property("name", SchemaNode::string())
        .property("description", SchemaNode::string())
        .property("functionality", SchemaNode::string())
        .property("artifacts", SchemaNode::Object(artifacts))
        .property("deployment", SchemaNode::Object(deployment))
        .property("interface", SchemaNode::Object(interface))
        .property("tests", SchemaNode::Object(tests))
        .require(&[
            "version",
            "name",
            "description",
            "functionality",
            "artifacts",
            "deployment",
            "interface",
        ])
}

/// Later `json-with-required` iterations also demand an explanation and an
/// improvement plan grounded in the previous grade.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn service_schema_with_improvement_plan() -> Result<ObjectSchema> {
    service_schema()?
        .property("explanation", SchemaNode::string())
        .property(
            "improvement_plan",
            SchemaNode::array_of(SchemaNode::Object(improvement_schema()?)),
        )
        .require(&["explanation", "improvement_plan"])
}

/// Strict judge verdict. `ask` is only offered when an operator is present.
///
/// # Errors
///
/// Only on an internal inconsistency of the schema definition.
pub fn judge_schema(hands_free: bool) -> Result<ObjectSchema> {
    let actions: &[&str] = if hands_free {
        &["approve", "retry"]
    } else {
        &["approve", "ask", "retry"]
    };
    ObjectSchema::new()
        .property("explanation", SchemaNode::string())
        .property("score", SchemaNode::Number)
        .property("suggested_action", SchemaNode::one_of(actions))
        .property("clarification_question", SchemaNode::string())
        .property("retry_rationale", SchemaNode::string())
        .property("ambiguity_detected", SchemaNode::Boolean)
        .property("unknown_terms", SchemaNode::array_of(SchemaNode::string()))
        .require(&["explanation", "score", "suggested_action"])?
        .rule(ActionRule {
            action: SuggestedAction::Approve,
            requires: Vec::new(),
            forbids: strings(&["clarification_question", "retry_rationale"]),
            score_min: Some(5),
            score_max: Some(5),
        })?
        .rule(ActionRule {
            action: SuggestedAction::Ask,
            requires: strings(&["clarification_question"]),
            forbids: strings(&["retry_rationale"]),
            score_min: None,
            score_max: Some(3),
        })?
        .rule(ActionRule {
            action: SuggestedAction::Retry,
            requires: strings(&["retry_rationale"]),
            forbids: strings(&["clarification_question"]),
            score_min: None,
            score_max: Some(4),
        })
}
