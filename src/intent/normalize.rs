//! Canonical shape for structured service intents, and the two text
//! renderings handed to artifact generation.

use crate::error::{Result, VibeError};
use serde_json::{json, Map, Value};

pub const DEFAULT_IMAGE: &str = "localhost:32000/myapp:latest";

const ARTIFACT_ORDER: [&str; 3] = ["codefile", "containerfile", "manifest"];
const MANIFEST_KINDS: [&str; 2] = ["deployment", "service"];

/// Removes the child object under `key`; anything that is not an object
/// reads as empty.
fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

fn put_object(map: &mut Map<String, Value>, key: &str, inner: Map<String, Value>) {
    map.insert(key.to_string(), Value::Object(inner));
}

fn set_default(map: &mut Map<String, Value>, key: &str, value: Value) {
    map.entry(key.to_string()).or_insert(value);
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_port(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_layout(layout: &mut Map<String, Value>) {
    if !layout.contains_key("manifest") {
        if let Some(yaml) = layout.remove("yamlfile") {
            layout.insert("manifest".to_string(), yaml);
        }
    }

    let mut code = take_object(layout, "codefile");
    set_default(&mut code, "language", json!("python"));
    set_default(&mut code, "version", json!("3.11"));
    set_default(&mut code, "file", json!("myapp.py"));
    set_default(&mut code, "dependencies", json!([]));
    set_default(&mut code, "env", json!([]));
    put_object(layout, "codefile", code);

    let mut container = take_object(layout, "containerfile");
    set_default(&mut container, "runtime", json!("docker"));
    set_default(&mut container, "base_image", json!("python:3.11-slim"));
    set_default(&mut container, "image_name", json!(DEFAULT_IMAGE));
    set_default(&mut container, "file", json!("Dockerfile"));
    let image_name = container
        .get("image_name")
        .cloned()
        .unwrap_or_else(|| json!(DEFAULT_IMAGE));
    put_object(layout, "containerfile", container);

    let mut manifest = take_object(layout, "manifest");
    let requested = string_list(manifest.get("include"));
    let mut include: Vec<&str> = MANIFEST_KINDS
        .into_iter()
        .filter(|kind| requested.iter().any(|r| r == kind))
        .collect();
    if include.is_empty() {
        include = MANIFEST_KINDS.to_vec();
    }
    manifest.insert("include".to_string(), json!(include));
    set_default(&mut manifest, "file", json!("vibe.yaml"));
    set_default(&mut manifest, "image", image_name);
    put_object(layout, "manifest", manifest);
}

fn normalize_deployment(deployment: &mut Map<String, Value>) {
    set_default(deployment, "replicas", json!(1));

    let mut resources = take_object(deployment, "resources");
    let mut requests = take_object(&mut resources, "requests");
    set_default(&mut requests, "cpu", json!("100m"));
    set_default(&mut requests, "memory", json!("128Mi"));
    put_object(&mut resources, "requests", requests);
    let mut limits = take_object(&mut resources, "limits");
    set_default(&mut limits, "cpu", json!("200m"));
    set_default(&mut limits, "memory", json!("256Mi"));
    put_object(&mut resources, "limits", limits);
    put_object(deployment, "resources", resources);

    let mut service = take_object(deployment, "service");
    set_default(&mut service, "type", json!("ClusterIP"));
    let port = coerce_port(service.get("port"), 80);
    let target_port = coerce_port(service.get("target_port"), 5000);
    service.insert("port".to_string(), json!(port));
    service.insert("target_port".to_string(), json!(target_port));
    put_object(deployment, "service", service);
}

/// Fills defaults for language, runtime, image, ports and resources, renames
/// a `yamlfile` layout entry to `manifest`, keeps `artifacts.generate`
/// consistent with the layout and orders the manifest `include` list.
///
/// # Errors
///
/// Returns `MalformedResponse` when `doc` is not a JSON object.
pub fn normalize_service_intent(doc: Value) -> Result<Value> {
    let Value::Object(mut root) = doc else {
        return Err(VibeError::MalformedResponse(
            "service intent must be a JSON object".to_string(),
        ));
    };

    let mut artifacts = take_object(&mut root, "artifacts");
    let mut layout = take_object(&mut artifacts, "layout");
    let declared: Vec<String> = ARTIFACT_ORDER
        .into_iter()
        .filter(|name| {
            layout.contains_key(*name) || (*name == "manifest" && layout.contains_key("yamlfile"))
        })
        .map(str::to_string)
        .collect();
    normalize_layout(&mut layout);
    put_object(&mut artifacts, "layout", layout);

    let mut generate = string_list(artifacts.get("generate"));
    generate.extend(declared);
    generate.push("manifest".to_string());
    let mut ordered: Vec<String> = ARTIFACT_ORDER
        .into_iter()
        .filter(|name| generate.iter().any(|g| g == name))
        .map(str::to_string)
        .collect();
    for extra in generate {
        if !ordered.contains(&extra) {
            ordered.push(extra);
        }
    }
    artifacts.insert("generate".to_string(), json!(ordered));
    put_object(&mut root, "artifacts", artifacts);

    let mut deployment = take_object(&mut root, "deployment");
    normalize_deployment(&mut deployment);
    put_object(&mut root, "deployment", deployment);

    let mut interface = take_object(&mut root, "interface");
    set_default(&mut interface, "http", json!([]));
    put_object(&mut root, "interface", interface);
    let mut tests = take_object(&mut root, "tests");
    set_default(&mut tests, "cases", json!([]));
    put_object(&mut root, "tests", tests);

    set_default(&mut root, "version", json!("1.0"));
    set_default(&mut root, "name", json!("myapp"));
    set_default(&mut root, "description", json!(""));
    set_default(&mut root, "functionality", json!(""));

    Ok(Value::Object(root))
}

/// Scalar as shown in prompts: strings raw, everything else as JSON.
fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(*key))
}

fn text_at(value: &Value, path: &[&str]) -> String {
    scalar(field(value, path))
}

/// Generator prompt for a normalized service intent.
#[must_use]
pub fn render_generator_prompt(doc: &Value) -> String {
    let name = text_at(doc, &["name"]);
    let name = if name.trim().is_empty() { "myapp".to_string() } else { name.trim().to_string() };
    let description = text_at(doc, &["description"]);
    let functionality = text_at(doc, &["functionality"]);
    let generate = {
        let listed = string_list(field(doc, &["artifacts", "generate"]));
        if listed.is_empty() {
            vec!["manifest".to_string()]
        } else {
            listed
        }
    };
    let layout = |section: &str, key: &str| text_at(doc, &["artifacts", "layout", section, key]);

    let mut lines = vec![format!("Service name: {name}")];
    if !description.trim().is_empty() {
        lines.push(format!("Description: {}", description.trim()));
    }
    if !functionality.trim().is_empty() {
        lines.push(format!("Functionality: {}", functionality.trim()));
    }
    lines.push(String::new());
    lines.push(format!("Artifacts to generate: {}", generate.join(", ")));

    if generate.iter().any(|g| g == "codefile") {
        lines.push("Codefile:".to_string());
        for key in ["language", "version", "file"] {
            lines.push(format!("  {key}: {}", layout("codefile", key)));
        }
        let deps = string_list(field(doc, &["artifacts", "layout", "codefile", "dependencies"]));
        if !deps.is_empty() {
            lines.push(format!("  dependencies: {}", deps.join(", ")));
        }
        let env = field(doc, &["artifacts", "layout", "codefile", "env"])
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !env.is_empty() {
            lines.push("  env:".to_string());
            lines.extend(env.iter().map(|var| {
                format!("    - {}={}", scalar(var.get("name")), scalar(var.get("value")))
            }));
        }
    }

    if generate.iter().any(|g| g == "containerfile") {
        lines.push("Containerfile:".to_string());
        for key in ["runtime", "base_image", "image_name", "file"] {
            lines.push(format!("  {key}: {}", layout("containerfile", key)));
        }
    }

    lines.push("Manifest:".to_string());
    lines.push(format!(
        "  include: {}",
        string_list(field(doc, &["artifacts", "layout", "manifest", "include"])).join(", ")
    ));
    lines.push(format!("  file: {}", layout("manifest", "file")));
    lines.push(format!("  image: {}", layout("manifest", "image")));

    let deployment = |path: &[&str]| {
        let mut full = vec!["deployment"];
        full.extend_from_slice(path);
        text_at(doc, &full)
    };
    lines.push("Deployment:".to_string());
    lines.push(format!("  replicas: {}", deployment(&["replicas"])));
    lines.push(format!(
        "  resources.requests: cpu={}, memory={}",
        deployment(&["resources", "requests", "cpu"]),
        deployment(&["resources", "requests", "memory"])
    ));
    lines.push(format!(
        "  resources.limits: cpu={}, memory={}",
        deployment(&["resources", "limits", "cpu"]),
        deployment(&["resources", "limits", "memory"])
    ));
    lines.push("Service:".to_string());
    for key in ["type", "port", "target_port"] {
        lines.push(format!("  {key}: {}", deployment(&["service", key])));
    }

    let endpoints = field(doc, &["interface", "http"])
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if !endpoints.is_empty() {
        lines.push("HTTP interface:".to_string());
        lines.extend(endpoints.iter().map(|ep| {
            let method = ep.get("method").map_or_else(|| "GET".to_string(), |m| scalar(Some(m)));
            let path = ep.get("path").map_or_else(|| "/".to_string(), |p| scalar(Some(p)));
            format!("  - {method} {path}  # {}", scalar(ep.get("summary")))
        }));
    }

    let cases = field(doc, &["tests", "cases"])
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if !cases.is_empty() {
        lines.push("Test cases:".to_string());
        for case in &cases {
            lines.push(format!("  - input: {}", scalar(case.get("input"))));
            lines.push(format!("    expect_output: {}", scalar(case.get("expect_output"))));
        }
    }

    lines.push(String::new());
    lines.push("Output contract for generator:".to_string());
    lines.push("- Return JSON with keys: yamlfilecontent (required), containerfilecontent (optional), pythonfilecontent (optional).".to_string());
    lines.push("- YAML must include a Deployment and a Service consistent with the service description.".to_string());
    lines.push("- If 'codefile' and 'containerfile' were requested, provide both pythonfilecontent and containerfilecontent consistent with image_name.".to_string());

    lines.join("\n")
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

const STEP: usize = 2;

fn outline_lines(value: &Value, indent: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    let mut lines = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter().filter(|(_, v)| !is_blank(v)) {
                if child.is_object() || child.is_array() {
                    let nested = outline_lines(child, indent + STEP);
                    if !nested.is_empty() {
                        lines.push(format!("{pad}{key}:"));
                        lines.extend(nested);
                    }
                } else {
                    lines.push(format!("{pad}{key}: {}", scalar(Some(child))));
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter().filter(|v| !is_blank(v)) {
                match item {
                    Value::Object(map) => {
                        let mut entries = map.iter().filter(|(_, v)| !is_blank(v));
                        let Some((first_key, first)) = entries.next() else {
                            continue;
                        };
                        if first.is_object() || first.is_array() {
                            lines.push(format!("{pad}- {first_key}:"));
                            lines.extend(outline_lines(first, indent + STEP + 2));
                        } else {
                            lines.push(format!("{pad}- {first_key}: {}", scalar(Some(first))));
                        }
                        let sub = " ".repeat(indent + 2);
                        for (key, child) in entries {
                            if child.is_object() || child.is_array() {
                                let nested = outline_lines(child, indent + 2 + STEP);
                                if !nested.is_empty() {
                                    lines.push(format!("{sub}{key}:"));
                                    lines.extend(nested);
                                }
                            } else {
                                lines.push(format!("{sub}{key}: {}", scalar(Some(child))));
                            }
                        }
                    }
                    Value::Array(_) => {
                        let nested = outline_lines(item, indent + STEP);
                        if !nested.is_empty() {
                            lines.push(format!("{pad}-"));
                            lines.extend(nested);
                        }
                    }
                    scalar_item => lines.push(format!("{pad}- {}", scalar(Some(scalar_item)))),
                }
            }
        }
        other => lines.push(format!("{pad}{}", scalar(Some(other)))),
    }
    lines
}

/// YAML-like outline of a JSON value, skipping empty values.
#[must_use]
pub fn outline_text(value: &Value) -> String {
    outline_lines(value, 0).join("\n")
}
