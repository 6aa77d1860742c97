//! Prompt presets and the curation/judging contexts built from them.

use crate::types::{CoreIntent, SuggestedAction};

/// Role, deliverable and policy text for one kind of curation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub domain: &'static str,
    pub deliverable: &'static str,
    pub constraints: &'static [&'static str],
    pub acceptance: &'static [&'static str],
    pub ask_when_missing: &'static [&'static str],
    pub safe_defaults: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetName {
    Generic,
    KubernetesServiceStructured,
    KubernetesServicePlain,
}

impl PresetName {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::KubernetesServiceStructured => "kubernetes_service_structured",
            Self::KubernetesServicePlain => "kubernetes_service_plain",
        }
    }

    #[must_use]
    pub const fn preset(&self) -> &'static Preset {
        match self {
            Self::Generic => &GENERIC,
            Self::KubernetesServiceStructured => &KUBERNETES_SERVICE_STRUCTURED,
            Self::KubernetesServicePlain => &KUBERNETES_SERVICE_PLAIN,
        }
    }
}

const GENERIC: Preset = Preset {
    domain: "general task solving",
    deliverable: "a structured answer that strictly follows the provided JSON schema",
    constraints: &[
        "No meta-commentary or apologies",
        "Be deterministic: avoid randomness and vague language",
        "Do not invent external data; if required, propose placeholders",
    ],
    acceptance: &[
        "Valid: the output matches the schema exactly.",
        "Aligned: it answers the user's request directly.",
        "Complete: no key steps or fields are missing.",
        "Accurate: no contradictions or invented facts relevant to the task.",
    ],
    ask_when_missing: &[],
    safe_defaults: &[],
};

const KUBERNETES_SERVICE_STRUCTURED: Preset = Preset {
    domain: "cloud-native service intent specification for Kubernetes artifact generation",
    deliverable: "a structured object that matches the provided service_schema exactly",
    constraints: &[
        "Prefer safe defaults where explicitly allowed; otherwise leave fields empty ('', null, []) rather than guessing.",
        "Do not add endpoints, env vars, or components that are not in the user's request.",
        "Keep values internally consistent (image name, ports, filenames).",
    ],
    acceptance: &[
        "Valid: the output matches service_schema exactly (types, enums, required keys).",
        "Aligned: the service intent reflects the user's request without scope creep.",
        "Complete: all required fields are provided (defaults acceptable where policy allows).",
        "Consistent: image/ports/files agree across sections (artifacts/deployment/service).",
    ],
    ask_when_missing: &[
        "name, description, or functionality are entirely absent and cannot be reasonably inferred.",
        "artifacts.layout.codefile is required by policy but HTTP interface is empty (no routes).",
        "The user mentions a specific language/runtime/image that conflicts with the schema enum or safe defaults.",
        "Ports are contradictory (e.g., service.port != 80 if schema expects 80) or invalid given enums.",
    ],
    safe_defaults: &[
        "codefile.language=python; codefile.version=3.11; codefile.file=myapp.py",
        "containerfile.runtime=docker; containerfile.base_image=python:3.11-slim; containerfile.image_name=localhost:32000/myapp:latest; containerfile.file=Dockerfile",
        "yamlfile.file=vibe.yaml; yamlfile.include=[deployment, service]; yamlfile.image=localhost:32000/myapp:latest",
        "deployment.replicas=1; service.type=ClusterIP; service.port=80; service.target_port=5000",
        "resources.requests: cpu=100m, memory=128Mi; resources.limits: cpu=200m, memory=256Mi",
    ],
};

const KUBERNETES_SERVICE_PLAIN: Preset = Preset {
    domain: "intent extraction for the rapid prototyping of cloud-native applications",
    deliverable: "ONLY a textual/structured specification of what must be implemented (components, languages, versions, filenames, images, ports, resources). DO NOT generate any code, YAML, shell commands, or fenced code blocks.",
    constraints: &[
        "You do not implement any code or yaml, just the description.",
        "Output MUST NOT include fenced code blocks (```), snippets, manifests, apiVersion/kind sections, or shell commands.",
        "Restrict language to Python only (no Go/Node/Java/etc.).",
        "Restrict runtime to Docker only (no Podman/Buildpacks/OCI variants).",
        "Prefer safe defaults where explicitly allowed; otherwise leave fields empty (\"\"), null, or [] rather than guessing.",
        "Do not add endpoints, environment variables, volumes, or components that are not in the user's request.",
        "Keep values internally consistent (image name, ports, filenames).",
        "If the user explicitly asks for a non-Python language or non-Docker runtime, treat it as a conflict and use ask_when_missing to request clarification instead of changing the stack.",
        "Mention default Kubernetes artifacts (deployment, service) only as items in the specification; DO NOT emit their YAML.",
    ],
    acceptance: &[
        "Valid: the output specifies completely the requirements for generating a cloud-native service for the given intent, without any implementation artifacts.",
        "Aligned: the service intent reflects the user's request without scope creep and without adding endpoints or env vars not requested.",
        "Complete: all required information are provided or safely defaulted; unknowns are left as \"\", null, or [].",
        "Consistent: image/ports/files agree across sections (artifacts/deployment/service) and match safe defaults.",
        "No code or YAML present anywhere in the output.",
    ],
    ask_when_missing: &[
        "Service name, high-level description, or core functionality are absent and cannot be reasonably inferred.",
        "HTTP interface is required by the caller's schema (e.g., an artifacts.layout.codefile is expected) but no routes/HTTP behavior were provided.",
        "The user requests a specific language/runtime/image that conflicts with the policy (allowed: Python 3.11 + Docker).",
        "Provided ports are contradictory or invalid given the safe defaults (e.g., service.port not 80, target_port not 5000) and no justification was given.",
        "Image repository or naming convention must be customized (e.g., non-local registry) and the user has not supplied one.",
    ],
    safe_defaults: &[
        "Language: python; Version=3.11; File: myapp.py",
        "Runtime: Docker; Base image: python:3.11-slim; Image name: localhost:32000/myapp:latest; File: Dockerfile",
        "Yamlfile: vibe.yaml; Include in yamlfile: deployment, service; Yamlfile image: localhost:32000/myapp:latest (reference only; do not emit YAML)",
        "deployment.replicas=1; service.type=ClusterIP; service.port=80; service.target_port=5000",
        "resources.requests: cpu=100m, memory=128Mi; resources.limits: cpu=200m, memory=256Mi",
    ],
};

/// `title` followed by one `- item` line per entry; empty for no items.
#[must_use]
pub fn join_bullets(title: &str, items: &[&str]) -> String {
    if items.is_empty() {
        return String::new();
    }
    format!("{title}\n- {}", items.join("\n- "))
}

/// Question and operator answer from the previous iteration's `ask`.
fn previous_clarification(intent: &CoreIntent) -> Option<(&str, &str)> {
    let grade = intent.last_try.grade.as_ref()?;
    if grade.suggested_action != SuggestedAction::Ask {
        return None;
    }
    Some((
        grade.clarification_question.as_deref()?,
        grade.clarification_answer.as_deref().unwrap_or(""),
    ))
}

/// System context for a curation call.
///
/// From the second iteration on, and when `require_improvement_plan` is set,
/// the tail asks for an improvement plan grounded in the previous grade.
#[must_use]
pub fn build_generation_context(
    intent: &CoreIntent,
    preset: PresetName,
    require_improvement_plan: bool,
) -> String {
    let p = preset.preset();
    let clarification = previous_clarification(intent)
        .map(|(question, answer)| {
            format!(
                "\nClarifications from the user after last attempt to be considered:\nQuestion: {question}\nAnswer: {answer}\n"
            )
        })
        .unwrap_or_default();
    let defaults = join_bullets(
        "Otherwise, apply these safe defaults if a required field is unspecified:",
        p.safe_defaults,
    );

    let base = format!(
        "You are a senior specialist in {domain}.
Your job is to produce {deliverable}.


Rules for generation:
- Do NOT ask questions or request confirmation.
- Be specific and operational; avoid vague phrases.
- If something is unknown and cannot be inferred, use explicit placeholders (\"\", null, []) or the safe defaults below.

{constraints}
{acceptance}
{defaults}
{clarification}
",
        domain = p.domain,
        deliverable = p.deliverable,
        constraints = join_bullets("Constraints:", p.constraints),
        acceptance = join_bullets("Acceptance criteria you must satisfy:", p.acceptance),
    );

    let first = intent.last_try.iteration.is_none();
    let tail = if first || !require_improvement_plan {
        "Output: a single answer conforming exactly to the request provided by the caller."
    } else {
        "Because there is a previous attempt and a grade, you MUST:
1) Produce 'improvement_plan': an array of objects [{\"issue\", \"fix\", \"evidence_from_previous\"}], grounded in the prior answer and its grade.
2) Produce the revised deliverable under the schema (same keys the caller expects).
Return both in a format that matches the caller's format.
"
    };
    base + tail
}

/// System context for a judging call. `actions` lists the verdicts the
/// judge may choose from.
#[must_use]
pub fn build_validation_context(
    intent: &CoreIntent,
    preset: PresetName,
    actions: &[SuggestedAction],
) -> String {
    let p = preset.preset();
    let clarification = previous_clarification(intent)
        .map(|(question, answer)| {
            format!(
                "\nClarifications from the user to be considered:\nQuestion: {question}\nAnswer: {answer}\n"
            )
        })
        .unwrap_or_default();
    let offered = actions
        .iter()
        .map(|action| format!("\"{action}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let mut policy = vec![
        "1) \"approve\": Output fully meets the request and acceptance criteria. Nothing essential is missing. (score = 5)",
        "2) \"retry\": On-topic but fixable issues exist that do not require user input (missing fields, unclear steps, inconsistencies). Provide a concise \"retry_rationale\". (typical score 3-4)",
    ];
    if actions.contains(&SuggestedAction::Ask) {
        policy.push(
            "3) \"ask\": Missing/unknown/ambiguous information that cannot be safely defaulted. Provide ONE concrete \"clarification_question\". (typical score <= 3)",
        );
    }
    let ask_policy = if actions.contains(&SuggestedAction::Ask) {
        join_bullets(
            "Choose \"ask\" if ANY of the following hold:",
            p.ask_when_missing,
        )
    } else {
        String::new()
    };

    format!(
        "You are an impartial expert reviewer for {domain}.
Evaluate the candidate strictly against the acceptance criteria below.
Score on a 1-5 scale where 5 means fully acceptable.

{acceptance}

Decision policy (choose exactly one action from [{offered}]):
{policy}
{ask_policy}

Hard rules:
- Do NOT choose \"approve\" unless score is exactly 5 and all acceptance criteria are met.
- If a critical field is absent and not covered by safe defaults, choose \"ask\" when offered, otherwise \"retry\".
- Include a clarification question ONLY if action is \"ask\".
- Include a retry rationale ONLY if action is \"retry\".

Precedence:
- If both \"ask\" and \"retry\" seem plausible, choose \"ask\".
- If it already meets the bar, choose \"approve\" even if minor stylistic tweaks are possible.
{clarification}
Return JSON that matches the validator schema from the caller (includes: explanation, score, suggested_action, and conditional fields). Keep explanation concise and actionable.
",
        domain = p.domain,
        acceptance = join_bullets("Acceptance criteria:", p.acceptance),
        policy = policy.join("\n"),
    )
}
