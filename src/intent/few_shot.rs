use crate::runlog::{context, RunLog};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXAMPLE_FILES: [&str; 3] = ["myapp.py", "Dockerfile", "vibe.yaml"];

/// Directory of previously successful deployments, one sub-directory per
/// deployment, used as reference examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FewShotBank {
    root: PathBuf,
    deployments: Vec<String>,
}

impl FewShotBank {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, deployments: Vec<String>) -> Self {
        Self {
            root: root.into(),
            deployments,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One deployment rendered as an example, or `None` when any of its
    /// files cannot be read.
    pub async fn deployment_text(&self, name: &str) -> Option<String> {
        let dir = self.root.join(name);
        let mut text = format!("Deployment: {name}\n");
        for file in EXAMPLE_FILES {
            match tokio::fs::read_to_string(dir.join(file)).await {
                Ok(content) => text.push_str(&format!("{file}:\n{content}\n\n")),
                Err(err) => {
                    warn!(deployment = name, file, error = %err, "few-shot example skipped");
                    return None;
                }
            }
        }
        // The last file ends with a single blank line.
        text.pop();
        Some(text)
    }

    /// Appends the bank's deployments to `intent` as reference examples.
    pub async fn charge(&self, intent: &str, log: &RunLog) -> String {
        let listed = self.deployments.join(", ");
        log.note(
            context::INTENT_EXTRACTION,
            &format!("Few-shot charging with [{listed}] from {}", self.root.display()),
        )
        .await;

        let mut charged = format!(
            "{intent}\nHere there are some examples of correct deployment files for reference:\n"
        );
        for name in &self.deployments {
            if let Some(example) = self.deployment_text(name).await {
                charged.push_str(&example);
            }
        }
        debug!(examples = self.deployments.len(), "few-shot prompt charged");

        log.note(
            context::INTENT_EXTRACTION,
            &format!("Few-shot charged with [{listed}] from {}", self.root.display()),
        )
        .await;
        charged
    }
}
