//! Parsing `.worker` files: `---`-fenced YAML frontmatter plus a prompt body.

use super::WorkerDefinition;
use crate::model::{ModelId, check_compatibility};
use std::path::Path;
use thiserror::Error;

/// A field-level problem found while validating a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid frontmatter: {0}")]
    InvalidFrontmatter(String),

    #[error("Invalid worker definition: {}", .issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidDefinition { issues: Vec<Issue> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn is_fence(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == "---"
}

/// Split the leading `---`-fenced block from the body.
///
/// Returns `(None, text)` when the document has no opening fence. An
/// opening fence without a closing one is malformed.
pub fn split_frontmatter(text: &str) -> Result<(Option<&str>, &str), ParseError> {
    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok((None, text));
    };
    if !is_fence(first) {
        return Ok((None, text));
    }

    let fm_start = first.len();
    let mut offset = fm_start;
    for line in lines {
        if is_fence(line) {
            let frontmatter = &text[fm_start..offset];
            let body = &text[offset + line.len()..];
            return Ok((Some(frontmatter), body));
        }
        offset += line.len();
    }
    Err(ParseError::InvalidFrontmatter(
        "opening '---' fence is never closed".to_string(),
    ))
}

fn validate(def: &WorkerDefinition) -> Vec<Issue> {
    let mut issues = Vec::new();

    if def.name.trim().is_empty() {
        issues.push(Issue {
            path: "name".to_string(),
            message: "must be a non-empty identifier".to_string(),
        });
    }
    if def.instructions.is_empty() {
        issues.push(Issue {
            path: "instructions".to_string(),
            message: "worker body must not be empty".to_string(),
        });
    }

    if let Some(patterns) = &def.compatible_models
        && patterns.is_empty()
    {
        issues.push(Issue {
            path: "compatible_models".to_string(),
            message: "must list at least one pattern".to_string(),
        });
    }

    if let Some(model) = &def.model {
        match ModelId::parse(model) {
            Err(e) => issues.push(Issue {
                path: "model".to_string(),
                message: e.to_string(),
            }),
            Ok(id) => {
                if let Some(patterns) = &def.compatible_models
                    && !patterns.is_empty()
                    && check_compatibility(Some(patterns), &id).is_err()
                {
                    issues.push(Issue {
                        path: "model".to_string(),
                        message: format!(
                            "declared model '{model}' does not match compatible_models"
                        ),
                    });
                }
            }
        }
    }

    issues
}

/// Parse a worker document from text.
pub fn parse_worker_str(text: &str) -> Result<WorkerDefinition, ParseError> {
    let (frontmatter, body) = split_frontmatter(text)?;

    // Syntax errors are frontmatter errors; a syntactically fine document
    // that doesn't fit the schema is a definition error with issues.
    let mut definition: WorkerDefinition = match frontmatter {
        Some(yaml) => {
            let value: serde_yaml::Value = serde_yaml::from_str(yaml)
                .map_err(|e| ParseError::InvalidFrontmatter(e.to_string()))?;
            serde_yaml::from_value(value).map_err(|e| ParseError::InvalidDefinition {
                issues: vec![Issue {
                    path: "frontmatter".to_string(),
                    message: e.to_string(),
                }],
            })?
        }
        None => {
            return Err(ParseError::InvalidDefinition {
                issues: vec![Issue {
                    path: "name".to_string(),
                    message: "worker file has no frontmatter".to_string(),
                }],
            });
        }
    };

    definition.instructions = body.trim().to_string();

    let issues = validate(&definition);
    if issues.is_empty() {
        Ok(definition)
    } else {
        Err(ParseError::InvalidDefinition { issues })
    }
}

/// Read and parse a `.worker` file.
pub async fn load_worker_file(path: impl AsRef<Path>) -> Result<WorkerDefinition, ParseError> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let text = String::from_utf8(bytes).map_err(|e| {
        ParseError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    parse_worker_str(&text)
}
