use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::context::FileContext;

pub const DEFAULT_FILE_CHAR_LIMIT: usize = 1000;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Placeholders: `{os}`
    pub instructions: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CommandPromptConfig {
    /// Shared JSON reply contract appended to both framings.
    pub reply_format: String,
    /// First pass. Placeholders: `{os}`, `{query}`, `{reply_format}`
    pub request: String,
    /// Second pass with gathered output. Placeholders: `{os}`, `{query}`,
    /// `{output}`, `{reply_format}`
    pub finalize: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Placeholders: `{os}`, `{command}`, `{stdout}`, `{stderr}`
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system: SystemConfig,
    pub command: CommandPromptConfig,
    pub analysis: AnalysisConfig,
}

impl PromptsConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["prompts.toml", "./prompts.toml", "../prompts.toml"];

        for path in &config_paths {
            if let Ok(content) = fs::read_to_string(path) {
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse prompts.toml from {}", path));
            }
        }

        Ok(Self::default())
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                instructions: "You are a helpful CLI assistant running on a {os} operating system. \
Always answer clearly and concisely. Provide commands compatible with this OS."
                    .to_string(),
            },
            command: CommandPromptConfig {
                reply_format: r#"Respond ONLY with a single JSON object in exactly this format. Every field must be present, use an empty string or false when a field does not apply. Do not add any other text, comments, or markdown.

{
  "response": "A brief, one-sentence explanation of what the command does, or why more information is needed.",
  "command": "The single, exact shell command to execute, or an empty string.",
  "needs_output": false,
  "pre_command": "A read-only shell command whose output you need before you can answer, or an empty string.",
  "next_question": "A question for the user if you need details only they can provide, or an empty string."
}"#
                .to_string(),
                request: r#"You are an expert DevOps assistant. Your task is to convert a user's request into a precise shell command.
The user is running on a {os} operating system. All commands MUST be compatible with {os}.
The command must be a single-line string with proper escaping for complex operations like file creation.
If you need to inspect the system first (for example list files or check an installed version), set "needs_output" to true, put that inspection command in "pre_command" and leave "command" empty.
If you need information only the user can give, leave "command" empty and ask in "next_question".

{reply_format}

User Query: "{query}""#
                    .to_string(),
                finalize: r#"You are an expert DevOps assistant finishing a request on a {os} operating system.
You previously asked to inspect the system. The output of that inspection is below; it is everything you asked for.
Use it to produce the final command now. Do NOT request this information again: set "needs_output" to false and "pre_command" to an empty string.

User Query: "{query}"

Inspection output:
{output}

{reply_format}"#
                    .to_string(),
            },
            analysis: AnalysisConfig {
                prompt: r#"As an expert DevOps and programming troubleshooter, please analyze the following execution on {os}.
If there are errors, provide a concise analysis and suggest solutions. If successful, briefly confirm it.

Command: `{command}`
Standard Output:
{stdout}
Standard Error:
{stderr}"#
                    .to_string(),
            },
        }
    }
}

/// Renders model prompts. Output depends only on the inputs, the templates
/// and the OS name given at construction.
#[derive(Debug, Clone)]
pub struct PromptFormatter {
    config: PromptsConfig,
    os_name: String,
    file_char_limit: usize,
}

impl PromptFormatter {
    pub fn new(config: PromptsConfig, os_name: impl Into<String>, file_char_limit: usize) -> Self {
        Self {
            config,
            os_name: os_name.into(),
            file_char_limit,
        }
    }

    pub fn os_name(&self) -> &str {
        &self.os_name
    }

    pub fn system_prompt(&self) -> String {
        fill(&self.config.system.instructions, &[("os", self.os_name.as_str())])
    }

    /// Builds the command prompt for `query`.
    ///
    /// With `prior_output` the prompt switches to the finalize framing. Each
    /// file in `files` is appended under its own heading, cut to
    /// `file_char_limit` characters.
    pub fn render(&self, query: &str, prior_output: Option<&str>, files: Option<&FileContext>) -> String {
        let reply_format = self.config.command.reply_format.as_str();
        let mut prompt = match prior_output {
            None => fill(
                &self.config.command.request,
                &[("os", self.os_name.as_str()), ("query", query), ("reply_format", reply_format)],
            ),
            Some(output) => {
                let output = if output.trim().is_empty() { "(no output)" } else { output };
                fill(
                    &self.config.command.finalize,
                    &[
                        ("os", self.os_name.as_str()),
                        ("query", query),
                        ("output", output),
                        ("reply_format", reply_format),
                    ],
                )
            }
        };

        if let Some(files) = files.filter(|f| !f.is_empty()) {
            prompt.push_str("\n\n# Project Files Context:\n");
            for (name, content) in files {
                let excerpt: String = content.chars().take(self.file_char_limit).collect();
                prompt.push_str(&format!("\n## File: {}\n{}\n", name, excerpt));
            }
        }

        prompt
    }

    pub fn render_analysis(&self, command: &str, stdout: &str, stderr: &str) -> String {
        fill(
            &self.config.analysis.prompt,
            &[
                ("os", self.os_name.as_str()),
                ("command", command),
                ("stdout", stdout),
                ("stderr", stderr),
            ],
        )
    }
}

/// Substitutes `{name}` placeholders in one pass, so values that happen to
/// contain placeholder text are never expanded again.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (close, *v))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
