//! Transform router.
//!
//! Validates operation parameters, splits canonical text into block-aligned
//! chunks, drives the AI gateway per chunk, and reassembles the output.

pub mod chunking;
pub mod prompts;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TransformConfig;
use crate::error::TransformError;
use crate::gateway::{AiGateway, GatewayMode};
use crate::ingestion::TextBlock;
use chunking::{BLOCK_SEPARATOR, chunk_texts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Translate,
    Summarize,
    Transliterate,
    Answer,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Translate => "translate",
            Operation::Summarize => "summarize",
            Operation::Transliterate => "transliterate",
            Operation::Answer => "answer",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation parameters; which ones are required depends on the operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformOutput {
    Text { text: String },
    /// The document does not contain an answer to the question
    NoAnswerFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformResult {
    pub document_id: String,
    pub operation: Operation,
    pub params: TransformParams,
    pub output: TransformOutput,
    pub chunk_count: usize,
}

/// An operation whose required parameters have been checked
enum Plan {
    Translate { target_language: String },
    Summarize { length_hint: Option<String> },
    Transliterate { target_script: String },
    Answer { question: String },
}

fn required(
    value: &Option<String>,
    name: &str,
    operation: Operation,
) -> Result<String, TransformError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransformError::InvalidParameters {
            message: format!("{name} is required for {operation}"),
        })
}

impl Plan {
    fn validate(operation: Operation, params: &TransformParams) -> Result<Self, TransformError> {
        Ok(match operation {
            Operation::Translate => Plan::Translate {
                target_language: required(&params.target_language, "target_language", operation)?,
            },
            Operation::Transliterate => Plan::Transliterate {
                target_script: required(&params.target_script, "target_script", operation)?,
            },
            Operation::Answer => Plan::Answer {
                question: required(&params.question, "question", operation)?,
            },
            Operation::Summarize => Plan::Summarize {
                length_hint: params
                    .length_hint
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string),
            },
        })
    }
}

pub struct TransformRouter {
    gateway: Arc<AiGateway>,
}

impl TransformRouter {
    pub fn new(gateway: Arc<AiGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &AiGateway {
        &self.gateway
    }

    /// Run `operation` over a document's canonical text.
    ///
    /// Parameters are validated before any gateway call. `cancel` is checked
    /// before every gateway call and once more before assembling the result.
    pub async fn transform(
        &self,
        document_id: &str,
        blocks: &[TextBlock],
        operation: Operation,
        params: &TransformParams,
        settings: &TransformConfig,
        cancel: &CancellationToken,
    ) -> Result<TransformResult, TransformError> {
        let plan = Plan::validate(operation, params)?;

        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        let chunks = chunk_texts(&texts, settings.chunk_threshold_chars);

        info!(
            doc_id = %document_id,
            operation = %operation,
            chunks = chunks.len(),
            "Running transform"
        );

        let output = match plan {
            Plan::Translate { target_language } => {
                let mode = GatewayMode::Translate { target_language };
                self.map_chunks(&chunks, &mode, cancel).await?
            }
            Plan::Transliterate { target_script } => {
                let mode = GatewayMode::Transliterate { target_script };
                self.map_chunks(&chunks, &mode, cancel).await?
            }
            Plan::Summarize { length_hint } => {
                self.summarize(&chunks, length_hint, settings, cancel).await?
            }
            Plan::Answer { question } => self.answer(&chunks, &question, cancel).await?,
        };

        check_cancelled(cancel)?;

        Ok(TransformResult {
            document_id: document_id.to_string(),
            operation,
            params: params.clone(),
            output,
            chunk_count: chunks.len(),
        })
    }

    /// Transform each chunk independently and concatenate in order
    async fn map_chunks(
        &self,
        chunks: &[String],
        mode: &GatewayMode,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        let outputs = self.invoke_each(chunks, mode, cancel).await?;
        Ok(TransformOutput::Text {
            text: outputs.join(BLOCK_SEPARATOR),
        })
    }

    async fn invoke_each(
        &self,
        inputs: &[String],
        mode: &GatewayMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, TransformError> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for (index, prompt) in inputs.iter().enumerate() {
            check_cancelled(cancel)?;
            debug!(chunk = index, chars = prompt.len(), "Invoking gateway for chunk");
            let text = self.gateway.invoke(prompt, mode).await?;
            outputs.push(text.trim().to_string());
        }
        Ok(outputs)
    }

    /// Hierarchical summary: summarize chunks, then summarize the joined
    /// summaries, regrouping while they still exceed the threshold.
    async fn summarize(
        &self,
        chunks: &[String],
        length_hint: Option<String>,
        settings: &TransformConfig,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        let final_mode = GatewayMode::Summarize { length_hint };

        if chunks.len() <= 1 {
            let text = match chunks.first() {
                Some(chunk) => {
                    check_cancelled(cancel)?;
                    self.gateway.invoke(chunk, &final_mode).await?.trim().to_string()
                }
                None => String::new(),
            };
            return Ok(TransformOutput::Text { text });
        }

        let partial_mode = GatewayMode::Summarize { length_hint: None };
        let mut summaries = self.invoke_each(chunks, &partial_mode, cancel).await?;
        let mut depth = 1;

        loop {
            let regrouped = chunk_texts(&summaries, settings.chunk_threshold_chars);
            if regrouped.len() <= 1 || depth >= settings.max_summary_depth {
                break;
            }
            debug!(depth, groups = regrouped.len(), "Summaries exceed threshold, regrouping");
            summaries = self.invoke_each(&regrouped, &partial_mode, cancel).await?;
            depth += 1;
        }

        check_cancelled(cancel)?;
        let combined = self
            .gateway
            .invoke(&prompts::combine_summaries_prompt(&summaries), &final_mode)
            .await?;

        Ok(TransformOutput::Text {
            text: combined.trim().to_string(),
        })
    }

    /// Ask each chunk in order; the first chunk that answers wins
    async fn answer(
        &self,
        chunks: &[String],
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        for (index, chunk) in chunks.iter().enumerate() {
            check_cancelled(cancel)?;
            let reply = self
                .gateway
                .invoke(&prompts::question_prompt(chunk, question), &GatewayMode::Answer)
                .await?;

            if !prompts::is_no_answer(&reply) {
                debug!(chunk = index, "Answer found");
                return Ok(TransformOutput::Text {
                    text: reply.trim().to_string(),
                });
            }
        }

        Ok(TransformOutput::NoAnswerFound)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), TransformError> {
    if cancel.is_cancelled() {
        Err(TransformError::Cancelled)
    } else {
        Ok(())
    }
}
