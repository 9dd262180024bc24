use std::path::Path;

use crate::agent::claude::{ClaudeClient, ContentBlock, Message, MessageContent, MessagesRequest};
use crate::agent::tools::{ToolOutput, ToolRegistry};
use crate::error::{AppError, Result};

/// Outcome of one tool-use conversation.
#[derive(Debug)]
pub enum AgentOutcome {
    /// The model ended its turn; `summary` is its final text.
    Completed { summary: String },
    /// The model kept calling tools until the turn budget ran out.
    TurnLimitReached,
    /// Claude kept rate limiting after all retries.
    RateLimited { message: String },
    Failed { error: String },
}

pub struct AgentEngine {
    client: ClaudeClient,
    tools: ToolRegistry,
    max_turns: u32,
}

impl AgentEngine {
    pub fn new(client: ClaudeClient, tools: ToolRegistry, max_turns: u32) -> Self {
        Self {
            client,
            tools,
            max_turns,
        }
    }

    /// Run the agentic loop.
    ///
    /// - `system_prompt`: role instructions.
    /// - `workspace_root`: working tree the tools operate on.
    /// - `initial_message`: the job description for this invocation.
    pub async fn run(
        &self,
        system_prompt: &str,
        workspace_root: &Path,
        initial_message: &str,
    ) -> AgentOutcome {
        let tool_definitions = self.tools.definitions();

        let mut messages = vec![Message {
            role: "user".to_string(),
            content: MessageContent::Text(initial_message.to_string()),
        }];

        let mut total_input_tokens = 0u32;
        let mut total_output_tokens = 0u32;

        for turn in 0..self.max_turns {
            tracing::debug!(turn = turn, "Agent turn");

            let request = MessagesRequest {
                model: self.client.model().to_string(),
                max_tokens: self.client.max_tokens(),
                system: system_prompt.to_string(),
                messages: messages.clone(),
                tools: tool_definitions.clone(),
            };

            let response = match self.client.send_message(&request).await {
                Ok(r) => r,
                Err(AppError::ClaudeRateLimited(msg)) => {
                    tracing::warn!("Claude API rate limited, stopping agent");
                    return AgentOutcome::RateLimited { message: msg };
                }
                Err(e) => {
                    return AgentOutcome::Failed {
                        error: format!("Claude API error: {e}"),
                    };
                }
            };

            total_input_tokens += response.usage.input_tokens;
            total_output_tokens += response.usage.output_tokens;

            tracing::debug!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                stop_reason = ?response.stop_reason,
                "Claude response"
            );

            let stop_reason = response.stop_reason.as_deref().unwrap_or("unknown");

            match stop_reason {
                "end_turn" => {
                    let summary = extract_text(&response.content);
                    tracing::info!(
                        total_input_tokens,
                        total_output_tokens,
                        turns = turn + 1,
                        "Agent completed"
                    );
                    return AgentOutcome::Completed { summary };
                }
                "tool_use" => {
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content.clone()),
                    });

                    let mut tool_results = Vec::new();

                    for block in &response.content {
                        if let ContentBlock::ToolUse { id, name, input } = block {
                            tracing::debug!(tool = %name, "Executing tool");

                            let (content, is_error) =
                                match self.execute_tool(workspace_root, name, input).await {
                                    Ok(ToolOutput::Success(content)) => (content, None),
                                    Ok(ToolOutput::Error(error)) => {
                                        tracing::debug!(tool = %name, error = %error, "Tool error");
                                        (error, Some(true))
                                    }
                                    Err(e) => {
                                        tracing::warn!(tool = %name, error = %e, "Tool execution error");
                                        (format!("Internal error: {e}"), Some(true))
                                    }
                                };

                            tool_results.push(ContentBlock::ToolResult {
                                tool_use_id: id.clone(),
                                content,
                                is_error,
                            });
                        }
                    }

                    messages.push(Message {
                        role: "user".to_string(),
                        content: MessageContent::Blocks(tool_results),
                    });
                }
                "max_tokens" => {
                    tracing::warn!("Agent response hit max_tokens limit");
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content),
                    });
                    messages.push(Message {
                        role: "user".to_string(),
                        content: MessageContent::Text("Please continue.".to_string()),
                    });
                }
                other => {
                    tracing::warn!(stop_reason = other, "Unexpected stop reason");
                    return AgentOutcome::Failed {
                        error: format!("Unexpected stop reason: {other}"),
                    };
                }
            }
        }

        tracing::warn!(max_turns = self.max_turns, "Agent hit turn limit");
        AgentOutcome::TurnLimitReached
    }

    async fn execute_tool(
        &self,
        workspace_root: &Path,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolOutput::Error(format!(
                "Unknown or unavailable tool: {name}"
            )));
        };

        tool.execute(workspace_root, input.clone()).await
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::Text { text } = block {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
