use std::time::Duration;

use async_trait::async_trait;

use crate::agent::claude::{ClaudeClient, RateLimitConfig};
use crate::agent::engine::{AgentEngine, AgentOutcome};
use crate::agent::prompt;
use crate::agent::tools::ToolRegistry;
use crate::agent::{AgentCapability, AgentRequest, AgentResponse, Identity};
use crate::config::{AgentConfig, ClaudeConfig};
use crate::error::{AppError, Result};
use crate::workflow::types::SolverId;

/// Agent capability backed by the Claude Messages API.
///
/// Solvers edit their line in place through the file tools, so the response
/// carries only the narrative; the orchestrator reads the edits back from the
/// line.
pub struct ClaudeAgent {
    claude: ClaudeConfig,
    agent: AgentConfig,
}

impl ClaudeAgent {
    pub fn new(claude: ClaudeConfig, agent: AgentConfig) -> Self {
        Self { claude, agent }
    }

    fn model_for(&self, identity: Identity) -> &str {
        let models = &self.claude.models;
        let overridden = match identity {
            Identity::Solver(SolverId::A) => models.solver_a.as_deref(),
            Identity::Solver(SolverId::B) => models.solver_b.as_deref(),
            Identity::Arbiter => models.arbiter.as_deref(),
        };
        overridden.unwrap_or(&self.claude.model)
    }
}

#[async_trait]
impl AgentCapability for ClaudeAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse> {
        let model = self.model_for(request.identity);
        let client = ClaudeClient::new(
            &self.claude.api_key,
            model,
            self.claude.max_tokens,
            RateLimitConfig {
                max_retries: self.claude.rate_limit_max_retries,
                initial_backoff: Duration::from_secs(self.claude.rate_limit_backoff_secs),
            },
        );
        let tools = ToolRegistry::for_role(request.role, &self.agent);
        let engine = AgentEngine::new(client, tools, self.claude.max_turns);
        let system = prompt::system_prompt(request.role, request.identity);

        tracing::info!(
            role = %request.role,
            identity = %request.identity,
            model,
            "Invoking agent"
        );

        match engine
            .run(&system, &request.working_dir, &request.context)
            .await
        {
            AgentOutcome::Completed { summary } => Ok(AgentResponse::narrative(summary)),
            AgentOutcome::TurnLimitReached => Err(AppError::Capability(format!(
                "{} hit the turn limit ({}) without finishing",
                request.identity, self.claude.max_turns
            ))),
            AgentOutcome::RateLimited { message } => Err(AppError::ClaudeRateLimited(message)),
            AgentOutcome::Failed { error } => Err(AppError::Capability(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOverrides;

    fn agent(models: ModelOverrides) -> ClaudeAgent {
        ClaudeAgent::new(
            ClaudeConfig {
                api_key: "key".to_string(),
                model: "base-model".to_string(),
                models,
                max_tokens: 1024,
                max_turns: 5,
                rate_limit_max_retries: 0,
                rate_limit_backoff_secs: 1,
            },
            AgentConfig::default(),
        )
    }

    #[test]
    fn test_model_overrides_per_identity() {
        let agent = agent(ModelOverrides {
            solver_a: None,
            solver_b: Some("other-model".to_string()),
            arbiter: Some("judge-model".to_string()),
        });
        assert_eq!(agent.model_for(Identity::Solver(SolverId::A)), "base-model");
        assert_eq!(agent.model_for(Identity::Solver(SolverId::B)), "other-model");
        assert_eq!(agent.model_for(Identity::Arbiter), "judge-model");
    }

    #[test]
    fn test_default_model_without_overrides() {
        let agent = agent(ModelOverrides::default());
        assert_eq!(agent.model_for(Identity::Arbiter), "base-model");
    }
}
