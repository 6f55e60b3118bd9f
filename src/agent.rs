use crate::config::AgentConfig;
use crate::error::EvalError;
use crate::llm::{ChatClient, parse_json_lenient};
use crate::models::AgentResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An agent answers a question about a company.
///
/// Implementations are invoked concurrently by the scheduler and must
/// serialize internally if they are not safe for parallel use.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn evaluate(&self, company: &str, question: &str) -> Result<AgentResult>;
}

pub type AgentFactory = Box<dyn Fn(&AgentConfig) -> Result<Arc<dyn Agent>> + Send + Sync>;

/// Maps agent version identifiers to constructors
pub struct AgentRegistry {
    factories: BTreeMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in agent version
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("v001", |config| {
            Ok(Arc::new(MinimalAgent::from_config(config)?) as Arc<dyn Agent>)
        });
        registry.register("v002", |config| {
            Ok(Arc::new(CitingAgent::from_config(config)?) as Arc<dyn Agent>)
        });
        registry
    }

    pub fn register<F>(&mut self, version: &str, factory: F)
    where
        F: Fn(&AgentConfig) -> Result<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        self.factories.insert(version.to_string(), Box::new(factory));
    }

    pub fn versions(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn build(&self, version: &str, config: &AgentConfig) -> Result<Arc<dyn Agent>, EvalError> {
        let factory = self
            .factories
            .get(version)
            .ok_or_else(|| EvalError::UnsupportedAgentVersion {
                version: version.to_string(),
                available: self.versions(),
            })?;

        factory(config).map_err(|err| EvalError::AgentSetup {
            version: version.to_string(),
            message: format!("{:#}", err),
        })
    }
}

fn user_prompt(company: &str, question: &str, instruction: &str) -> String {
    format!("Company: {}\nQuestion: {}\n{}", company, question, instruction)
}

/// v001: a single chat completion, the reply is the answer
pub struct MinimalAgent {
    client: ChatClient,
    system_prompt: String,
}

impl MinimalAgent {
    pub fn new(client: ChatClient, system_prompt: String) -> Self {
        Self { client, system_prompt }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(ChatClient::from_env(config.settings())?, config.system_prompt.clone()))
    }
}

#[async_trait]
impl Agent for MinimalAgent {
    async fn evaluate(&self, company: &str, question: &str) -> Result<AgentResult> {
        let prompt = user_prompt(company, question, "Please answer concisely and factually.");
        let text = self.client.complete(&self.system_prompt, &prompt).await?;

        if text.is_empty() {
            return Ok(AgentResult::from_answer("(no response)"));
        }
        Ok(AgentResult::from_answer(text))
    }
}

const CITING_INSTRUCTION: &str = "Respond with a compact JSON object with keys \
answer (string), citations (array of source URLs or titles) and assumptions \
(array of strings).";

#[derive(Debug, Deserialize)]
struct CitedAnswer {
    answer: String,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    assumptions: Vec<String>,
}

/// v002: asks the model for an answer with its sources and assumptions
pub struct CitingAgent {
    client: ChatClient,
    system_prompt: String,
}

impl CitingAgent {
    pub fn new(client: ChatClient, system_prompt: String) -> Self {
        Self { client, system_prompt }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(ChatClient::from_env(config.settings())?, config.system_prompt.clone()))
    }

    /// Interpret the model reply; prose that is not the requested JSON becomes a bare answer
    fn parse_reply(text: &str) -> AgentResult {
        let cited = parse_json_lenient(text).and_then(|value| serde_json::from_value::<CitedAnswer>(value).ok());
        match cited {
            Some(cited) => AgentResult {
                answer: cited.answer,
                citations: cited.citations,
                assumptions: cited.assumptions,
            },
            None => AgentResult::from_answer(text),
        }
    }
}

#[async_trait]
impl Agent for CitingAgent {
    async fn evaluate(&self, company: &str, question: &str) -> Result<AgentResult> {
        let prompt = user_prompt(company, question, CITING_INSTRUCTION);
        let text = self.client.complete(&self.system_prompt, &prompt).await?;
        Ok(Self::parse_reply(&text))
    }
}
