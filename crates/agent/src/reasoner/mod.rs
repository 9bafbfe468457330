//! The Reasoner: asks the language model for the next thought and action.
//!
//! One call to [`Reasoner::generate_action`] renders a prompt through the
//! configured [`PromptStrategy`], sends it to the [`Provider`], and parses
//! the reply. Transient provider failures and unparsable replies are retried
//! up to the [`RetryPolicy`] limit; after that the step fails with a
//! [`ReasoningError`].

pub mod parse;
pub mod retry;
pub mod strategy;

use std::sync::Arc;

use codeact_config::AgentSettings;
use codeact_core::{AgentEvent, EventBus, Message, Provider, ProviderError, ProviderRequest};
use thiserror::Error;
use tracing::{debug, warn};

pub use parse::{ParseError, ParsedAction, parse_response};
pub use retry::RetryPolicy;
pub use strategy::{
    CodeActStrategy, FewShotExample, FewShotStrategy, PromptStrategy, ReasoningInput,
    render_variables,
};

/// The reasoner gave up on a step.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("language model failed after {attempts} attempt(s): {source}")]
    Provider {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("no usable response after {attempts} attempt(s): {source}")]
    Unparsable {
        attempts: u32,
        #[source]
        source: ParseError,
    },
}

impl ReasoningError {
    pub fn attempts(&self) -> u32 {
        match self {
            ReasoningError::Provider { attempts, .. } | ReasoningError::Unparsable { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// The thought and action for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAction {
    pub thought: String,
    pub code: String,
    /// Model calls it took to get a usable reply
    pub attempts: u32,
}

pub struct Reasoner {
    provider: Arc<dyn Provider>,
    strategy: Arc<dyn PromptStrategy>,
    retry: RetryPolicy,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    stream: bool,
    events: Arc<EventBus>,
}

impl Reasoner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            strategy: Arc::new(CodeActStrategy::default()),
            retry: RetryPolicy::default(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            stream: false,
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn from_settings(provider: Arc<dyn Provider>, settings: &AgentSettings) -> Self {
        let mut strategy = CodeActStrategy::new();
        if let Some(persona) = &settings.system_prompt {
            strategy = strategy.with_persona(persona.clone());
        }
        Self::new(provider, settings.model.clone())
            .with_strategy(Arc::new(strategy))
            .with_retry(RetryPolicy::from_config(&settings.reasoner))
            .with_temperature(settings.temperature)
            .with_max_tokens(settings.max_tokens)
            .with_stream(settings.stream)
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn PromptStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Stream model output, publishing each token as [`AgentEvent::StreamToken`].
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn strategy(&self) -> &dyn PromptStrategy {
        self.strategy.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The system prompt the strategy renders for `input`.
    pub fn system_prompt(&self, input: &ReasoningInput<'_>) -> String {
        self.strategy.system_prompt(input)
    }

    /// Produce the thought and action for the step described by `input`.
    pub async fn generate_action(
        &self,
        input: &ReasoningInput<'_>,
    ) -> Result<GeneratedAction, ReasoningError> {
        let base = self.strategy.messages(input);
        let mut messages = base.clone();
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            debug!(
                step = input.step_number,
                attempt,
                strategy = self.strategy.name(),
                "Requesting action from model"
            );

            let failure = match self.call_model(messages.clone()).await {
                Ok(text) => match parse_response(&text) {
                    Ok(parsed) => {
                        return Ok(GeneratedAction {
                            thought: parsed.thought,
                            code: parsed.code,
                            attempts: attempt,
                        });
                    }
                    Err(e) => {
                        warn!(step = input.step_number, attempt, error = %e, "Unusable model response");
                        // Re-prompt with the failed reply and what was wrong with it
                        messages = base.clone();
                        messages.push(Message::assistant(text));
                        messages.push(Message::user(self.strategy.retry_prompt(&e.to_string())));
                        if attempt >= max_attempts {
                            return Err(ReasoningError::Unparsable {
                                attempts: attempt,
                                source: e,
                            });
                        }
                        None
                    }
                },
                Err(e) if e.is_retryable() => {
                    warn!(step = input.step_number, attempt, error = %e, "Model call failed");
                    if attempt >= max_attempts {
                        return Err(ReasoningError::Provider {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    Some(e)
                }
                Err(e) => {
                    return Err(ReasoningError::Provider {
                        attempts: attempt,
                        source: e,
                    });
                }
            };

            // Parse failures are retried right away; provider failures back off
            if let Some(error) = failure {
                let delay = self.retry.delay_after(attempt, &error);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// A conversational reply to `history`, outside the step loop.
    pub async fn respond(&self, history: &[Message]) -> Result<String, ReasoningError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.strategy.chat_prompt()));
        messages.extend(history.iter().cloned());

        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            match self.call_model(messages.clone()).await {
                Ok(reply) => return Ok(reply.trim().to_string()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, error = %e, "Chat model call failed");
                    tokio::time::sleep(self.retry.delay_after(attempt, &e)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ReasoningError::Provider {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// One model call; the raw reply text.
    async fn call_model(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
            stop: vec![],
        };

        let text = if self.stream {
            let mut rx = self.provider.stream(request).await?;
            let mut text = String::new();
            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                if let Some(token) = chunk.content {
                    self.events.emit(AgentEvent::StreamToken {
                        token: token.clone(),
                    });
                    text.push_str(&token);
                }
                if let Some(usage) = chunk.usage {
                    debug!(total_tokens = usage.total_tokens, "Streamed completion usage");
                }
                if chunk.done {
                    break;
                }
            }
            text
        } else {
            let response = self.provider.complete(request).await?;
            if let Some(usage) = &response.usage {
                debug!(
                    model = %response.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Completion usage"
                );
            }
            response.message.content
        };

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for Reasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reasoner")
            .field("provider", &self.provider.name())
            .field("strategy", &self.strategy.name())
            .field("model", &self.model)
            .field("retry", &self.retry)
            .field("stream", &self.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use codeact_core::{ContextVariables, Role};

    const GOOD: &str = "<thought>Add them.</thought><action>complete(2 + 2)</action>";

    fn input(vars: &ContextVariables) -> ReasoningInput<'_> {
        ReasoningInput {
            task_description: "add",
            step_number: 1,
            max_iterations: 3,
            context_variables: vars,
            history_text: "",
            tool_docs: "",
            conversation_history: "",
            allowed_modules: "math",
        }
    }

    fn reasoner(provider: &Arc<ScriptedProvider>) -> Reasoner {
        Reasoner::new(provider.clone(), "test-model").with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn parses_first_good_reply() {
        let provider = Arc::new(ScriptedProvider::new([GOOD]));
        let vars = ContextVariables::new();
        let action = reasoner(&provider).generate_action(&input(&vars)).await.unwrap();
        assert_eq!(action.thought, "Add them.");
        assert_eq!(action.code, "complete(2 + 2)");
        assert_eq!(action.attempts, 1);
    }

    #[tokio::test]
    async fn reprompts_with_parse_failure() {
        let provider = Arc::new(ScriptedProvider::new(["just some prose", GOOD]));
        let vars = ContextVariables::new();
        let action = reasoner(&provider).generate_action(&input(&vars)).await.unwrap();
        assert_eq!(action.attempts, 2);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let retry = &requests[1].messages;
        assert_eq!(retry.len(), requests[0].messages.len() + 2);
        assert_eq!(retry[retry.len() - 2].role, Role::Assistant);
        assert!(retry.last().unwrap().content.contains("no <thought> block"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::from_results(vec![
            Err(ProviderError::Timeout("slow".into())),
            Ok(String::new()),
            Ok(GOOD.into()),
        ]));
        let vars = ContextVariables::new();
        let action = reasoner(&provider).generate_action(&input(&vars)).await.unwrap();
        assert_eq!(action.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let provider = Arc::new(ScriptedProvider::new(["nope", "still nope", "no", GOOD]));
        let vars = ContextVariables::new();
        let err = reasoner(&provider).generate_action(&input(&vars)).await.unwrap_err();
        assert!(matches!(err, ReasoningError::Unparsable { attempts: 3, .. }), "{err}");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let provider = Arc::new(ScriptedProvider::from_results(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            Ok(GOOD.into()),
        ]));
        let vars = ContextVariables::new();
        let err = reasoner(&provider).generate_action(&input(&vars)).await.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn streaming_publishes_tokens() {
        let provider = Arc::new(ScriptedProvider::new([GOOD]));
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let reasoner = reasoner(&provider)
            .with_stream(true)
            .with_events(Arc::clone(&events));
        let vars = ContextVariables::new();
        reasoner.generate_action(&input(&vars)).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "stream_token");
        assert!(provider.requests()[0].stream);
    }

    #[tokio::test]
    async fn chat_reply() {
        let provider = Arc::new(ScriptedProvider::new(["  Hello there.  "]));
        let reply = reasoner(&provider)
            .respond(&[Message::user("hi")])
            .await
            .unwrap();
        assert_eq!(reply, "Hello there.");
        let sent = &provider.requests()[0].messages;
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[1].content, "hi");
    }
}
