//! Prompt construction strategies.
//!
//! A [`PromptStrategy`] turns the reasoning inputs for one step into the
//! chat messages sent to the model. The response format is the same for
//! every strategy, so parsing never depends on which one is in use.

use codeact_core::{ContextVariables, Message, value_to_text};

/// Everything the reasoner knows when asked for the next action.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningInput<'a> {
    pub task_description: &'a str,
    /// 1-based number of the step being generated
    pub step_number: u32,
    pub max_iterations: u32,
    pub context_variables: &'a ContextVariables,
    /// Rendered, token-bounded step history
    pub history_text: &'a str,
    pub tool_docs: &'a str,
    /// Rendered earlier user/assistant exchanges of the session
    pub conversation_history: &'a str,
    /// Comma-separated modules action code may import
    pub allowed_modules: &'a str,
}

pub trait PromptStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// The system message for a reasoning step.
    fn system_prompt(&self, input: &ReasoningInput<'_>) -> String;

    /// The user message describing the current state of the task.
    fn user_prompt(&self, input: &ReasoningInput<'_>) -> String {
        default_user_prompt(input)
    }

    /// Messages for a reasoning step.
    fn messages(&self, input: &ReasoningInput<'_>) -> Vec<Message> {
        vec![
            Message::system(self.system_prompt(input)),
            Message::user(self.user_prompt(input)),
        ]
    }

    /// Follow-up sent after a response that could not be parsed.
    fn retry_prompt(&self, failure: &str) -> String {
        format!(
            "Your previous response could not be used: {failure}.\n\
             Reply again with exactly one <thought>...</thought> block followed by \
             exactly one <action>...</action> block."
        )
    }

    /// System message for conversational replies outside a task.
    fn chat_prompt(&self) -> String {
        "You are a helpful assistant. Answer the user directly and concisely.".into()
    }
}

const DEFAULT_PERSONA: &str = "You are a CodeAct agent. You solve tasks step by step: at every \
step you think about what to do next and then act by writing a short program. The program runs \
in a sandbox, and its result, printed output and any error are shown to you at the next step.";

const LANGUAGE_GUIDE: &str = "\
## Action language
Actions are written in a small Python-like language:
- Assignments, `if`/`elif`/`else`, `for`, `while`, `def`, list and map literals, comprehensions, f-strings.
- Call tools as `toolbox.tool(arg, name=value)`; their results are ordinary values.
- `print(...)` output is shown to you at the next step.
- Variables you assign are kept and available at the next step.
- Call `complete(answer)` once the task is solved, `abort(reason)` if it cannot be solved, \
or `continue_task(result, next_step)` to record progress and keep going.
- Only the modules listed below may be imported. File, network and process access is \
only possible through tools.";

const RESPONSE_FORMAT: &str = "\
## Response format
Reply with exactly one thought block and exactly one action block, and nothing else:
<thought>
Your reasoning about what to do next.
</thought>
<action>
code to run
</action>";

/// The system prompt shared by the built-in strategies.
fn base_system_prompt(persona: &str, input: &ReasoningInput<'_>) -> String {
    let mut out = String::with_capacity(persona.len() + input.tool_docs.len() + 1024);
    out.push_str(persona.trim());
    out.push_str("\n\n");
    out.push_str(LANGUAGE_GUIDE);
    out.push_str("\n\n## Allowed imports\n");
    if input.allowed_modules.is_empty() {
        out.push_str("(none)\n");
    } else {
        out.push_str(input.allowed_modules);
        out.push('\n');
    }
    out.push_str("\n## Tools\n");
    if input.tool_docs.trim().is_empty() {
        out.push_str("(no tools available)\n");
    } else {
        out.push_str(input.tool_docs.trim_end());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(RESPONSE_FORMAT);
    out
}

fn default_user_prompt(input: &ReasoningInput<'_>) -> String {
    let mut out = String::new();
    if !input.conversation_history.trim().is_empty() {
        out.push_str("## Earlier conversation\n");
        out.push_str(input.conversation_history.trim_end());
        out.push_str("\n\n");
    }
    out.push_str("## Task\n");
    out.push_str(input.task_description.trim());
    out.push_str("\n\n");
    out.push_str(&format!(
        "## Progress\nThis is step {} of at most {}.\n",
        input.step_number, input.max_iterations
    ));
    if !input.context_variables.is_empty() {
        out.push_str("\n## Variables\n");
        out.push_str(&render_variables(input.context_variables));
    }
    if !input.history_text.trim().is_empty() {
        out.push_str("\n## Previous steps\n");
        out.push_str(input.history_text.trim_end());
        out.push('\n');
    }
    out.push_str("\nWhat is the next step?");
    out
}

const MAX_VARIABLE_CHARS: usize = 200;

/// One `name = value` line per variable, long values shortened.
pub fn render_variables(variables: &ContextVariables) -> String {
    let mut out = String::new();
    for (name, value) in variables {
        let text = match value {
            serde_json::Value::String(_) => value.to_string(),
            other => value_to_text(other),
        };
        let shown: String = text.chars().take(MAX_VARIABLE_CHARS).collect();
        let ellipsis = if shown.len() < text.len() { "..." } else { "" };
        out.push_str(&format!("{name} = {shown}{ellipsis}\n"));
    }
    out
}

/// The default strategy: instructions, tools and the task, zero-shot.
#[derive(Debug, Clone, Default)]
pub struct CodeActStrategy {
    persona: Option<String>,
}

impl CodeActStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the opening persona paragraph. The language guide, tools and
    /// response format are always included.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }
}

impl PromptStrategy for CodeActStrategy {
    fn name(&self) -> &str {
        "codeact"
    }

    fn system_prompt(&self, input: &ReasoningInput<'_>) -> String {
        base_system_prompt(self.persona.as_deref().unwrap_or(DEFAULT_PERSONA), input)
    }
}

/// A worked example shown to the model before the real task.
#[derive(Debug, Clone)]
pub struct FewShotExample {
    pub task: String,
    pub thought: String,
    pub action: String,
}

impl FewShotExample {
    pub fn new(
        task: impl Into<String>,
        thought: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            thought: thought.into(),
            action: action.into(),
        }
    }

    fn response(&self) -> String {
        format!(
            "<thought>\n{}\n</thought>\n<action>\n{}\n</action>",
            self.thought.trim(),
            self.action.trim()
        )
    }
}

/// [`CodeActStrategy`] preceded by example exchanges.
#[derive(Debug, Clone)]
pub struct FewShotStrategy {
    base: CodeActStrategy,
    examples: Vec<FewShotExample>,
}

impl FewShotStrategy {
    pub fn new(examples: Vec<FewShotExample>) -> Self {
        Self {
            base: CodeActStrategy::default(),
            examples,
        }
    }

    pub fn with_base(mut self, base: CodeActStrategy) -> Self {
        self.base = base;
        self
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }
}

impl Default for FewShotStrategy {
    fn default() -> Self {
        Self::new(vec![
            FewShotExample::new(
                "What is 17 * 23?",
                "I can compute this with the calculator tool and finish with the answer.",
                "product = calculator.calculate(\"17 * 23\")\ncomplete(product)",
            ),
            FewShotExample::new(
                "Sum the squares of 1 through 5 and report whether the total is even.",
                "A comprehension gives the squares; I record the total and check parity.",
                "total = sum([n ** 2 for n in range(1, 6)])\ncomplete({\"total\": total, \"even\": total % 2 == 0})",
            ),
        ])
    }
}

impl PromptStrategy for FewShotStrategy {
    fn name(&self) -> &str {
        "few_shot"
    }

    fn system_prompt(&self, input: &ReasoningInput<'_>) -> String {
        self.base.system_prompt(input)
    }

    fn messages(&self, input: &ReasoningInput<'_>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2 + self.examples.len() * 2);
        messages.push(Message::system(self.system_prompt(input)));
        for example in &self.examples {
            messages.push(Message::user(format!(
                "## Task\n{}\n\n## Progress\nThis is step 1 of at most {}.\n\nWhat is the next step?",
                example.task.trim(),
                input.max_iterations
            )));
            messages.push(Message::assistant(example.response()));
        }
        messages.push(Message::user(self.user_prompt(input)));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::parse::parse_response;
    use codeact_core::Role;
    use serde_json::json;

    fn input<'a>(vars: &'a ContextVariables) -> ReasoningInput<'a> {
        ReasoningInput {
            task_description: "Compute 2+2",
            step_number: 2,
            max_iterations: 5,
            context_variables: vars,
            history_text: "=== Step 1 ===\nThought:\nstart\n",
            tool_docs: "## toolbox `calculator`\ncalculator.calculate(expression: string)\n",
            conversation_history: "",
            allowed_modules: "math, json",
        }
    }

    #[test]
    fn codeact_prompt_has_all_inputs() {
        let mut vars = ContextVariables::new();
        vars.insert("total".into(), json!(4));
        let strategy = CodeActStrategy::new();
        let messages = strategy.messages(&input(&vars));
        assert_eq!(messages.len(), 2);

        let system = &messages[0].content;
        assert!(system.contains("calculator.calculate"));
        assert!(system.contains("math, json"));
        assert!(system.contains("<thought>"));

        let user = &messages[1].content;
        assert!(user.contains("Compute 2+2"));
        assert!(user.contains("step 2 of at most 5"));
        assert!(user.contains("total = 4"));
        assert!(user.contains("=== Step 1 ==="));
        assert!(!user.contains("Earlier conversation"));
    }

    #[test]
    fn persona_override_keeps_format() {
        let vars = ContextVariables::new();
        let strategy = CodeActStrategy::new().with_persona("You are terse.");
        let system = strategy.system_prompt(&input(&vars));
        assert!(system.starts_with("You are terse."));
        assert!(system.contains("## Response format"));
    }

    #[test]
    fn few_shot_examples_parse() {
        let vars = ContextVariables::new();
        let strategy = FewShotStrategy::default();
        let messages = strategy.messages(&input(&vars));
        assert_eq!(messages.len(), 2 + 2 * strategy.examples().len());
        for example in messages.iter().filter(|m| m.role == Role::Assistant) {
            assert!(parse_response(&example.content).is_ok());
        }
        assert!(messages.last().unwrap().content.contains("Compute 2+2"));
    }

    #[test]
    fn long_variables_are_shortened() {
        let mut vars = ContextVariables::new();
        vars.insert("text".into(), json!("x".repeat(500)));
        let rendered = render_variables(&vars);
        assert!(rendered.len() < 250);
        assert!(rendered.trim_end().ends_with("..."));
    }
}
