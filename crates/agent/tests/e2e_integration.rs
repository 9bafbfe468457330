//! End-to-end tests for the CodeAct agent.
//!
//! These run the full pipeline with a scripted language model: prompt
//! rendering, response parsing, sandboxed execution against real tools,
//! working memory and events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use codeact_agent::{
    Agent, AgentError, CANCELLED, OutcomeStatus, Reasoner, RetryPolicy, ScriptedProvider,
    standard_registry,
};
use codeact_config::AgentSettings;
use codeact_core::{
    AgentEvent, ErrorCategory, ExecutionStatus, ObserverError, TaskStatus, ToolDefinition,
    ToolRegistry, value_to_text,
};
use codeact_memory::WorkingMemory;
use codeact_runtime::{
    AutoApprove, ConfirmationHandler, ConfirmationRequest, Executor, FnConfirmation,
};
use codeact_tools::FnTool;
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────────────

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn reply(thought: &str, action: &str) -> String {
    ScriptedProvider::reply(thought, action)
}

fn agent_with(
    provider: &Arc<ScriptedProvider>,
    registry: Arc<ToolRegistry>,
    confirmation: Arc<dyn ConfirmationHandler>,
) -> Agent {
    init_tracing();
    let reasoner = Reasoner::new(provider.clone(), "test-model").with_retry(RetryPolicy::immediate(3));
    let executor = Executor::new(registry).with_confirmation(confirmation);
    Agent::new(reasoner, executor)
}

fn agent(provider: &Arc<ScriptedProvider>) -> Agent {
    let registry = standard_registry(&AgentSettings::default(), None).unwrap();
    agent_with(provider, registry, Arc::new(AutoApprove))
}

fn record_events(agent: &Agent) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    agent.events().add_observer(Arc::new(move |event: &AgentEvent| {
        sink.lock().unwrap().push(event.kind().to_string());
        Ok::<(), ObserverError>(())
    }));
    seen
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn calculator_task_completes_in_one_step() {
    let provider = Arc::new(ScriptedProvider::new([reply(
        "I will use the calculator tool to add the numbers.",
        "result = calculator.calculate(\"2 + 2\")\ncomplete(result)",
    )]));
    let mut agent = agent(&provider);

    let outcome = agent
        .solve("compute 2+2 using a calculator tool", 5)
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.steps.len(), 1);
    let step = &outcome.steps[0];
    assert_eq!(step.number, 1);
    assert!(step.thought.contains("calculator"));
    assert!(step.action.contains("calculator.calculate"));
    assert_eq!(value_to_text(&step.result.result), "4");
    assert_eq!(step.result.task_status, TaskStatus::Completed);
    assert_eq!(outcome.answer_text(), "4");

    // The prompt documented the tool and the import allow-list
    let system = &provider.requests()[0].messages[0].content;
    assert!(system.contains("calculator.calculate"));
    assert!(system.contains("math"));
}

#[tokio::test]
async fn iteration_limit_returns_partial_result() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("Start counting.", "count = 1\ncount"),
        reply("Keep counting.", "count = count + 1\ncount"),
        reply("Never reached.", "complete(count)"),
    ]));
    let mut agent = agent(&provider);

    let outcome = agent.solve("count forever", 2).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::IterationLimitReached);
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.answer, json!(2));
    assert!(outcome.reason.unwrap().contains("iteration limit"));
    assert_eq!(provider.remaining(), 1);
}

#[tokio::test]
async fn disallowed_import_is_recorded_and_fed_back() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("List files with os.", "import os\nos.listdir('.')"),
        reply("Use the calculator instead.", "complete(calculator.calculate('1 + 1'))"),
    ]));
    let mut agent = agent(&provider);
    let events = record_events(&agent);

    let outcome = agent.solve("do something", 5).await.unwrap();

    assert!(outcome.is_completed());
    let first = &outcome.steps[0];
    assert_eq!(first.result.execution_status, ExecutionStatus::Error);
    assert!(first.result.is_category(ErrorCategory::SecurityViolation));
    assert!(first.result.local_variables.is_empty());

    // The next prompt shows the violation to the model
    let second_prompt = &provider.requests()[1].messages[1].content;
    assert!(second_prompt.contains("security_violation"));

    assert!(events.lock().unwrap().contains(&"error_security".to_string()));
}

#[tokio::test]
async fn repeated_violations_abort_the_task() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("Try os.", "import os"),
        reply("Try subprocess.", "import subprocess"),
        reply("Try eval.", "eval('1')"),
        reply("Unreached.", "complete(1)"),
    ]));
    let mut agent = agent(&provider);

    let err = agent.solve("escape the sandbox", 10).await.unwrap_err();
    match &err {
        AgentError::SecurityViolation { violations, .. } => assert_eq!(*violations, 3),
        other => panic!("unexpected {other:?}"),
    }
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, OutcomeStatus::Aborted);
    assert_eq!(partial.steps.len(), 3);
}

#[tokio::test]
async fn configured_workspace_confines_file_tools() {
    let workspace = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("todo.txt"), "ship it").unwrap();
    let secret = outside.path().join("secret.txt");
    std::fs::write(&secret, "hunter2").unwrap();

    let provider = Arc::new(ScriptedProvider::new([
        reply("Read the secret.", &format!("files.read({:?})", secret.display().to_string())),
        reply("Read the local file instead.", "complete(files.read('todo.txt'))"),
    ]));
    let mut settings = AgentSettings::default();
    settings.security.workspace = Some(workspace.path().to_path_buf());
    let registry = standard_registry(&settings, None).unwrap();
    let mut agent = agent_with(&provider, registry, Arc::new(AutoApprove));

    let outcome = agent.solve("read the notes", 5).await.unwrap();
    let first = &outcome.steps[0].result;
    assert!(first.is_category(ErrorCategory::RuntimeError), "{:?}", first.error);
    assert!(first.error.as_deref().unwrap_or_default().contains("outside allowed roots"));
    assert!(!outcome.steps[0].result.output.contains("hunter2"));
    assert_eq!(outcome.answer, json!("ship it"));
}

#[tokio::test]
async fn step_numbers_are_contiguous_and_history_is_stable() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("One.", "a = 1"),
        reply("Two.", "b = a + 1\nprint(b)"),
        reply("Three.", "1 / 0"),
        reply("Four.", "complete(a + b)"),
    ]));
    let mut agent = agent(&provider);

    let outcome = agent.solve("numbers", 10).await.unwrap();
    let numbers: Vec<u32> = outcome.steps.iter().map(|s| s.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(outcome.answer, json!(3));

    let mut memory = WorkingMemory::new("system", "numbers");
    for step in outcome.steps {
        memory.add(step);
    }
    assert_eq!(memory.format_history(200), memory.format_history(200));
    assert_eq!(memory.format_history(100_000), memory.format_history(100_000));
}

#[tokio::test]
async fn variables_carry_between_steps() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("Store a value.", "greeting = 'hello'\nitems = [1, 2, 3]"),
        reply("Use it.", "greeting = greeting + ' world'\ntotal = sum(items)"),
        reply("Finish.", "complete({'greeting': greeting, 'total': total})"),
    ]));
    let mut agent = agent(&provider);

    let outcome = agent.solve("variables", 5).await.unwrap();
    assert_eq!(outcome.answer, json!({"greeting": "hello world", "total": 6}));
    assert_eq!(outcome.variables["items"], json!([1, 2, 3]));

    // Step 2's prompt lists what step 1 defined
    let prompt = &provider.requests()[1].messages[1].content;
    assert!(prompt.contains("greeting = \"hello\""));
}

#[tokio::test]
async fn confirmation_is_asked_only_for_flagged_tools() {
    let sensitive_calls = Arc::new(AtomicUsize::new(0));
    let counter = sensitive_calls.clone();
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(Arc::new(FnTool::sync(
            ToolDefinition::builder("delete")
                .toolbox("records")
                .confirmation("Delete all records?")
                .build(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("deleted"))
            },
        )))
        .unwrap();
    registry
        .register(Arc::new(FnTool::sync(
            ToolDefinition::builder("count").toolbox("records").build(),
            |_| Ok(json!(7)),
        )))
        .unwrap();

    let asked = Arc::new(Mutex::new(Vec::new()));
    let log = asked.clone();
    let deny = FnConfirmation::new(move |request: &ConfirmationRequest| {
        log.lock().unwrap().push(request.tool.clone());
        false
    });

    let provider = Arc::new(ScriptedProvider::new([
        reply("Count first.", "n = records.count()"),
        reply("Now delete.", "records.delete()"),
        reply("Denied, so report the count.", "complete(n)"),
    ]));
    let mut agent = agent_with(&provider, registry, Arc::new(deny));

    let outcome = agent.solve("clean up", 5).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.answer, json!(7));
    assert_eq!(sensitive_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*asked.lock().unwrap(), vec!["records.delete".to_string()]);
    assert!(outcome.steps[1].result.is_category(ErrorCategory::ConfirmationDenied));
}

#[tokio::test]
async fn tools_added_at_runtime_are_usable_next_step() {
    let provider = Arc::new(ScriptedProvider::new([
        reply(
            "Define a helper.",
            "agent.add_tool('square', 'return x * x', parameters=['x'], description='Square a number')",
        ),
        reply("Use it.", "complete(custom.square(9))"),
    ]));
    let mut agent = agent(&provider);

    let outcome = agent.solve("square 9", 5).await.unwrap();
    assert_eq!(outcome.answer, json!(81));

    let second_system = &provider.requests()[1].messages[0].content;
    assert!(second_system.contains("custom.square"));
}

#[tokio::test]
async fn reasoning_failure_surfaces_to_the_caller() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("Fine.", "x = 1"),
        "no structure".to_string(),
        "<thought>a</thought>".to_string(),
        "<action>x</action>".to_string(),
    ]));
    let mut agent = agent(&provider);
    let events = record_events(&agent);

    let err = agent.solve("anything", 5).await.unwrap_err();
    match &err {
        AgentError::ReasoningFailure { step, .. } => assert_eq!(*step, 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.partial().unwrap().steps.len(), 1);

    let kinds = events.lock().unwrap().clone();
    assert!(kinds.contains(&"error_reasoning".to_string()));
    assert_eq!(kinds.last().map(String::as_str), Some("task_aborted"));
}

#[tokio::test]
async fn lifecycle_events_in_order() {
    let provider = Arc::new(ScriptedProvider::new([reply(
        "Compute.",
        "complete(calculator.calculate('3 * 3'))",
    )]));
    let mut agent = agent(&provider);
    let events = record_events(&agent);

    agent.solve("3 * 3", 3).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "task_start",
            "step_start",
            "action_generated",
            "tool_execution_start",
            "tool_execution_end",
            "step_end",
            "task_complete",
        ]
    );
}

#[tokio::test]
async fn failing_observers_do_not_affect_the_task() {
    let provider = Arc::new(ScriptedProvider::new([reply("Done.", "complete(1)")]));
    let mut agent = agent(&provider);
    agent
        .events()
        .add_observer(Arc::new(|_: &AgentEvent| Err(ObserverError("broken".into()))));
    agent
        .events()
        .add_observer(Arc::new(|_: &AgentEvent| -> Result<(), ObserverError> {
            panic!("observer bug")
        }));

    let outcome = agent.solve("one", 2).await.unwrap();
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn cancelled_task_keeps_no_partial_step() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("First.", "a = 1"),
        reply("Spin.", "while True:\n    a += 1"),
    ]));
    let mut agent = agent(&provider);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let mut rx = agent.events().subscribe();
    tokio::spawn(async move {
        // Cancel once the second step has started
        while let Ok(event) = rx.recv().await {
            if let AgentEvent::ActionGenerated { step: 2, .. } = event.as_ref() {
                trigger.cancel();
                break;
            }
        }
    });

    let outcome = agent
        .solve_with_cancel("spin", 5, cancel)
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Aborted);
    assert_eq!(outcome.reason.as_deref(), Some(CANCELLED));
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.variables["a"], json!(1));
}

#[tokio::test]
async fn tasks_share_the_conversation_but_not_variables() {
    let provider = Arc::new(ScriptedProvider::new([
        reply("Remember.", "secret = 42\ncomplete('stored')"),
        reply("Look for it.", "complete(len(keys({'a': 1})))"),
    ]));
    let mut agent = agent(&provider);

    let first = agent.solve("store a secret", 3).await.unwrap();
    assert!(first.variables.contains_key("secret"));

    let second = agent.solve("recall", 3).await.unwrap();
    assert!(!second.variables.contains_key("secret"));

    // The second task's prompt includes the first exchange but no variables
    let prompt = &provider.requests()[1].messages[1].content;
    assert!(prompt.contains("store a secret"));
    assert!(!prompt.contains("secret = 42"));
    assert_eq!(agent.conversation().len(), 4);
}

#[tokio::test]
async fn chat_does_not_run_actions() {
    let provider = Arc::new(ScriptedProvider::new(["Hello! How can I help?"]));
    let mut agent = agent(&provider);
    let events = record_events(&agent);

    let reply = agent.chat("hi").await.unwrap();
    assert_eq!(reply, "Hello! How can I help?");
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(agent.conversation().len(), 2);
}
