//! Closure-backed tools.
//!
//! Lets a host expose a plain Rust function to action code without writing
//! a `Tool` impl: declare the schema with the builder, pass a closure.

use async_trait::async_trait;
use codeact_core::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type Handler = dyn Fn(serde_json::Value, Option<ToolContext>) -> BoxFuture<'static, Result<ToolResult, ToolError>>
    + Send
    + Sync;

/// A tool whose body is a closure.
pub struct FnTool {
    definition: ToolDefinition,
    handler: Arc<Handler>,
}

impl FnTool {
    /// An async tool. The closure receives the bound arguments as a JSON
    /// object and, when the definition asks for it, the context variables.
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(serde_json::Value, Option<ToolContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            definition,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// A synchronous tool returning a plain value.
    pub fn sync<F>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, ToolError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(definition, move |args, _ctx| {
            let handler = handler.clone();
            async move {
                let value = handler(&args)?;
                let text = codeact_core::value_to_text(&value);
                Ok(ToolResult::with_data(text, value))
            }
        })
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.qualified_name())
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: Option<&ToolContext>,
    ) -> Result<ToolResult, ToolError> {
        (self.handler)(arguments, context.cloned()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::{ArgType, ToolArgument};
    use serde_json::json;

    fn greet_definition() -> ToolDefinition {
        ToolDefinition::builder("greet")
            .toolbox("demo")
            .argument(ToolArgument::required("name", ArgType::String, ""))
            .returns("string")
            .build()
    }

    #[tokio::test]
    async fn sync_closure_tool() {
        let tool = FnTool::sync(greet_definition(), |args| {
            Ok(json!(format!("hello {}", args["name"].as_str().unwrap_or("?"))))
        });
        let result = tool.execute(json!({"name": "ada"}), None).await.unwrap();
        assert_eq!(result.into_value(), json!("hello ada"));
        assert_eq!(tool.definition().qualified_name(), "demo.greet");
    }

    #[tokio::test]
    async fn async_closure_sees_context() {
        let def = ToolDefinition::builder("whoami")
            .toolbox("demo")
            .inject_context(true)
            .build();
        let tool = FnTool::new(def, |_args, ctx| async move {
            let user = ctx
                .and_then(|c| c.variables.get("user").cloned())
                .unwrap_or(json!(null));
            Ok(ToolResult::with_data("", user))
        });

        let mut ctx = ToolContext::default();
        ctx.variables.insert("user".into(), json!("grace"));
        let result = tool.execute(json!({}), Some(&ctx)).await.unwrap();
        assert_eq!(result.into_value(), json!("grace"));
    }

    #[tokio::test]
    async fn errors_propagate() {
        let tool = FnTool::sync(greet_definition(), |_| {
            Err(ToolError::InvalidArguments("bad".into()))
        });
        assert!(tool.execute(json!({"name": "x"}), None).await.is_err());
    }
}
