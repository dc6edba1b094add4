//! Prompt rendering with Handlebars.

use crate::types::{PromptTemplate, RenderedPrompt};
use handlebars::Handlebars;
use modrag_core::{AppError, AppResult};
use serde_json::Value;

/// Create a registry configured for plain-text prompts.
pub(crate) fn new_registry() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
}

pub(crate) fn user_key(id: &str) -> String {
    format!("{}#user", id)
}

pub(crate) fn system_key(id: &str) -> String {
    format!("{}#system", id)
}

/// Register both parts of a template so syntax errors surface at load time.
pub(crate) fn register(registry: &mut Handlebars<'static>, prompt: &PromptTemplate) -> AppResult<()> {
    registry
        .register_template_string(&user_key(&prompt.id), &prompt.template)
        .map_err(|e| {
            AppError::Prompt(format!("Failed to register template {}: {}", prompt.id, e))
        })?;

    if let Some(ref system) = prompt.system {
        registry
            .register_template_string(&system_key(&prompt.id), system)
            .map_err(|e| {
                AppError::Prompt(format!(
                    "Failed to register system template {}: {}",
                    prompt.id, e
                ))
            })?;
    }

    Ok(())
}

/// Render a registered template with JSON variables.
pub(crate) fn render_registered(
    registry: &Handlebars<'static>,
    prompt: &PromptTemplate,
    variables: &Value,
) -> AppResult<RenderedPrompt> {
    tracing::debug!("Rendering prompt: {}", prompt.id);

    let user = registry
        .render(&user_key(&prompt.id), variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render {}: {}", prompt.id, e)))?;

    let system = match prompt.system {
        Some(_) => Some(
            registry
                .render(&system_key(&prompt.id), variables)
                .map_err(|e| {
                    AppError::Prompt(format!("Failed to render system for {}: {}", prompt.id, e))
                })?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    Ok(RenderedPrompt::new(
        prompt.id.clone(),
        system,
        user.trim().to_string(),
    ))
}

/// Render an ad-hoc Handlebars template with variables.
///
/// Used for user-supplied templates that are not part of the library.
///
/// # Example
/// ```
/// use modrag_prompt::render_template;
/// use serde_json::json;
///
/// let text = render_template("Question: {{query}}", &json!({"query": "What is RAG?"})).unwrap();
/// assert_eq!(text, "Question: What is RAG?");
/// ```
pub fn render_template(template: &str, variables: &Value) -> AppResult<String> {
    let handlebars = new_registry();

    handlebars
        .render_template(template, variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(system: Option<&str>, body: &str) -> PromptTemplate {
        PromptTemplate {
            id: "test.prompt".to_string(),
            title: "Test".to_string(),
            api_version: "1.0".to_string(),
            system: system.map(str::to_string),
            template: body.to_string(),
        }
    }

    #[test]
    fn test_render_simple_template() {
        let result = render_template("Question: {{query}}", &json!({"query": "Hello, world!"}));
        assert_eq!(result.unwrap(), "Question: Hello, world!");
    }

    #[test]
    fn test_no_html_escaping() {
        let result = render_template("{{text}}", &json!({"text": "a < b && \"c\""}));
        assert_eq!(result.unwrap(), "a < b && \"c\"");
    }

    #[test]
    fn test_render_template_missing_variable() {
        // Handlebars renders missing variables as empty string
        let result = render_template("Question: {{missing}}", &json!({}));
        assert_eq!(result.unwrap(), "Question: ");
    }

    #[test]
    fn test_render_registered_with_system() {
        let mut registry = new_registry();
        let prompt = template(
            Some("{{#if (eq quality \"high\")}}Use only the context.{{else}}Use judgement.{{/if}}"),
            "Context:\n{{context}}\n\nQuestion: {{query}}\n",
        );
        register(&mut registry, &prompt).unwrap();

        let rendered = render_registered(
            &registry,
            &prompt,
            &json!({"quality": "high", "context": "RAG docs", "query": "What is RAG?"}),
        )
        .unwrap();

        assert_eq!(rendered.system.as_deref(), Some("Use only the context."));
        assert_eq!(rendered.user, "Context:\nRAG docs\n\nQuestion: What is RAG?");
    }

    #[test]
    fn test_register_rejects_broken_syntax() {
        let mut registry = new_registry();
        let prompt = template(None, "{{#if query}}unterminated");
        assert!(register(&mut registry, &prompt).is_err());
    }
}
