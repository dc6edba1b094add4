//! Prompt library: built-in templates plus workspace overrides.

use crate::builder::{new_registry, register, render_registered};
use crate::types::{PromptTemplate, RenderedPrompt};
use handlebars::Handlebars;
use modrag_core::{AppError, AppResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_PROMPTS: &str = include_str!("../templates/builtin.yml");

/// Directory (relative to the workspace) holding prompt overrides.
pub const PROMPTS_DIR: &str = ".modrag/prompts";

/// A set of validated prompt templates keyed by id.
pub struct PromptLibrary {
    prompts: BTreeMap<String, PromptTemplate>,
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for PromptLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLibrary")
            .field("prompts", &self.prompts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PromptLibrary {
    /// An empty library.
    pub fn empty() -> Self {
        Self {
            prompts: BTreeMap::new(),
            registry: new_registry(),
        }
    }

    /// The library compiled into the binary.
    pub fn builtin() -> AppResult<Self> {
        let templates: Vec<PromptTemplate> = serde_yaml::from_str(BUILTIN_PROMPTS)
            .map_err(|e| AppError::Prompt(format!("Failed to parse built-in prompts: {}", e)))?;

        let mut library = Self::empty();
        for template in templates {
            library.insert(template)?;
        }

        Ok(library)
    }

    /// Built-in prompts overlaid with `<workspace>/.modrag/prompts/*.yml`.
    ///
    /// # Example
    /// ```no_run
    /// use modrag_prompt::PromptLibrary;
    /// use serde_json::json;
    /// use std::path::Path;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let library = PromptLibrary::load(Path::new("."))?;
    /// let prompt = library.render("pre.query_rewrite", &json!({"query": "AI?"}))?;
    /// println!("{}", prompt.user);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(workspace_path: &Path) -> AppResult<Self> {
        let mut library = Self::builtin()?;

        let prompts_dir = workspace_path.join(PROMPTS_DIR);
        if !prompts_dir.exists() {
            return Ok(library);
        }

        for entry in walkdir::WalkDir::new(&prompts_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("yml") | Some("yaml")
            );
            if !path.is_file() || !is_yaml {
                continue;
            }

            let template = load_prompt_file(path)?;
            let overridden = library.prompts.contains_key(&template.id);
            tracing::info!(
                id = %template.id,
                overridden,
                "Loaded workspace prompt from {:?}",
                path
            );
            library.insert(template)?;
        }

        Ok(library)
    }

    /// Add or replace a template after validating it.
    pub fn insert(&mut self, template: PromptTemplate) -> AppResult<()> {
        validate_prompt(&template)?;
        register(&mut self.registry, &template)?;
        if template.system.is_none() {
            // A replaced template may have carried a system message
            self.registry
                .unregister_template(&crate::builder::system_key(&template.id));
        }
        self.prompts.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.prompts.get(id)
    }

    /// All prompt ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.prompts.keys().cloned().collect()
    }

    pub fn templates(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.prompts.values()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Render a prompt by id.
    pub fn render(&self, id: &str, variables: &Value) -> AppResult<RenderedPrompt> {
        let template = self
            .prompts
            .get(id)
            .ok_or_else(|| AppError::Prompt(format!("Prompt not found: {}", id)))?;

        render_registered(&self.registry, template, variables)
    }
}

/// Load one prompt template from a YAML file.
pub fn load_prompt_file(path: &Path) -> AppResult<PromptTemplate> {
    tracing::debug!("Loading prompt from: {:?}", path);

    let contents = std::fs::read_to_string(path).map_err(|e| {
        AppError::Prompt(format!("Failed to read prompt file {:?}: {}", path, e))
    })?;

    let template: PromptTemplate = serde_yaml::from_str(&contents).map_err(|e| {
        AppError::Prompt(format!("Failed to parse prompt YAML {:?}: {}", path, e))
    })?;

    validate_prompt(&template)?;

    Ok(template)
}

/// Validate a prompt template.
fn validate_prompt(def: &PromptTemplate) -> AppResult<()> {
    if def.id.trim().is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.trim().is_empty() {
        return Err(AppError::Prompt(format!(
            "Prompt title cannot be empty ({})",
            def.id
        )));
    }

    if def.template.trim().is_empty() {
        return Err(AppError::Prompt(format!(
            "Prompt template cannot be empty ({})",
            def.id
        )));
    }

    // Validate API version format (simple check)
    let mut parts = def.api_version.split('.');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(major), Some(minor), None)
            if !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
    );
    if !well_formed {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_prompt(dir: &Path, file: &str, content: &str) {
        let prompts_dir = dir.join(PROMPTS_DIR);
        fs::create_dir_all(&prompts_dir).unwrap();
        fs::write(prompts_dir.join(file), content).unwrap();
    }

    #[test]
    fn test_builtin_library_parses() {
        let library = PromptLibrary::builtin().unwrap();
        for id in [
            "pre.multi_query",
            "pre.sub_query",
            "pre.query_rewrite",
            "pre.hyde",
            "pre.step_back",
            "pre.cot_rewrite",
            "pre.text_to_sql",
            "pre.text_to_cypher",
            "pre.metadata_filter",
            "post.llm_rerank",
            "post.summary_compression",
            "post.relevance_filter",
            "post.contradiction_filter",
            "gen.template",
            "gen.no_context",
            "gen.contextual",
            "gen.cot",
            "gen.few_shot",
            "gen.instruct",
            "verify.fact_check",
            "verify.consistency",
            "answer.citation",
            "answer.refine",
            "answer.summary",
            "answer.structured",
        ] {
            assert!(library.get(id).is_some(), "missing built-in prompt {}", id);
        }
    }

    #[test]
    fn test_render_builtin() {
        let library = PromptLibrary::builtin().unwrap();
        let prompt = library
            .render("pre.multi_query", &json!({"query": "What is RAG?", "num_queries": 3}))
            .unwrap();

        assert!(prompt.user.contains("What is RAG?"));
        assert!(prompt.system.unwrap().contains("3"));
    }

    #[test]
    fn test_contextual_system_follows_quality() {
        let library = PromptLibrary::builtin().unwrap();
        let high = library
            .render("gen.contextual", &json!({"quality": "high", "context": "c", "query": "q"}))
            .unwrap();
        let low = library
            .render("gen.contextual", &json!({"quality": "low", "context": "c", "query": "q"}))
            .unwrap();
        assert_ne!(high.system, low.system);
    }

    #[test]
    fn test_workspace_override_replaces_builtin() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(
            temp_dir.path(),
            "rewrite.yml",
            r#"
id: pre.query_rewrite
title: "Terse rewrite"
apiVersion: "1.1"
template: "Rewrite tersely: {{query}}"
"#,
        );

        let library = PromptLibrary::load(temp_dir.path()).unwrap();
        let prompt = library
            .render("pre.query_rewrite", &json!({"query": "AI?"}))
            .unwrap();

        assert_eq!(prompt.user, "Rewrite tersely: AI?");
        assert!(prompt.system.is_none());
    }

    #[test]
    fn test_load_without_prompts_dir() {
        let temp_dir = TempDir::new().unwrap();
        let library = PromptLibrary::load(temp_dir.path()).unwrap();
        assert_eq!(library.len(), PromptLibrary::builtin().unwrap().len());
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "broken.yml", "invalid: yaml: content:");
        assert!(PromptLibrary::load(temp_dir.path()).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let mut library = PromptLibrary::empty();
        let mut template = PromptTemplate {
            id: "custom".to_string(),
            title: "Custom".to_string(),
            api_version: "1".to_string(),
            system: None,
            template: "{{query}}".to_string(),
        };
        assert!(library.insert(template.clone()).is_err());

        template.api_version = "1.0".to_string();
        library.insert(template.clone()).unwrap();

        template.template = "   ".to_string();
        assert!(library.insert(template).is_err());
    }

    #[test]
    fn test_unknown_prompt() {
        let library = PromptLibrary::empty();
        let err = library.render("nope", &json!({})).unwrap_err();
        assert!(err.to_string().contains("Prompt not found"));
    }
}
