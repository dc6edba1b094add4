//! Prompt construction from the query and the retrieved context.

use crate::llm::StageLlm;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{char_len, take_chars};
use modrag_knowledge::Document;
use modrag_prompt::{render_template, RenderedPrompt};
use serde_json::{json, Value};

pub const NO_CONTEXT: &str = "No relevant context is available.";

const DEFAULT_REASONING_STEPS: &[&str] = &[
    "Understand the question",
    "Analyse the context",
    "Reason step by step",
    "Draw a conclusion",
];

/// `[Document i]` blocks separated by blank lines.
pub fn format_context(context: &[Document], include_sources: bool) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, document)| {
            let source = match (include_sources, document.source()) {
                (true, Some(source)) => format!(" (source: {})", source),
                _ => String::new(),
            };
            format!("[Document {}]{}\n{}", i + 1, source, document.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds the prompt sent to the generator.
pub trait PromptBuilder: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt>;
}

/// Context question answering with the built-in or a custom template.
pub struct TemplatePrompt {
    llm: StageLlm,
    template: Option<String>,
    include_sources: bool,
}

impl TemplatePrompt {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            template: params.opt_str("template"),
            include_sources: params.bool_or("include_sources", false),
        }
    }
}

impl PromptBuilder for TemplatePrompt {
    fn name(&self) -> &str {
        "template"
    }

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt> {
        let context_text = if context.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            format_context(context, self.include_sources)
        };
        let variables = json!({"query": query, "context": context_text});

        match self.template {
            Some(ref template) => Ok(RenderedPrompt::new(
                "custom",
                None,
                render_template(template, &variables)?,
            )),
            None => self.llm.render("gen.template", &variables),
        }
    }
}

/// Adjusts the system message to how much usable context there is.
pub struct ContextualPrompt {
    llm: StageLlm,
    max_context_length: usize,
}

impl ContextualPrompt {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            max_context_length: params.usize_or("max_context_length", 3000),
        }
    }

    /// "high", "medium" or "low".
    pub fn context_quality(context: &[Document]) -> &'static str {
        if context.len() >= 3 {
            let mean = context.iter().map(Document::char_len).sum::<usize>() / context.len();
            if mean > 200 {
                "high"
            } else if mean > 100 {
                "medium"
            } else {
                "low"
            }
        } else if !context.is_empty() {
            "medium"
        } else {
            "low"
        }
    }

    /// Whole documents while they fit; then a partial one when more than
    /// 100 chars of budget remain.
    pub fn assemble(&self, context: &[Document]) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut used = 0;

        for (i, document) in context.iter().enumerate() {
            let block = format!("[Document {}]\n{}", i + 1, document.content);
            let block_len = char_len(&block);
            if used + block_len <= self.max_context_length {
                used += block_len;
                parts.push(block);
                continue;
            }

            let remaining = self.max_context_length.saturating_sub(used);
            if remaining > 100 {
                parts.push(format!("{}...", take_chars(&block, remaining)));
            }
            break;
        }

        parts.join("\n\n")
    }
}

impl PromptBuilder for ContextualPrompt {
    fn name(&self) -> &str {
        "contextual"
    }

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt> {
        if context.is_empty() {
            return self.llm.render("gen.no_context", &json!({"query": query}));
        }

        self.llm.render(
            "gen.contextual",
            &json!({
                "query": query,
                "context": self.assemble(context),
                "quality": Self::context_quality(context),
            }),
        )
    }
}

/// Asks the model to reason through numbered steps.
pub struct ChainOfThoughtPrompt {
    llm: StageLlm,
    steps: Vec<String>,
}

impl ChainOfThoughtPrompt {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        let steps = params
            .str_list("reasoning_steps")
            .filter(|steps| !steps.is_empty())
            .unwrap_or_else(|| DEFAULT_REASONING_STEPS.iter().map(|s| s.to_string()).collect());
        Self { llm, steps }
    }
}

impl PromptBuilder for ChainOfThoughtPrompt {
    fn name(&self) -> &str {
        "cot"
    }

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n");
        self.llm.render(
            "gen.cot",
            &json!({"query": query, "context": format_context(context, false), "steps": steps}),
        )
    }
}

/// Prepends worked question/answer examples.
pub struct FewShotPrompt {
    llm: StageLlm,
    examples: Vec<(String, String)>,
    max_examples: usize,
}

impl FewShotPrompt {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        let mut examples: Vec<(String, String)> = match params.get("examples") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    Some((
                        item.get("question")?.as_str()?.to_string(),
                        item.get("answer")?.as_str()?.to_string(),
                    ))
                })
                .collect(),
            _ => Vec::new(),
        };
        if examples.is_empty() {
            examples.push((
                "What is machine learning?".to_string(),
                "Machine learning is a branch of artificial intelligence in which systems learn patterns from data instead of following explicitly programmed rules.".to_string(),
            ));
        }

        Self {
            llm,
            examples,
            max_examples: params.usize_or("max_examples", 2),
        }
    }
}

impl PromptBuilder for FewShotPrompt {
    fn name(&self) -> &str {
        "few_shot"
    }

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt> {
        let examples = self
            .examples
            .iter()
            .take(self.max_examples)
            .enumerate()
            .map(|(i, (question, answer))| {
                format!("Example {}:\nQuestion: {}\nAnswer: {}", i + 1, question, answer)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        self.llm.render(
            "gen.few_shot",
            &json!({"query": query, "context": format_context(context, false), "examples": examples}),
        )
    }
}

/// Explicit instructions, constraints and output format.
pub struct InstructPrompt {
    llm: StageLlm,
    instructions: String,
    constraints: Vec<String>,
    output_format: String,
}

impl InstructPrompt {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            instructions: params.str_or("instructions", ""),
            constraints: params.str_list("constraints").unwrap_or_default(),
            output_format: params.str_or("output_format", ""),
        }
    }
}

impl PromptBuilder for InstructPrompt {
    fn name(&self) -> &str {
        "instruct"
    }

    fn build(&self, query: &str, context: &[Document]) -> AppResult<RenderedPrompt> {
        let constraints = self
            .constraints
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");
        self.llm.render(
            "gen.instruct",
            &json!({
                "query": query,
                "context": format_context(context, false),
                "instructions": self.instructions,
                "constraints": constraints,
                "output_format": self.output_format,
            }),
        )
    }
}

pub const DEFAULT_PROMPT_STRATEGY: &str = "template";

pub fn create_prompt_builder(strategy: &str, params: &Params, llm: &StageLlm) -> Box<dyn PromptBuilder> {
    let llm = llm.clone();
    match strategy {
        "template" => Box::new(TemplatePrompt::new(llm, params)),
        "contextual" => Box::new(ContextualPrompt::new(llm, params)),
        "cot" | "chain_of_thought" => Box::new(ChainOfThoughtPrompt::new(llm, params)),
        "few_shot" => Box::new(FewShotPrompt::new(llm, params)),
        "instruct" => Box::new(InstructPrompt::new(llm, params)),
        other => {
            tracing::warn!(
                "Unknown prompt strategy '{}', using {}",
                other,
                DEFAULT_PROMPT_STRATEGY
            );
            Box::new(TemplatePrompt::new(llm, params))
        }
    }
}
