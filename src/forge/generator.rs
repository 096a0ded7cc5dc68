//! Tool generator
//!
//! Turns a capability request into a [`ToolProposal`] with one inference
//! call. The model returns a JSON function specification; the callable's
//! framing (decorator, signature, doc comment) is always produced here, the
//! model only supplies the body.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::script::{BUILTINS, DECORATOR, KEYWORDS};
use super::types::{ParamSpec, ParamType, ToolProposal};
use crate::error::{GateError, Result};
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::Message;
use crate::tools::RiskTier;
use crate::utils::string::preview;

static SNAKE_CASE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").ok());

static JSON_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok());

const GENERATOR_INSTRUCTIONS: &str = r#"You write small tools for an autonomous agent.
Tool bodies use a restricted script language:
- statements: `let x = expr;`, `x = expr;`, `if cond { } else if cond { } else { }`,
  `for item in list { }`, `while cond { }`, `return expr;`
- values: integers, floats, "strings", true/false, null, [lists], {"maps": 1}
- operators: + - * / % == != < <= > >= && || !  and indexing with [ ]
- comments start with #
- there is NO file, network or process access
The only callable functions are: {builtins}

Reply with ONLY a JSON object:
{
  "function_name": "snake_case_name",
  "description": "one line description",
  "parameters": [{"name": "x", "type": "str|int|float|bool|list|dict", "description": "..."}],
  "function_body": "statements only, no signature",
  "risk_tier": "SAFE or CRITICAL",
  "reasoning": "why this tool is needed"
}
The body must end with a return statement producing the tool's text result."#;

#[derive(Debug, Deserialize)]
struct FunctionSpec {
    function_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<RawParam>,
    function_body: String,
    #[serde(default)]
    risk_tier: String,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    description: String,
}

/// Generates tool proposals through the inference gateway.
pub struct ToolGenerator {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
    context_messages: usize,
    truncate_chars: usize,
}

impl ToolGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: None,
            context_messages: 8,
            truncate_chars: 200,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// How many trailing history messages (and how many chars of each) go into the prompt.
    pub fn with_context(mut self, messages: usize, truncate_chars: usize) -> Self {
        self.context_messages = messages;
        self.truncate_chars = truncate_chars;
        self
    }

    /// Generate a proposal for `capability` given the conversation so far.
    ///
    /// # Errors
    ///
    /// Gateway failures are returned as-is. A reply that is not a usable
    /// specification yields [`GateError::Validation`].
    pub async fn generate(&self, capability: &str, history: &[Message]) -> Result<ToolProposal> {
        let start = history.len().saturating_sub(self.context_messages);
        let context: Vec<String> = history[start..]
            .iter()
            .filter(|m| !matches!(m, Message::System { .. }))
            .map(|m| format!("[{}] {}", m.kind(), preview(m.content(), self.truncate_chars)))
            .collect();

        let messages = vec![
            Message::system(&GENERATOR_INSTRUCTIONS.replace("{builtins}", &BUILTINS.join(", "))),
            Message::user(&format!(
                "Capability needed: {}\n\nRecent conversation:\n{}",
                capability,
                context.join("\n")
            )),
        ];

        debug!(capability = %capability, context_len = context.len(), "Generating tool");
        let response = self
            .provider
            .chat(messages, vec![], self.model.as_deref(), ChatOptions::new())
            .await?;

        let proposal = parse_proposal(&response.content)?;
        info!(
            tool = %proposal.name,
            tier = %proposal.risk_tier,
            "Tool proposal generated"
        );
        Ok(proposal)
    }
}

/// Pull the JSON object out of a model reply.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = JSON_FENCE.as_ref().and_then(|re| re.captures(text)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model reply into a proposal.
pub fn parse_proposal(reply: &str) -> Result<ToolProposal> {
    let json = extract_json(reply).ok_or_else(|| {
        GateError::Validation("tool specification is not a JSON object".to_string())
    })?;
    let spec: FunctionSpec = serde_json::from_str(json)
        .map_err(|e| GateError::Validation(format!("malformed tool specification: {}", e)))?;

    let name = spec.function_name.trim().to_string();
    if !is_identifier(&name) {
        return Err(GateError::Validation(format!(
            "function_name `{}` is not a snake_case identifier",
            name
        )));
    }

    let mut parameters: Vec<ParamSpec> = Vec::with_capacity(spec.parameters.len());
    for raw in &spec.parameters {
        let param_name = raw.name.trim();
        if !is_identifier(param_name) {
            return Err(GateError::Validation(format!(
                "parameter name `{}` is not a snake_case identifier",
                raw.name
            )));
        }
        if parameters.iter().any(|p| p.name == param_name) {
            return Err(GateError::Validation(format!(
                "parameter `{}` is declared twice",
                param_name
            )));
        }
        let ty = ParamType::parse(&raw.ty).ok_or_else(|| {
            GateError::Validation(format!(
                "parameter `{}` has unsupported type `{}`",
                raw.name, raw.ty
            ))
        })?;
        parameters.push(ParamSpec::new(param_name, ty, raw.description.trim()));
    }

    // Unknown or missing tiers fall back to CRITICAL.
    let risk_tier = RiskTier::parse(&spec.risk_tier).unwrap_or(RiskTier::Critical);
    let description = if spec.description.trim().is_empty() {
        format!("Generated tool {}", name)
    } else {
        spec.description.trim().to_string()
    };

    let source = wrap_source(&name, &description, &parameters, &spec.function_body);
    let example_invocation = example_invocation(&parameters);

    Ok(ToolProposal {
        name,
        description,
        parameters,
        source,
        risk_tier,
        rationale: spec.reasoning.trim().to_string(),
        example_invocation,
    })
}

fn is_identifier(name: &str) -> bool {
    SNAKE_CASE
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
        && !KEYWORDS.contains(&name)
}

/// Deterministic example arguments for a parameter list.
pub fn example_invocation(params: &[ParamSpec]) -> Value {
    let mut args = serde_json::Map::new();
    for p in params {
        args.insert(p.name.clone(), p.ty.example_value(&p.name));
    }
    Value::Object(args)
}

fn dedent(body: &str) -> Vec<&str> {
    let lines: Vec<&str> = body.trim_matches('\n').lines().collect();
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .into_iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect()
}

/// Append `text` as comment lines; every line break, including a bare `\r`,
/// starts a new commented line.
fn push_comment(out: &mut String, first: &str, rest: &str, text: &str) {
    for (i, line) in text.split(['\n', '\r']).filter(|l| !l.trim().is_empty()).enumerate() {
        out.push_str(if i == 0 { first } else { rest });
        out.push_str(line.trim());
        out.push('\n');
    }
    if text.trim().is_empty() {
        out.push_str(first.trim_end());
        out.push('\n');
    }
}

/// Frame a model-supplied body into complete tool source.
pub fn wrap_source(name: &str, description: &str, params: &[ParamSpec], body: &str) -> String {
    let signature: Vec<String> = params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect();

    let mut out = String::new();
    out.push_str(DECORATOR);
    out.push('\n');
    out.push_str(&format!("fn {}({}) -> str {{\n", name, signature.join(", ")));
    if !description.trim().is_empty() {
        push_comment(&mut out, "    # ", "    # ", description);
    }
    if !params.is_empty() {
        out.push_str("    #\n    # Args:\n");
        for p in params {
            let first = format!("    #     {}: ", p.name);
            push_comment(&mut out, &first, "    #       ", &p.description);
        }
    }
    for line in dedent(body) {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("    {}\n", line.trim_end()));
        }
    }
    out.push_str("}\n");
    out
}
