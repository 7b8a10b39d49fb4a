use crate::error::{GraderError, Result};
use crate::models::{CodeAnalysis, EvaluationResult};
use crate::providers::{LlmProvider, Provider};
use crate::rubric::RubricWeights;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const GRADER_SYSTEM_PROMPT: &str =
    "You are a strict but fair teaching assistant grading student answers against a reference answer.";

pub const CODE_REVIEW_SYSTEM_PROMPT: &str =
    "You are an experienced code reviewer. Be specific and concise.";

/// Build the grading prompt for one answer pair
pub fn grading_prompt(
    standard_answer: &str,
    student_answer: &str,
    rubric: &RubricWeights,
) -> String {
    let dimensions: Vec<String> = rubric
        .dimensions()
        .map(|d| format!("\"{d}\": <0-100>"))
        .collect();
    let dimension_list = rubric
        .dimensions()
        .map(|d| format!("{d} (weight {})", rubric.weight(d).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Evaluate the quality of the student's answer.

Standard answer:
{standard_answer}

Student answer:
{student_answer}

Score each of these dimensions from 0 to 100: {dimension_list}.
Then give an overall score (0-100), detailed comments and suggestions for improvement.

Respond with a single fenced JSON block and nothing else:
```json
{{
  "score": <0-100>,
  "dimensions": {{ {} }},
  "comments": "<detailed comments>",
  "suggestions": "<suggestions for improvement>"
}}
```"#,
        dimensions.join(", ")
    )
}

/// Build the code review prompt
pub fn code_review_prompt(code: &str) -> String {
    format!(
        r#"Analyze the following code:

{code}

Provide:
1. An assessment of the code quality
2. Potential issues
3. Suggestions for improvement

Respond with a single fenced JSON block and nothing else:
```json
{{
  "quality": "<quality assessment>",
  "issues": ["<issue>", "..."],
  "suggestions": ["<suggestion>", "..."]
}}
```"#
    )
}

/// Turn a grading reply into an `EvaluationResult`.
///
/// Accepts a fenced (or embedded) JSON object, then `SCORE:` / `COMMENTS:` /
/// `SUGGESTIONS:` labelled lines. Anything else becomes comments with no score.
pub fn parse_evaluation(response: &str) -> Result<EvaluationResult> {
    ensure_not_empty(response)?;

    if let Some(object) = structured_payload(response, &["score", "dimensions", "comments", "suggestions"])? {
        return Ok(evaluation_from_json(&object, response));
    }

    let sections = labelled_sections(response, &["SCORE", "COMMENTS", "SUGGESTIONS"]);
    if !sections.is_empty() {
        let score = sections
            .get("SCORE")
            .and_then(|s| leading_number(s))
            .map(clamp_score);
        return Ok(EvaluationResult {
            score,
            dimension_scores: BTreeMap::new(),
            comments: sections.get("COMMENTS").cloned().unwrap_or_default(),
            suggestions: sections.get("SUGGESTIONS").cloned().unwrap_or_default(),
            raw_response: response.to_string(),
        });
    }

    warn!("grading reply has no structured block, keeping it as comments");
    Ok(EvaluationResult {
        score: None,
        dimension_scores: BTreeMap::new(),
        comments: response.trim().to_string(),
        suggestions: String::new(),
        raw_response: response.to_string(),
    })
}

/// Turn a code review reply into a `CodeAnalysis`
pub fn parse_code_analysis(response: &str) -> Result<CodeAnalysis> {
    ensure_not_empty(response)?;

    if let Some(object) = structured_payload(response, &["quality", "issues", "suggestions"])? {
        return Ok(CodeAnalysis {
            quality: text_field(&object, "quality"),
            issues: text_field(&object, "issues"),
            suggestions: text_field(&object, "suggestions"),
            raw_response: response.to_string(),
        });
    }

    let sections = labelled_sections(response, &["QUALITY", "ISSUES", "SUGGESTIONS"]);
    if !sections.is_empty() {
        return Ok(CodeAnalysis {
            quality: sections.get("QUALITY").cloned().unwrap_or_default(),
            issues: sections.get("ISSUES").cloned().unwrap_or_default(),
            suggestions: sections.get("SUGGESTIONS").cloned().unwrap_or_default(),
            raw_response: response.to_string(),
        });
    }

    warn!("code review reply has no structured block, keeping it as suggestions");
    Ok(CodeAnalysis {
        quality: String::new(),
        issues: String::new(),
        suggestions: response.trim().to_string(),
        raw_response: response.to_string(),
    })
}

fn ensure_not_empty(response: &str) -> Result<()> {
    if response.trim().is_empty() {
        return Err(GraderError::ResponseParse(
            "model returned an empty reply".to_string(),
        ));
    }
    Ok(())
}

/// Locate a JSON object carrying at least one of `keys`.
///
/// A fence tagged `json` must hold a valid JSON object. Untagged fences are
/// used only when they parse; otherwise the search moves on.
fn structured_payload(response: &str, keys: &[&str]) -> Result<Option<Map<String, Value>>> {
    let parsed = match fenced_json_object(response)? {
        Some(object) => Some(object),
        None => parse_json_response(response),
    };

    Ok(parsed.filter(|object| keys.iter().any(|key| object.contains_key(*key))))
}

/// Object from the first ```json fence, or from the first untagged fence
/// whose body parses as an object
fn fenced_json_object(response: &str) -> Result<Option<Map<String, Value>>> {
    let mut lines = response.lines();

    while let Some(line) = lines.next() {
        let Some(language) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = language.trim();

        let body: Vec<&str> = lines
            .by_ref()
            .take_while(|l| !l.trim_start().starts_with("```"))
            .collect();
        let body = body.join("\n");

        if language.eq_ignore_ascii_case("json") {
            return match serde_json::from_str::<Value>(&body) {
                Ok(Value::Object(object)) => Ok(Some(object)),
                Ok(_) => Err(GraderError::ResponseParse(
                    "fenced block is not a JSON object".to_string(),
                )),
                Err(e) => Err(GraderError::ResponseParse(format!(
                    "fenced JSON block is invalid: {e}"
                ))),
            };
        }

        if language.is_empty() && body.trim_start().starts_with('{') {
            match serde_json::from_str::<Value>(&body) {
                Ok(Value::Object(object)) => return Ok(Some(object)),
                _ => debug!("skipping untagged code block that is not JSON"),
            }
        }
    }

    Ok(None)
}

/// Parse the whole reply as JSON, or the outermost `{...}` span inside it
fn parse_json_response(response: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(response.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => try_extract_embedded_json(response),
    }
}

fn try_extract_embedded_json(response: &str) -> Option<Map<String, Value>> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }

    match serde_json::from_str(&response[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn evaluation_from_json(object: &Map<String, Value>, response: &str) -> EvaluationResult {
    let score = object.get("score").and_then(number_value).map(clamp_score);

    let dimension_scores = match object.get("dimensions").and_then(|d| d.as_object()) {
        Some(dimensions) => dimensions
            .iter()
            .filter_map(|(name, value)| number_value(value).map(|s| (name.clone(), clamp_score(s))))
            .collect(),
        None => BTreeMap::new(),
    };

    EvaluationResult {
        score,
        dimension_scores,
        comments: text_field(object, "comments"),
        suggestions: text_field(object, "suggestions"),
        raw_response: response.to_string(),
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

/// Strings as-is, arrays joined one item per line
fn text_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// First number in `text`, e.g. `95` in "**95**/100".
///
/// A leading `-` is kept, and a fraction such as `8/10` is rescaled to 0-100.
fn leading_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].ends_with('-');

    let (value, rest) = split_number(&text[start..])?;
    let value = if negative { -value } else { value };

    let denominator = rest
        .trim_start_matches(['*', ' '])
        .strip_prefix('/')
        .map(|d| d.trim_start_matches(['*', ' ']))
        .filter(|d| d.starts_with(|c: char| c.is_ascii_digit()))
        .and_then(split_number)
        .map(|(d, _)| d);

    match denominator {
        Some(d) if d > 0.0 && d != 100.0 => Some(value / d * 100.0),
        _ => Some(value),
    }
}

/// Parse the digits (and at most one dot) at the start of `text`
fn split_number(text: &str) -> Option<(f64, &str)> {
    let mut seen_dot = false;
    let end = text
        .char_indices()
        .find(|&(_, c)| {
            if c == '.' && !seen_dot {
                seen_dot = true;
                false
            } else {
                !c.is_ascii_digit()
            }
        })
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let value = text[..end].trim_end_matches('.').parse().ok()?;
    Some((value, &text[end..]))
}

/// Collect `LABEL: value` sections; a value runs until the next label.
///
/// Labels match case-insensitively, may be wrapped in markdown emphasis, and
/// accept an ASCII or full-width colon.
fn labelled_sections(response: &str, labels: &[&'static str]) -> BTreeMap<&'static str, String> {
    let mut sections: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    let mut current: Option<&'static str> = None;

    for line in response.lines() {
        match match_label(line, labels) {
            Some((label, rest)) => {
                current = Some(label);
                sections.entry(label).or_default().push(rest);
            }
            None => {
                if let Some(label) = current {
                    sections.entry(label).or_default().push(line.to_string());
                }
            }
        }
    }

    sections
        .into_iter()
        .map(|(label, lines)| (label, lines.join("\n").trim().to_string()))
        .collect()
}

fn match_label(line: &str, labels: &[&'static str]) -> Option<(&'static str, String)> {
    let stripped = line.trim_start().trim_start_matches(['*', '#', '-', ' ']);

    for &label in labels {
        let Some(head) = stripped.get(..label.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(label) {
            continue;
        }

        let rest = stripped[label.len()..].trim_start_matches('*').trim_start();
        if let Some(value) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
            let value = value.trim().trim_start_matches("**").trim();
            return Some((label, value.to_string()));
        }
    }

    None
}

/// Grades answers with one provider and a rubric
pub struct Evaluator<P = Provider> {
    provider: P,
    rubric: RubricWeights,
}

impl<P: LlmProvider> Evaluator<P> {
    /// Create a new evaluator; the rubric must be valid
    pub fn new(provider: P, rubric: RubricWeights) -> Result<Self> {
        rubric.validate()?;
        Ok(Self { provider, rubric })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Grade `student_answer` against `standard_answer`.
    ///
    /// When the model scored every rubric dimension the overall score is the
    /// weighted sum of those scores.
    pub async fn evaluate(
        &self,
        standard_answer: &str,
        student_answer: &str,
    ) -> Result<EvaluationResult> {
        let mut result = self
            .provider
            .evaluate_answer(standard_answer, student_answer)
            .await?;

        if let Some(weighted) = self.rubric.combine(&result.dimension_scores) {
            debug!(
                provider = self.provider.name(),
                model_score = ?result.score,
                weighted,
                "applying rubric weights"
            );
            result.score = Some(weighted);
        }

        Ok(result)
    }
}
