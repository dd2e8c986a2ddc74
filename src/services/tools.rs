use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

const MAX_FILE_BYTES: u64 = 64 * 1024;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI function-calling schemas for the builtin tools.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "search_web",
                "description": "Search the web via DuckDuckGo and return a short answer",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "The search query"}
                    },
                    "required": ["query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "calculate",
                "description": "Evaluate an arithmetic expression (+, -, *, /, parentheses)",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "expression": {"type": "string", "description": "The expression to evaluate"}
                    },
                    "required": ["expression"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "read_file",
                "description": "Read a text file from the working directory",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Relative path of the file"}
                    },
                    "required": ["path"]
                }
            }
        }),
    ]
}

/// Dispatches one tool call. Errors come back as strings so the agent can
/// hand them to the model as the tool response instead of failing the run.
pub fn execute(name: &str, args: &Value) -> Result<String, String> {
    info!("[TOOLS] executing {} with {}", name, args);
    match name {
        "search_web" => {
            let query = required_str(args, "query")?;
            search_web(query)
        }
        "calculate" => {
            let expression = required_str(args, "expression")?;
            evaluate_expression(expression).map(|n| format_number(n))
        }
        "read_file" => {
            let path = required_str(args, "path")?;
            read_file_in(&std::env::current_dir().map_err(|e| e.to_string())?, path)
        }
        other => Err(format!("Unknown tool: {other}")),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required argument: {key}"))
}

fn search_web(query: &str) -> Result<String, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(SEARCH_TIMEOUT)
        .build()
        .map_err(|e| format!("search client error: {e}"))?;
    let response = client
        .get("https://api.duckduckgo.com/")
        .query(&[("q", query), ("format", "json"), ("no_html", "1")])
        .send()
        .map_err(|e| format!("search request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("search returned status {}", response.status()));
    }
    let body: Value = response
        .json()
        .map_err(|e| format!("search response was not JSON: {e}"))?;

    if let Some(answer) = body.get("AbstractText").and_then(|v| v.as_str()) {
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
    }
    if let Some(answer) = body.get("Answer").and_then(|v| v.as_str()) {
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
    }
    let topics: Vec<String> = body
        .get("RelatedTopics")
        .and_then(|v| v.as_array())
        .map(|topics| {
            topics
                .iter()
                .filter_map(|t| t.get("Text").and_then(|v| v.as_str()))
                .take(3)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    if topics.is_empty() {
        Ok(format!("No results found for: {query}"))
    } else {
        Ok(topics.join("\n"))
    }
}

/// Recursive-descent evaluator for `+ - * /`, unary minus and parentheses.
pub fn evaluate_expression(expression: &str) -> Result<f64, String> {
    let tokens: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let value = parser.parse_sum()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "Unexpected character '{}' in expression",
            parser.tokens[parser.pos]
        ));
    }
    if !value.is_finite() {
        return Err("Expression result is not finite".to_string());
    }
    Ok(value)
}

struct ExprParser {
    tokens: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn parse_sum(&mut self) -> Result<f64, String> {
        let mut value = self.parse_product()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.pos += 1;
                    value += self.parse_product()?;
                }
                '-' => {
                    self.pos += 1;
                    value -= self.parse_product()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_product(&mut self) -> Result<f64, String> {
        let mut value = self.parse_atom()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.pos += 1;
                    value *= self.parse_atom()?;
                }
                '/' => {
                    self.pos += 1;
                    let divisor = self.parse_atom()?;
                    if divisor == 0.0 {
                        return Err("Division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.parse_atom()?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.parse_sum()?;
                if self.peek() != Some(')') {
                    return Err("Unbalanced parentheses".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .map_or(false, |c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let literal: String = self.tokens[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid number: {literal}"))
            }
            Some(c) => Err(format!("Unexpected character '{c}' in expression")),
            None => Err("Expression ended unexpectedly".to_string()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Workspace-confined file read. Rejects absolute paths and traversal so a
/// model-chosen path cannot escape the working directory.
pub fn read_file_in(root: &Path, path: &str) -> Result<String, String> {
    let resolved = resolve_within(root, path)?;
    let meta = fs::metadata(&resolved).map_err(|e| format!("cannot read {path}: {e}"))?;
    if !meta.is_file() {
        return Err(format!("{path} is not a regular file"));
    }
    if meta.len() > MAX_FILE_BYTES {
        return Err(format!(
            "{path} is too large ({} bytes, limit {})",
            meta.len(),
            MAX_FILE_BYTES
        ));
    }
    fs::read_to_string(&resolved).map_err(|e| format!("cannot read {path}: {e}"))
}

fn resolve_within(root: &Path, path: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.contains('\\') {
        return Err(format!("absolute or platform-specific path not allowed: {path}"));
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(format!("path traversal detected: {path}"));
        }
    }
    let joined = root.join(candidate);
    let canonical_root = fs::canonicalize(root).map_err(|e| format!("bad workspace root: {e}"))?;
    let canonical = fs::canonicalize(&joined).map_err(|e| format!("cannot resolve {path}: {e}"))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(format!("path escapes the working directory: {path}"));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::{evaluate_expression, execute, format_number, read_file_in, tool_schemas};
    use serde_json::json;

    #[test]
    fn schemas_cover_the_three_builtin_tools() {
        let names: Vec<String> = tool_schemas()
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["search_web", "calculate", "read_file"]);
    }

    #[test]
    fn evaluates_basic_arithmetic() {
        assert_eq!(evaluate_expression("2+2").unwrap(), 4.0);
        assert_eq!(evaluate_expression("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate_expression("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate_expression("-3 + 1").unwrap(), -2.0);
        assert_eq!(evaluate_expression("10 / 4").unwrap(), 2.5);
    }

    #[test]
    fn rejects_division_by_zero_and_garbage() {
        assert!(evaluate_expression("1/0").is_err());
        assert!(evaluate_expression("2 +").is_err());
        assert!(evaluate_expression("two plus two").is_err());
        assert!(evaluate_expression("(1+2").is_err());
        assert!(evaluate_expression("").is_err());
    }

    #[test]
    fn integers_are_formatted_without_fraction() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn calculate_dispatch_returns_the_answer() {
        let result = execute("calculate", &json!({"expression": "2+2"})).unwrap();
        assert_eq!(result, "4");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        assert!(execute("delete_everything", &json!({})).is_err());
    }

    #[test]
    fn missing_argument_is_an_error() {
        assert!(execute("calculate", &json!({})).is_err());
    }

    #[test]
    fn read_file_stays_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        assert_eq!(read_file_in(dir.path(), "notes.txt").unwrap(), "hello");
        assert!(read_file_in(dir.path(), "../etc/passwd").is_err());
        assert!(read_file_in(dir.path(), "/etc/passwd").is_err());
        assert!(read_file_in(dir.path(), "absent.txt").is_err());
    }

    #[test]
    fn read_file_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let big = "x".repeat(70 * 1024);
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        assert!(read_file_in(dir.path(), "big.txt").is_err());
    }
}
