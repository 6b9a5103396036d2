//! GNU R driven through `R --interactive --no-echo` over pipes.
//!
//! `--interactive` keeps R alive after a top-level error (a script-mode R
//! halts). The prelude blanks the prompts and defines `.ferry_json`, a small
//! encoder used by fetch/capture so values come back as JSON without
//! requiring jsonlite.

use ferry_types::Value;

use super::{InterpreterFamily, InterpreterKind, quoted};
use crate::classifier::SignatureClassifier;
use crate::reader::NoiseFilter;

const SENTINEL: &str = "__FERRY_R_5b7d2a__";

const PRELUDE: &str = r#"options(prompt = "", continue = "", warn = 1)
.ferry_json <- function(x) {
  if (is.null(x)) return("null")
  if (is.list(x)) {
    parts <- vapply(x, .ferry_json, character(1), USE.NAMES = FALSE)
    keys <- names(x)
    if (!is.null(keys) && length(keys) > 0 && all(keys != "")) {
      return(paste0("{", paste0(encodeString(keys, quote = "\""), ":", parts, collapse = ","), "}"))
    }
    return(paste0("[", paste(parts, collapse = ","), "]"))
  }
  scalar <- function(v) {
    if (is.na(v)) return("null")
    if (is.logical(v)) return(if (v) "true" else "false")
    if (is.numeric(v)) return(format(v, digits = 15))
    encodeString(as.character(v), quote = "\"")
  }
  items <- vapply(as.list(x), scalar, character(1), USE.NAMES = FALSE)
  if (length(x) == 1) items else paste0("[", paste(items, collapse = ","), "]")
}
.ferry_exec <- function(src, marker) {
  tryCatch({
    for (e in parse(text = src)) {
      res <- withVisible(eval(e, envir = globalenv()))
      if (res$visible) print(res$value)
    }
  }, error = function(e) {
    message("Error: ", conditionMessage(e))
  }, finally = {
    flush(stderr())
    cat(marker, "\n", sep = "")
    flush(stdout())
  })
  invisible(NULL)
}
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct RFamily;

impl InterpreterFamily for RFamily {
    fn kind(&self) -> InterpreterKind {
        InterpreterKind::R
    }

    fn program(&self) -> &str {
        "R"
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--vanilla".into(),
            "--quiet".into(),
            "--no-echo".into(),
            "--interactive".into(),
        ]
    }

    fn sentinel(&self) -> &str {
        SENTINEL
    }

    fn stdout_filter(&self) -> NoiseFilter {
        NoiseFilter::default()
    }

    fn stderr_filter(&self) -> NoiseFilter {
        NoiseFilter::new(Vec::<String>::new(), ["WARNING: ignoring environment value of R_HOME"])
    }

    fn classifier(&self) -> SignatureClassifier {
        SignatureClassifier::new("r", ["^Error", "^Execution halted"])
    }

    fn block_keywords(&self) -> &[&str] {
        &["function", "if", "for", "while", "repeat", "{"]
    }

    fn marker_statement(&self, marker: &str) -> String {
        format!("cat({}, \"\\n\", sep = \"\"); flush(stdout())", quoted(marker))
    }

    fn wrap_block(&self, code: &str, marker: &str) -> String {
        format!(".ferry_exec({}, {})", quoted(code), quoted(marker))
    }

    fn prelude(&self) -> Option<String> {
        Some(format!("eval(parse(text = {}))", quoted(PRELUDE)))
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".into(),
            Value::Bool(true) => "TRUE".into(),
            Value::Bool(false) => "FALSE".into(),
            Value::Int(i) => format!("{i}L"),
            Value::Float(f) => render_float(*f),
            Value::String(s) => quoted(s),
            Value::Json(json) => render_json(json),
        }
    }

    fn assign(&self, name: &str, value: &Value) -> String {
        format!("{name} <- {}", self.render_value(value))
    }

    fn fetch(&self, name: &str) -> String {
        format!("cat(.ferry_json({name}), \"\\n\", sep = \"\")")
    }

    fn capture(&self, names: &[String]) -> String {
        let entries: Vec<String> = names.iter().map(|n| format!("`{n}` = {n}")).collect();
        format!("cat(.ferry_json(list({})), \"\\n\", sep = \"\")", entries.join(", "))
    }

    fn parse_value(&self, output: &str) -> Value {
        let trimmed = output.trim();
        if trimmed == "NULL" {
            return Value::Null;
        }
        match parse_printed_vector(trimmed) {
            Some(value) => value,
            None => Value::from_output(trimmed),
        }
    }

    fn is_valid_name(&self, name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '.' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    }

    fn is_valid_target(&self, target: &str) -> bool {
        match target.split_once("::") {
            Some((pkg, func)) => self.is_valid_name(pkg) && self.is_valid_name(func),
            None => self.is_valid_name(target),
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "Inf".into() } else { "-Inf".into() }
    } else {
        format!("{f:?}")
    }
}

fn render_json(json: &serde_json::Value) -> String {
    match json {
        serde_json::Value::Null => "NULL".into(),
        serde_json::Value::Bool(true) => "TRUE".into(),
        serde_json::Value::Bool(false) => "FALSE".into(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => quoted(s),
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(render_json).collect();
            format!("list({})", items.join(", "))
        }
        serde_json::Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("`{}` = {}", k.replace('`', "\\`"), render_json(v)))
                .collect();
            format!("list({})", entries.join(", "))
        }
    }
}

/// Decode R's auto-print of a length-one atomic vector: `[1] 2`, `[1] "ok"`.
fn parse_printed_vector(text: &str) -> Option<Value> {
    if text.contains('\n') {
        return None;
    }
    let rest = text.strip_prefix("[1] ")?.trim();
    match rest {
        "TRUE" => return Some(Value::Bool(true)),
        "FALSE" => return Some(Value::Bool(false)),
        "NA" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(i) = rest.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = rest.parse::<f64>() {
        return Some(Value::Float(f));
    }
    if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
        return serde_json::from_str::<String>(rest).ok().map(Value::String);
    }
    None
}
