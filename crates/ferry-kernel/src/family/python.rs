//! CPython driven through `python3 -i` over pipes.
//!
//! With stdin not a TTY, the interactive loop writes its prompts to stderr
//! and echoes expression values via `sys.displayhook`. The prelude blanks
//! the prompts and swaps the displayhook for one that prints JSON whenever
//! the value is serializable, so results come back structured.

use ferry_types::Value;

use super::{InterpreterFamily, InterpreterKind, quoted};
use crate::classifier::SignatureClassifier;
use crate::reader::NoiseFilter;

const SENTINEL: &str = "__FERRY_PY_9f3c1e__";

const PRELUDE: &str = r#"import sys as _ferry_sys, json as _ferry_json, ast as _ferry_ast, traceback as _ferry_tb, builtins as _ferry_builtins
_ferry_sys.ps1 = ""
_ferry_sys.ps2 = ""

def _ferry_render(value):
    try:
        return _ferry_json.dumps(value)
    except (TypeError, ValueError):
        return repr(value)

def _ferry_display(value):
    if value is None:
        return
    _ferry_builtins._ = value
    print(_ferry_render(value), flush=True)

_ferry_sys.displayhook = _ferry_display

def _ferry_exec(source, marker):
    scope = globals()
    try:
        tree = _ferry_ast.parse(source, "<ferry>", "exec")
        last = None
        if tree.body and isinstance(tree.body[-1], _ferry_ast.Expr):
            last = _ferry_ast.Expression(tree.body.pop().value)
        exec(compile(tree, "<ferry>", "exec"), scope)
        if last is not None:
            _ferry_display(eval(compile(last, "<ferry>", "eval"), scope))
    except BaseException:
        _ferry_tb.print_exc()
    finally:
        _ferry_sys.stderr.flush()
        print(marker, flush=True)
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonFamily;

impl InterpreterFamily for PythonFamily {
    fn kind(&self) -> InterpreterKind {
        InterpreterKind::Python
    }

    fn program(&self) -> &str {
        "python3"
    }

    fn args(&self) -> Vec<String> {
        vec!["-i".into(), "-u".into(), "-q".into()]
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            ("PYTHONUNBUFFERED".into(), "1".into()),
            ("PYTHONIOENCODING".into(), "utf-8".into()),
            // 3.13+ would otherwise try the pyrepl front end.
            ("PYTHON_BASIC_REPL".into(), "1".into()),
        ]
    }

    fn sentinel(&self) -> &str {
        SENTINEL
    }

    fn stdout_filter(&self) -> NoiseFilter {
        NoiseFilter::new(Vec::<String>::new(), banners())
    }

    fn stderr_filter(&self) -> NoiseFilter {
        NoiseFilter::new([">>> ", "... "], banners())
    }

    fn classifier(&self) -> SignatureClassifier {
        SignatureClassifier::new(
            "python",
            [
                "Traceback (most recent call last)",
                "^SyntaxError:",
                "^IndentationError:",
                "^TabError:",
                "^KeyboardInterrupt",
            ],
        )
    }

    fn block_keywords(&self) -> &[&str] {
        &["def", "class", "if", "for", "while", "with", "try", "async", "@"]
    }

    fn leaves_open(&self, line: &str) -> bool {
        leaves_open(line)
    }

    fn marker_statement(&self, marker: &str) -> String {
        format!("print({}, flush=True)", quoted(marker))
    }

    fn wrap_block(&self, code: &str, marker: &str) -> String {
        format!("_ferry_exec({}, {})", quoted(code), quoted(marker))
    }

    fn prelude(&self) -> Option<String> {
        Some(format!("exec({})", quoted(PRELUDE)))
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => render_float(*f),
            Value::String(s) => quoted(s),
            Value::Json(json) => render_json(json),
        }
    }

    fn assign(&self, name: &str, value: &Value) -> String {
        format!("{name} = {}", self.render_value(value))
    }

    fn fetch(&self, name: &str) -> String {
        name.to_string()
    }

    fn capture(&self, names: &[String]) -> String {
        let entries: Vec<String> = names
            .iter()
            .map(|n| format!("{}: {n}", quoted(n)))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

/// True when the REPL would prompt for more input after `line`.
///
/// Such lines go through `_ferry_exec`, which reports the `SyntaxError`
/// instead of waiting.
fn leaves_open(line: &str) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let mut depth = 0i32;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '#' => break,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            quote @ ('\'' | '"') => {
                let triple = chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote);
                let width = if triple { 3 } else { 1 };
                i += width;
                loop {
                    match chars.get(i) {
                        // A one-line string left open is a SyntaxError right away
                        None => return triple,
                        Some('\\') => i += 2,
                        Some(&c) if c == quote
                            && (!triple
                                || (chars.get(i + 1) == Some(&quote)
                                    && chars.get(i + 2) == Some(&quote))) =>
                        {
                            i += width;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    let end = line.trim_end();
    depth > 0 || end.ends_with('\\') || end.ends_with(':')
}

fn banners() -> [&'static str; 2] {
    ["Python 3.", "Type \"help\", \"copyright\""]
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "float('nan')".into()
    } else if f.is_infinite() {
        if f > 0.0 { "float('inf')".into() } else { "float('-inf')".into() }
    } else {
        // Debug keeps a decimal point (`1.0`), so Python sees a float.
        format!("{f:?}")
    }
}

fn render_json(json: &serde_json::Value) -> String {
    match json {
        serde_json::Value::Null => "None".into(),
        serde_json::Value::Bool(true) => "True".into(),
        serde_json::Value::Bool(false) => "False".into(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => quoted(s),
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(render_json).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quoted(k), render_json(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}
