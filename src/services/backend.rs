use crate::schema::Choice;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::env;
use std::process::Command;

/// Error code the backend uses for server-side validation failures.
/// Its `msg` payload is a field-keyed mapping of messages.
pub const VALIDATION_CODE: &str = "validation";

#[derive(Clone, Debug, Deserialize)]
pub struct ApiError {
    pub code: String,
    #[serde(default)]
    pub msg: JsonValue,
}

/// JSON envelope every backend call resolves to.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub warning: Option<String>,
}

impl Envelope {
    pub fn ok(data: JsonValue) -> Self {
        Self {
            data: Some(data),
            error: None,
            warning: None,
        }
    }

    pub fn err(code: impl Into<String>, msg: JsonValue) -> Self {
        Self {
            data: None,
            error: Some(ApiError {
                code: code.into(),
                msg,
            }),
            warning: None,
        }
    }
}

/// Narrow CRUD contract the controllers and the results table program
/// against. One in-flight request per user action, no retries.
pub trait Backend {
    fn create(&self, service: &str, noun: &str, body: &JsonValue) -> Result<Envelope>;
    fn read(&self, service: &str, noun: &str, filter: &JsonValue) -> Result<Envelope>;
    fn update(&self, service: &str, noun: &str, body: &JsonValue) -> Result<Envelope>;
    fn delete(&self, service: &str, noun: &str, key: &JsonValue) -> Result<Envelope>;
}

fn expand_cmdline_env(cmdline: &str) -> String {
    // Expand ${VAR} from environment; special-case ${APP_BIN}
    // -> CRUD_APP_BIN (quoted if it contains whitespace) or "example-app"
    let re = Regex::new(r"\$\{([A-Z0-9_]+)\}").unwrap();
    let env_map: HashMap<String, String> = env::vars().collect();
    re.replace_all(cmdline, |caps: &regex::Captures| {
        let key = &caps[1];
        if key == "APP_BIN" {
            if let Some(v) = env_map.get("CRUD_APP_BIN") {
                let needs_quote = v.chars().any(|c| c.is_whitespace());
                if needs_quote {
                    let escaped = v.replace('"', "\\\"");
                    return format!("\"{escaped}\"");
                }
                return v.to_string();
            }
            return "example-app".to_string();
        }
        env_map.get(key).cloned().unwrap_or_default()
    })
    .to_string()
}

/// Run a command line and parse its stdout as JSON.
pub fn run_cmdline_to_json(cmdline: &str) -> Result<JsonValue> {
    let expanded = expand_cmdline_env(cmdline);
    let parts = shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse command line"))?;
    if parts.is_empty() {
        return Err(anyhow!("Empty command line"));
    }
    let program = &parts[0];
    let args = &parts[1..];
    let output = Command::new(program)
        .args(args)
        .env("CRUD_TUI_JSON", "1")
        .output()
        .with_context(|| format!("spawning {expanded}"))?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(anyhow!("Command failed: {}\n{}", cmdline, err));
    }
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    let v: JsonValue = serde_json::from_str(&text).with_context(|| "parsing command JSON")?;
    Ok(v)
}

/// Fetch an option list from a command producing an envelope whose data
/// (optionally under an `unwrap` key) is an array of choices.
pub fn fetch_options(cmdline: &str, unwrap: Option<&str>) -> Result<Vec<Choice>> {
    let v = run_cmdline_to_json(cmdline)?;
    let mut data = v.get("data").cloned().unwrap_or(v);
    if let Some(key) = unwrap {
        data = data.get(key).cloned().unwrap_or(JsonValue::Null);
    }
    let arr = data
        .as_array()
        .ok_or_else(|| anyhow!("options command did not return a list"))?;
    let mut out = Vec::new();
    for item in arr {
        match item {
            JsonValue::String(s) => out.push(Choice::new(s.clone(), s.clone())),
            JsonValue::Object(m) => {
                let value = m
                    .get("value")
                    .or_else(|| m.get("id"))
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                let label = m
                    .get("label")
                    .or_else(|| m.get("title"))
                    .and_then(|x| x.as_str())
                    .unwrap_or(&value)
                    .to_string();
                if !value.is_empty() {
                    out.push(Choice { value, label });
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Backend that shells out to `<service> <noun> <verb>` and reads a JSON
/// envelope from stdout. The payload travels as a single `--json` argument
/// appended after shell-splitting, so no quoting games are needed.
#[derive(Clone, Debug, Default)]
pub struct CliBackend;

impl CliBackend {
    fn call(&self, service: &str, noun: &str, verb: &str, payload: &JsonValue) -> Result<Envelope> {
        let expanded = expand_cmdline_env(service);
        let mut parts =
            shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse service command"))?;
        if parts.is_empty() {
            return Err(anyhow!("Empty service command"));
        }
        parts.push(noun.to_string());
        parts.push(verb.to_string());
        if !payload.is_null() {
            parts.push("--json".to_string());
            parts.push(payload.to_string());
        }
        let program = parts[0].clone();
        let output = Command::new(&program)
            .args(&parts[1..])
            .env("CRUD_TUI_JSON", "1")
            .output()
            .with_context(|| format!("spawning {program} {noun} {verb}"))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(anyhow!("Command failed: {noun} {verb}\n{err}"));
        }
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        serde_json::from_str(&text).with_context(|| "parsing backend envelope")
    }
}

impl Backend for CliBackend {
    fn create(&self, service: &str, noun: &str, body: &JsonValue) -> Result<Envelope> {
        self.call(service, noun, "create", body)
    }

    fn read(&self, service: &str, noun: &str, filter: &JsonValue) -> Result<Envelope> {
        self.call(service, noun, "list", filter)
    }

    fn update(&self, service: &str, noun: &str, body: &JsonValue) -> Result<Envelope> {
        self.call(service, noun, "update", body)
    }

    fn delete(&self, service: &str, noun: &str, key: &JsonValue) -> Result<Envelope> {
        self.call(service, noun, "delete", key)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;

    #[derive(Clone, Debug, PartialEq)]
    pub struct Call {
        pub verb: String,
        pub noun: String,
        pub payload: JsonValue,
    }

    /// Records every call and replays queued envelopes (default: ok with
    /// a generated `_id`).
    #[derive(Default)]
    pub struct MockBackend {
        pub calls: RefCell<Vec<Call>>,
        pub queued: RefCell<Vec<Envelope>>,
    }

    impl MockBackend {
        pub fn with_reply(env: Envelope) -> Self {
            let m = Self::default();
            m.queued.borrow_mut().push(env);
            m
        }

        pub fn queue(&self, env: Envelope) {
            self.queued.borrow_mut().push(env);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        fn record(&self, verb: &str, noun: &str, payload: &JsonValue) -> Result<Envelope> {
            self.calls.borrow_mut().push(Call {
                verb: verb.to_string(),
                noun: noun.to_string(),
                payload: payload.clone(),
            });
            let mut q = self.queued.borrow_mut();
            if q.is_empty() {
                Ok(Envelope::ok(serde_json::json!({"_id": "generated"})))
            } else {
                Ok(q.remove(0))
            }
        }
    }

    impl Backend for MockBackend {
        fn create(&self, _s: &str, noun: &str, body: &JsonValue) -> Result<Envelope> {
            self.record("create", noun, body)
        }
        fn read(&self, _s: &str, noun: &str, filter: &JsonValue) -> Result<Envelope> {
            self.record("read", noun, filter)
        }
        fn update(&self, _s: &str, noun: &str, body: &JsonValue) -> Result<Envelope> {
            self.record("update", noun, body)
        }
        fn delete(&self, _s: &str, noun: &str, key: &JsonValue) -> Result<Envelope> {
            self.record("delete", noun, key)
        }
    }
}
