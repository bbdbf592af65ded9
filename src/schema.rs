use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Structural kind of a schema node. Derived from the node shape:
/// `fields` makes a group, an `item` (or a list-ish type tag) makes a list,
/// a `map` type tag makes a map, everything else is a scalar.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeClass {
    Scalar,
    List,
    Map,
    Group,
}

/// Which screen a widget tree is built for. Fixed for a widget's lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Create,
    Update,
    Search,
}

/// One selectable option: stored value plus display label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

impl<'de> Deserialize<'de> for Choice {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Full {
                value: String,
                #[serde(default)]
                label: Option<String>,
            },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Plain(s) => Choice {
                label: s.clone(),
                value: s,
            },
            Raw::Full { value, label } => Choice {
                label: label.unwrap_or_else(|| value.clone()),
                value,
            },
        })
    }
}

fn default_type() -> String {
    "string".to_string()
}

fn default_key() -> String {
    "_id".to_string()
}

/// A node in the schema tree: a field's type, constraints and structural
/// kind, plus namespaced display metadata under `special`.
#[derive(Clone, Debug, Deserialize)]
pub struct SchemaNode {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_tag: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Vec<Choice>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub min_len: Option<usize>,
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    // Group children, in declaration order.
    #[serde(default)]
    pub fields: Vec<SchemaNode>,
    // List element schema.
    #[serde(default)]
    pub item: Option<Box<SchemaNode>>,
    // Primary-key field name, meaningful on the record root.
    #[serde(default = "default_key")]
    pub key: String,
    // Namespaced display metadata, e.g. special["ui"].
    #[serde(default)]
    pub special: HashMap<String, JsonValue>,
}

impl SchemaNode {
    /// Bare scalar node, used where a list declares no item schema.
    pub fn scalar(name: &str, type_tag: &str) -> Self {
        Self {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            required: false,
            options: None,
            minimum: None,
            maximum: None,
            min_len: None,
            max_len: None,
            pattern: None,
            fields: Vec::new(),
            item: None,
            key: default_key(),
            special: HashMap::new(),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("parsing schema YAML")
    }

    pub fn from_json(v: &JsonValue) -> Result<Self> {
        serde_json::from_value(v.clone()).context("parsing schema JSON")
    }

    pub fn class(&self) -> NodeClass {
        if !self.fields.is_empty() {
            NodeClass::Group
        } else if self.item.is_some() || matches!(self.type_tag.as_str(), "list" | "array") {
            NodeClass::List
        } else if self.type_tag == "map" {
            NodeClass::Map
        } else {
            NodeClass::Scalar
        }
    }

    /// Child field names in declaration order (group nodes).
    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Element schema for list nodes. Defaults to a plain string scalar
    /// when the list declares no explicit item.
    pub fn child(&self) -> Option<&SchemaNode> {
        self.item.as_deref()
    }

    pub fn special(&self, ns: &str) -> Option<&JsonValue> {
        self.special.get(ns)
    }

    /// Validate a single value against this node's constraints. `Ok(())`
    /// means valid; the error string is the inline message to display.
    pub fn validate(&self, v: &JsonValue) -> std::result::Result<(), String> {
        if value_is_empty(v) {
            if self.required {
                return Err("This field is required".into());
            }
            return Ok(());
        }
        if let Some(opts) = &self.options {
            let s = v.as_str().unwrap_or_default();
            if !opts.iter().any(|c| c.value == s) {
                return Err("Not one of the allowed options".into());
            }
            return Ok(());
        }
        match self.type_tag.as_str() {
            "string" | "str" | "text" | "textarea" | "password" | "hidden" => {
                let s = v.as_str().ok_or("Expected text")?;
                self.check_text(s)
            }
            "int" | "integer" => {
                let n = match v {
                    JsonValue::Number(n) if n.is_i64() || n.is_u64() => n.as_f64().unwrap_or(0.0),
                    JsonValue::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| "Invalid integer".to_string())?
                        as f64,
                    _ => return Err("Invalid integer".into()),
                };
                self.check_bounds(n)
            }
            "number" | "float" | "decimal" | "price" | "elapsed" => {
                let n = match v {
                    JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
                    JsonValue::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| "Invalid number".to_string())?,
                    _ => return Err("Invalid number".into()),
                };
                self.check_bounds(n)
            }
            "bool" | "boolean" => {
                if v.is_boolean() {
                    Ok(())
                } else {
                    Err("Expected true or false".into())
                }
            }
            "date" => {
                let s = v.as_str().ok_or("Expected a date")?;
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|_| ())
                    .map_err(|_| "Expected YYYY-MM-DD".into())
            }
            "datetime" | "timestamp" => match v {
                JsonValue::Number(_) => Ok(()),
                JsonValue::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                    .map(|_| ())
                    .map_err(|_| "Expected an RFC 3339 timestamp".into()),
                _ => Err("Expected a timestamp".into()),
            },
            "time" => {
                let s = v.as_str().ok_or("Expected a time")?;
                chrono::NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .or_else(|_| chrono::NaiveTime::parse_from_str(s, "%H:%M"))
                    .map(|_| ())
                    .map_err(|_| "Expected HH:MM".into())
            }
            "list" | "array" => {
                if v.is_array() {
                    Ok(())
                } else {
                    Err("Expected a list".into())
                }
            }
            "map" => {
                if v.is_object() {
                    Ok(())
                } else {
                    Err("Expected an object".into())
                }
            }
            _ => Ok(()),
        }
    }

    fn check_text(&self, s: &str) -> std::result::Result<(), String> {
        let st = s.trim();
        if let Some(minl) = self.min_len {
            if st.chars().count() < minl {
                return Err(format!("Must be at least {minl} characters"));
            }
        }
        if let Some(maxl) = self.max_len {
            if st.chars().count() > maxl {
                return Err(format!("Must be at most {maxl} characters"));
            }
        }
        if let Some(pat) = &self.pattern {
            if let Ok(re) = regex::Regex::new(pat) {
                if !st.is_empty() && !re.is_match(st) {
                    return Err("Does not match required pattern".into());
                }
            }
        }
        Ok(())
    }

    fn check_bounds(&self, n: f64) -> std::result::Result<(), String> {
        if let Some(minv) = self.minimum {
            if n < minv {
                return Err(format!("Must be at least {minv}"));
            }
        }
        if let Some(maxv) = self.maximum {
            if n > maxv {
                return Err(format!("Must be at most {maxv}"));
            }
        }
        Ok(())
    }
}

/// Empty per the group-value aggregation invariant: null, "", [] and {}.
pub fn value_is_empty(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Namespace display metadata is resolved from.
pub const UI_NS: &str = "ui";

/// Cross-field option binding: the trigger field's value picks the
/// dependent field's option set.
#[derive(Clone, Debug, Deserialize)]
pub struct OptionBindingSpec {
    pub field: String,
    pub trigger: String,
    #[serde(default)]
    pub options: HashMap<String, Vec<Choice>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum OrderSpec {
    Flat(Vec<String>),
    ByMode {
        #[serde(default)]
        create: Option<Vec<String>>,
        #[serde(default)]
        update: Option<Vec<String>>,
        #[serde(default)]
        search: Option<Vec<String>>,
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawMeta {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    widget: Option<String>,
    #[serde(default)]
    default: Option<JsonValue>,
    #[serde(default)]
    options: Option<Vec<Choice>>,
    #[serde(default)]
    order: Option<OrderSpec>,
    #[serde(default)]
    results: Option<Vec<String>>,
    #[serde(default)]
    size: Option<u16>,
    #[serde(default)]
    props: Option<serde_json::Map<String, JsonValue>>,
    #[serde(default)]
    options_cmd: Option<String>,
    #[serde(default)]
    unwrap: Option<String>,
    #[serde(default)]
    dynamic_options: Vec<OptionBindingSpec>,
}

/// Per-node UI configuration, resolved once at widget construction.
/// The schema node itself is never mutated to carry derived state.
#[derive(Clone, Debug, Default)]
pub struct DisplayMeta {
    pub title: String,
    pub widget: Option<String>,
    pub default: Option<JsonValue>,
    pub options: Option<Vec<Choice>>,
    pub order: Option<Vec<String>>,
    pub order_create: Option<Vec<String>>,
    pub order_update: Option<Vec<String>>,
    pub order_search: Option<Vec<String>>,
    pub results: Option<Vec<String>>,
    pub size: Option<u16>,
    pub props: serde_json::Map<String, JsonValue>,
    pub options_cmd: Option<String>,
    pub unwrap: Option<String>,
    pub bindings: Vec<OptionBindingSpec>,
}

impl DisplayMeta {
    pub fn resolve(node: &SchemaNode) -> Self {
        let raw: RawMeta = node
            .special(UI_NS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let (order, order_create, order_update, order_search) = match raw.order {
            Some(OrderSpec::Flat(o)) => (Some(o), None, None, None),
            Some(OrderSpec::ByMode {
                create,
                update,
                search,
            }) => (None, create, update, search),
            None => (None, None, None, None),
        };
        Self {
            title: raw.title.unwrap_or_else(|| title_case(&node.name)),
            widget: raw.widget.map(|w| w.to_ascii_lowercase()),
            default: raw.default,
            options: raw.options,
            order,
            order_create,
            order_update,
            order_search,
            results: raw.results,
            size: raw.size,
            props: raw.props.unwrap_or_default(),
            options_cmd: raw.options_cmd,
            unwrap: raw.unwrap,
            bindings: raw.dynamic_options,
        }
    }

    /// Mode-specific order falling back to the generic `order` key.
    pub fn order_for(&self, mode: Mode) -> Option<&Vec<String>> {
        let specific = match mode {
            Mode::Create => self.order_create.as_ref(),
            Mode::Update => self.order_update.as_ref(),
            Mode::Search => self.order_search.as_ref(),
        };
        specific.or(self.order.as_ref())
    }
}

/// Default title for a field: underscores to spaces, first letter upper.
pub fn title_case(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(yaml: &str) -> SchemaNode {
        SchemaNode::from_yaml_str(yaml).expect("schema")
    }

    #[test]
    fn class_is_derived_from_shape() {
        assert_eq!(node("name: n\ntype: string").class(), NodeClass::Scalar);
        assert_eq!(node("name: n\ntype: map").class(), NodeClass::Map);
        assert_eq!(
            node("name: n\nitem: {type: string}").class(),
            NodeClass::List
        );
        assert_eq!(
            node("name: n\nfields:\n  - name: a\n").class(),
            NodeClass::Group
        );
    }

    #[test]
    fn keys_preserve_declaration_order() {
        let n = node("name: r\nfields:\n  - name: z\n  - name: a\n  - name: m\n");
        assert_eq!(n.keys(), vec!["z", "a", "m"]);
        assert!(n.get("a").is_some());
        assert!(n.get("missing").is_none());
    }

    #[test]
    fn validate_required_and_bounds() {
        let n = node("name: age\ntype: int\nrequired: true\nminimum: 0\nmaximum: 120");
        assert!(n.validate(&JsonValue::Null).is_err());
        assert!(n.validate(&json!(30)).is_ok());
        assert_eq!(
            n.validate(&json!(130)).unwrap_err(),
            "Must be at most 120".to_string()
        );
        assert!(n.validate(&json!("abc")).is_err());
    }

    #[test]
    fn validate_text_length_and_pattern() {
        let n = node("name: code\ntype: string\nmin_len: 2\nmax_len: 4\npattern: '^[a-z]+$'");
        assert!(n.validate(&json!("ab")).is_ok());
        assert!(n.validate(&json!("a")).is_err());
        assert!(n.validate(&json!("abcde")).is_err());
        assert!(n.validate(&json!("AB")).is_err());
        // empty and not required: fine
        assert!(n.validate(&json!("")).is_ok());
    }

    #[test]
    fn validate_date_time_kinds() {
        assert!(node("name: d\ntype: date").validate(&json!("2024-02-29")).is_ok());
        assert!(node("name: d\ntype: date").validate(&json!("02/29/2024")).is_err());
        assert!(node("name: t\ntype: time").validate(&json!("09:30")).is_ok());
        assert!(node("name: t\ntype: time").validate(&json!("junk")).is_err());
        assert!(node("name: ts\ntype: datetime")
            .validate(&json!("2024-01-01T10:00:00Z"))
            .is_ok());
        assert!(node("name: ts\ntype: datetime").validate(&json!(1700000000)).is_ok());
    }

    #[test]
    fn validate_options_membership() {
        let n = node("name: c\noptions:\n  - {value: r, label: Red}\n  - {value: b, label: Blue}");
        assert!(n.validate(&json!("r")).is_ok());
        assert!(n.validate(&json!("x")).is_err());
    }

    #[test]
    fn display_meta_defaults_title_from_name() {
        let n = node("name: first_name\ntype: string");
        let m = DisplayMeta::resolve(&n);
        assert_eq!(m.title, "First name");
        assert!(m.widget.is_none());
    }

    #[test]
    fn display_meta_reads_ui_namespace() {
        let n = node(
            "name: color\ntype: string\nspecial:\n  ui:\n    title: Colour\n    widget: Select\n    size: 3\n    order: [a, b]\n",
        );
        let m = DisplayMeta::resolve(&n);
        assert_eq!(m.title, "Colour");
        assert_eq!(m.widget.as_deref(), Some("select"));
        assert_eq!(m.size, Some(3));
        assert_eq!(m.order_for(Mode::Create).unwrap(), &vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn display_meta_mode_specific_order_wins() {
        let n = node(
            "name: g\nspecial:\n  ui:\n    order:\n      search: [b]\n      create: [a]\n",
        );
        let m = DisplayMeta::resolve(&n);
        assert_eq!(m.order_for(Mode::Search).unwrap(), &vec!["b".to_string()]);
        assert_eq!(m.order_for(Mode::Create).unwrap(), &vec!["a".to_string()]);
        assert!(m.order_for(Mode::Update).is_none());
    }

    #[test]
    fn choice_accepts_plain_strings() {
        let n = node("name: c\noptions: [red, blue]");
        let opts = n.options.unwrap();
        assert_eq!(opts[0], Choice::new("red", "red"));
    }

    #[test]
    fn empty_values() {
        assert!(value_is_empty(&JsonValue::Null));
        assert!(value_is_empty(&json!("")));
        assert!(value_is_empty(&json!([])));
        assert!(value_is_empty(&json!({})));
        assert!(!value_is_empty(&json!(0)));
        assert!(!value_is_empty(&json!(false)));
    }
}
