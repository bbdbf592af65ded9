use crate::schema::{Mode, SchemaNode};
use crate::services::bus::EventBus;
use crate::widgets::scalar::{InputKind, ScalarField};
use crate::widgets::FieldWidget;
use anyhow::{bail, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::rc::Rc;

/// Everything a widget builder receives. Builders take ownership; the
/// props carry the schema node, the display inputs and the shared
/// services so custom widgets need no other wiring.
pub struct FieldProps {
    pub node: SchemaNode,
    pub name: String,
    pub label: Option<String>,
    pub mode: Mode,
    pub value: Option<JsonValue>,
    pub validate: bool,
    pub return_all: bool,
    pub fields: Option<Vec<String>>,
    pub size: Option<u16>,
    pub custom: serde_json::Map<String, JsonValue>,
    pub bus: EventBus,
    pub registries: Rc<Registries>,
}

impl FieldProps {
    pub fn new(node: SchemaNode, mode: Mode, bus: EventBus, registries: Rc<Registries>) -> Self {
        let name = node.name.clone();
        Self {
            node,
            name,
            label: None,
            mode,
            value: None,
            validate: true,
            return_all: false,
            fields: None,
            size: None,
            custom: serde_json::Map::new(),
            bus,
            registries,
        }
    }
}

pub type Builder = Box<dyn Fn(FieldProps) -> Result<Box<dyn FieldWidget>>>;

/// Named widget lookup table. Unknown tags are a hard error so a typo in
/// display metadata fails at build time rather than rendering nothing.
pub struct Registry {
    name: &'static str,
    map: HashMap<String, Builder>,
}

impl Registry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            map: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, builder: Builder) {
        self.map.insert(tag.into(), builder);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.map.contains_key(tag)
    }

    pub fn create(&self, tag: &str, mut props: FieldProps) -> Result<Box<dyn FieldWidget>> {
        let Some(builder) = self.map.get(tag) else {
            bail!("no '{}' widget registered as {}", tag, self.name);
        };
        // Explicit null means "no initial value".
        if props.value == Some(JsonValue::Null) {
            props.value = None;
        }
        builder(props)
    }
}

/// The three widget registries, one per structural class. Scalar ships
/// fully populated, list and map ship one generic component each;
/// applications register richer ones.
pub struct Registries {
    pub scalar: Registry,
    pub list: Registry,
    pub map: Registry,
}

fn scalar_builtin(kind: InputKind) -> Builder {
    Box::new(move |props| {
        let w = ScalarField::with_kind(kind, props)?;
        Ok(Box::new(w) as Box<dyn FieldWidget>)
    })
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            scalar: Registry::new("scalar"),
            list: Registry::new("list"),
            map: Registry::new("map"),
        }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        for kind in [
            InputKind::Text,
            InputKind::TextArea,
            InputKind::Password,
            InputKind::Number { integer: false },
            InputKind::Number { integer: true },
            InputKind::Checkbox,
            InputKind::Date,
            InputKind::DateTime,
            InputKind::Time,
            InputKind::Price,
            InputKind::Hidden,
            InputKind::Select,
            InputKind::MultiSelect,
        ] {
            r.scalar.register(kind.tag(), scalar_builtin(kind));
        }
        r.list.register(
            "list",
            Box::new(|props| {
                let w = crate::widgets::list::ListField::new(props)?;
                Ok(Box::new(w) as Box<dyn FieldWidget>)
            }),
        );
        r.map.register(
            "json",
            Box::new(|props| {
                let w = crate::widgets::map::JsonMapField::new(props)?;
                Ok(Box::new(w) as Box<dyn FieldWidget>)
            }),
        );
        r
    }

    pub fn shared() -> Rc<Self> {
        Rc::new(Self::with_builtins())
    }
}
