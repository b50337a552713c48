//! Per-resource-type cache layout.
//!
//! The delta synchronizer knows nothing about entity shapes; for each
//! resource type it asks a [`CacheableResource`] where the list and the
//! detail entries live, how to find an entity in a list, and how the list
//! is ordered.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::url::{resource_url, scoped_path, Params};

pub trait CacheableResource: Send + Sync {
    /// Resource name as it appears in a delta's `resources`.
    fn name(&self) -> &str;

    /// Cache key of the list containing `element`.
    fn list_url(&self, element: &Value) -> Result<String>;

    /// Cache key of `element`'s detail entry.
    fn element_url(&self, element: &Value) -> Result<String>;

    /// Position of the entity with `element`'s identity in `list`, if any.
    fn find_index_in_list(&self, list: &[Value], element: &Value) -> Option<usize>;

    /// Restore the list's canonical order.
    fn sort(&self, list: &mut [Value]);
}

/// How a resource is declared in configuration: `name[:[-]sortField]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub sort_by: Option<String>,
    pub descending: bool,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sort_by: None,
            descending: false,
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.descending = descending;
        self
    }

    /// Parse a comma-separated list, e.g. `customers:name,activities:-updatedAt`.
    pub fn parse_list(input: &str) -> Result<Vec<ResourceSpec>> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn parse(input: &str) -> Result<ResourceSpec> {
        let (name, sort) = match input.split_once(':') {
            Some((name, sort)) => (name.trim(), Some(sort.trim())),
            None => (input.trim(), None),
        };
        if name.is_empty() || name.contains('/') {
            return Err(Error::Config(format!("invalid resource name: '{input}'")));
        }
        let spec = ResourceSpec::new(name);
        match sort {
            None => Ok(spec),
            Some(field) => {
                let (field, descending) = match field.strip_prefix('-') {
                    Some(rest) => (rest, true),
                    None => (field, false),
                };
                if field.is_empty() {
                    return Err(Error::Config(format!("missing sort field in '{input}'")));
                }
                Ok(spec.sorted_by(field, descending))
            }
        }
    }
}

/// JSON entity addressed by an `id` field under `{base}/[teams/{team}/]{name}`.
pub struct JsonResource {
    name: String,
    base: String,
    path: String,
    id_field: String,
    sort_by: Option<String>,
    descending: bool,
}

impl JsonResource {
    pub fn new(base: impl Into<String>, team_id: Option<&str>, spec: &ResourceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            base: base.into(),
            path: scoped_path(team_id, &spec.name),
            id_field: "id".to_string(),
            sort_by: spec.sort_by.clone(),
            descending: spec.descending,
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    fn id_of(&self, element: &Value) -> Option<String> {
        match element.get(&self.id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(number_id(n)),
            _ => None,
        }
    }
}

/// Integral floats render like integers, so `1.0` and `1` are the same id.
fn number_id(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

impl CacheableResource for JsonResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_url(&self, _element: &Value) -> Result<String> {
        resource_url(&self.base, &self.path, None, &Params::new())
    }

    fn element_url(&self, element: &Value) -> Result<String> {
        let id = self.id_of(element).ok_or_else(|| Error::InvalidRecord {
            resource: self.name.clone(),
            message: format!("missing '{}' field", self.id_field),
        })?;
        resource_url(&self.base, &self.path, Some(&id), &Params::new())
    }

    fn find_index_in_list(&self, list: &[Value], element: &Value) -> Option<usize> {
        let id = self.id_of(element)?;
        list.iter()
            .position(|item| self.id_of(item).as_deref() == Some(id.as_str()))
    }

    fn sort(&self, list: &mut [Value]) {
        let field = self.sort_by.as_deref().unwrap_or(&self.id_field);
        list.sort_by(|a, b| {
            let ord = compare_json(a.get(field), b.get(field));
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

/// Total order over optional JSON scalars: numbers, then strings, then
/// booleans, then everything else; missing/null values sort last.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            Some(Value::Number(_)) => 0,
            Some(Value::String(_)) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
            Some(Value::Null) | None => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Resource descriptors keyed by name.
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<dyn CacheableResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`JsonResource`] per [`ResourceSpec`], all under `base` and the optional tenant scope.
    pub fn from_specs(base: &str, team_id: Option<&str>, specs: &[ResourceSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(Arc::new(JsonResource::new(base, team_id, spec)));
        }
        registry
    }

    pub fn register(&mut self, resource: Arc<dyn CacheableResource>) {
        self.resources.insert(resource.name().to_string(), resource);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CacheableResource>> {
        self.resources.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
