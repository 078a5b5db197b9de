//! Template rendering with secret lookups
//!
//! Documents are Tera templates. Plain `{{ NAME }}` interpolates a variable
//! binding; `op` looks up a secret reference, either as a function
//! (`{{ op('op://vault/item/field') }}`) or as a filter on a variable that
//! holds a reference (`{{ DB_PASSWORD_REF | op }}`).
//!
//! Tera functions are synchronous while secret lookups are not, so rendering
//! runs in passes. A pass renders with the secrets known so far and stops at
//! the first reference it cannot answer; that reference is resolved through
//! the async [`SecretLookup`] and the template is rendered again. Nothing
//! after an unanswered reference is evaluated, so a branch that depends on a
//! secret is only taken once the secret is known, and references resolve in
//! the order they are first encountered. A template with N distinct
//! references renders at most N + 1 times.

use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};
use tera::{Context, Tera, Value};
use tracing::debug;

/// Name of the secret lookup function and filter
pub const LOOKUP_NAME: &str = "op";

const TEMPLATE_NAME: &str = "config.toml";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").expect("tag regex is valid"));

static POSITIONAL_LOOKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bop\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#).expect("lookup regex is valid")
});

/// Async capability used by the renderer to turn a secret reference into a value
#[async_trait]
pub trait SecretLookup: Send + Sync {
    /// Resolve one secret reference
    async fn lookup(&self, path: &str) -> Result<String>;
}

/// Variables available to `{{ NAME }}` interpolation
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VariableBindings {
    vars: BTreeMap<String, String>,
}

impl VariableBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the process environment. Non-UTF-8 entries are skipped.
    pub fn from_process_env() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Apply overrides on top; overrides win on key collision
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in overrides {
            self.vars.insert(key.into(), value.into());
        }
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn to_context(&self) -> Context {
        let mut context = Context::new();
        for (key, value) in &self.vars {
            context.insert(key.as_str(), value);
        }
        context
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new().with_overrides(iter)
    }
}

impl IntoIterator for VariableBindings {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

// Environment values can be credentials; only names are printed.
impl fmt::Debug for VariableBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableBindings")
            .field("names", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Secret values known to one render pass, plus the reference that stopped it
#[derive(Clone)]
struct PassTable {
    known: Arc<HashMap<String, String>>,
    pending: Arc<Mutex<Option<String>>>,
}

impl PassTable {
    fn new(known: HashMap<String, String>) -> Self {
        Self {
            known: Arc::new(known),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Answer a known reference, or fail the pass on the first unknown one
    fn lookup(&self, path: &str) -> tera::Result<Value> {
        if let Some(value) = self.known.get(path) {
            return Ok(Value::String(value.clone()));
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| tera::Error::msg("secret lookup table is poisoned"))?;
        pending.get_or_insert_with(|| path.to_string());
        Err(tera::Error::msg(format!(
            "secret '{}' is not resolved yet",
            path
        )))
    }

    fn take_pending(&self) -> Option<String> {
        self.pending
            .lock()
            .map(|mut pending| pending.take())
            .unwrap_or_default()
    }
}

/// Renders configuration templates against variable bindings and secrets
#[derive(Debug, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a raw document.
    ///
    /// Each secret reference the final render uses is passed to `lookup`
    /// exactly once; references the final render does not reach are never
    /// looked up.
    pub async fn render(
        &self,
        raw: &str,
        bindings: &VariableBindings,
        lookup: &dyn SecretLookup,
    ) -> Result<String> {
        let source = normalize_lookup_calls(raw);
        let context = bindings.to_context();

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TEMPLATE_NAME, &source)
            .map_err(|e| Error::template(describe(&e)))?;

        let mut known: HashMap<String, String> = HashMap::new();

        // Every pass that stops adds one reference to `known`, so the loop
        // ends after at most one pass per distinct reference plus a final one.
        let mut passes = 1usize;
        loop {
            let table = PassTable::new(known.clone());
            register_lookup(&mut tera, &table);

            let rendered = tera.render(TEMPLATE_NAME, &context);
            let Some(path) = table.take_pending() else {
                return match rendered {
                    Ok(rendered) => {
                        debug!(passes, secrets = known.len(), "Rendered configuration template");
                        Ok(rendered)
                    }
                    Err(e) => Err(Error::template(describe(&e))),
                };
            };

            debug!("Resolving secret reference: {}", path);
            let value = lookup.lookup(&path).await?;
            known.insert(path, value);
            passes += 1;
        }
    }
}

fn register_lookup(tera: &mut Tera, table: &PassTable) {
    let function_table = table.clone();
    tera.register_function(LOOKUP_NAME, move |args: &HashMap<String, Value>| {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("op() expects a secret reference string"))?;
        function_table.lookup(path)
    });

    let filter_table = table.clone();
    tera.register_filter(
        LOOKUP_NAME,
        move |value: &Value, _args: &HashMap<String, Value>| {
            let path = value
                .as_str()
                .ok_or_else(|| tera::Error::msg("the op filter expects a secret reference string"))?;
            filter_table.lookup(path)
        },
    );
}

/// Rewrite `op('path')` into Tera's keyword form `op(path='path')`, inside tags only
fn normalize_lookup_calls(source: &str) -> Cow<'_, str> {
    TAG_RE.replace_all(source, |tag: &Captures| {
        POSITIONAL_LOOKUP_RE
            .replace_all(&tag[0], |call: &Captures| match (call.get(1), call.get(2)) {
                (Some(single), _) => format!("{}(path='{}')", LOOKUP_NAME, single.as_str()),
                (_, Some(double)) => format!("{}(path=\"{}\")", LOOKUP_NAME, double.as_str()),
                _ => call[0].to_string(),
            })
            .into_owned()
    })
}

/// Tera keeps the useful detail in the error source chain
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
