//! SQL definitions as templates.
//!
//! Query text is rendered with `minijinja`. Named templates are searched in
//! the configured `queries` folders, then the working directory, then the
//! built-in templates (`base/select.sql`, `base/aggregate.sql`, ...), so
//! project templates can `{% extends %}` the built-in ones.
mod filters;
mod loader;

pub use filters::ident;
pub use loader::{builtin, search_loader, BUILTIN_TEMPLATES};

use anyhow::{Context, Result};
use minijinja::{Environment, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::ts::Ts;

/// Named template parameters.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Rendered SQL, ready to send to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlText(pub String);

impl SqlText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to render: already rendered SQL, a template name or template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Sql(SqlText),
    Text(String),
}

impl From<SqlText> for QuerySource {
    fn from(sql: SqlText) -> Self {
        QuerySource::Sql(sql)
    }
}

impl From<&str> for QuerySource {
    fn from(text: &str) -> Self {
        QuerySource::Text(text.to_string())
    }
}

impl From<String> for QuerySource {
    fn from(text: String) -> Self {
        QuerySource::Text(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlOptions {
    pub print_output: bool,
    pub print_variables: bool,
    pub save_to: Option<PathBuf>,
}

/// A single line that does not start with `select ` names a template file.
pub fn is_template_name(text: &str) -> bool {
    !text.contains('\n') && !text.trim_start().to_lowercase().starts_with("select ")
}

/// Build an environment that loads templates from `search_paths`, the
/// current directory and the built-in templates, in that order.
pub fn environment(search_paths: Vec<PathBuf>) -> Environment<'static> {
    let mut paths = search_paths;
    paths.push(PathBuf::from("."));
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_loader(search_loader(paths));
    env.add_global("ts", Value::from_serialize(Ts::now()));
    filters::register(&mut env);
    env
}

pub struct SqlEngine {
    env: Environment<'static>,
}

impl SqlEngine {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            env: environment(search_paths),
        }
    }

    /// Engine searching the configured `queries` folders.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.query_paths()?))
    }

    pub fn env(&self) -> &Environment<'static> {
        &self.env
    }

    pub fn get_sql(
        &self,
        source: impl Into<QuerySource>,
        params: &Params,
        options: &SqlOptions,
    ) -> Result<SqlText> {
        let text = match source.into() {
            QuerySource::Sql(sql) => return Ok(sql),
            QuerySource::Text(text) => text,
        };

        let rendered = if is_template_name(&text) {
            let name = template_file_name(&text);
            debug!("Rendering template {}", name);
            let template = self
                .env
                .get_template(&name)
                .with_context(|| format!("Failed to load template: {}", name))?;
            if options.print_variables {
                info!("Variables: {:?}", sorted(template.undeclared_variables(false)));
            }
            template
                .render(params)
                .with_context(|| format!("Failed to render template: {}", name))?
        } else {
            let template = self
                .env
                .template_from_str(&text)
                .context("Invalid SQL template")?;
            if options.print_variables {
                info!("Variables: {:?}", sorted(template.undeclared_variables(false)));
            }
            template.render(params).context("Failed to render SQL")?
        };
        let sql = SqlText(rendered);

        if options.print_output {
            info!("\n{}", sql);
        }
        if let Some(path) = &options.save_to {
            std::fs::write(path, sql.as_str())
                .with_context(|| format!("Failed to save SQL to {}", path.display()))?;
        }
        Ok(sql)
    }

    /// Parameters a template references but does not define itself.
    pub fn undeclared_variables(&self, source: &str) -> Result<BTreeSet<String>> {
        let variables = if is_template_name(source) {
            let name = template_file_name(source);
            self.env
                .get_template(&name)
                .with_context(|| format!("Failed to load template: {}", name))?
                .undeclared_variables(false)
        } else {
            self.env
                .template_from_str(source)
                .context("Invalid SQL template")?
                .undeclared_variables(false)
        };
        let mut variables = sorted(variables);
        variables.remove("ts");
        Ok(variables)
    }
}

/// `reference/table` -> `reference/table.sql`; any other extension is
/// replaced.
fn template_file_name(name: &str) -> String {
    Path::new(name.trim())
        .with_extension("sql")
        .to_string_lossy()
        .into_owned()
}

fn sorted(variables: std::collections::HashSet<String>) -> BTreeSet<String> {
    variables.into_iter().collect()
}

/// Build a [`Params`] map from `key => value` pairs.
#[macro_export]
macro_rules! params {
    () => { $crate::template::Params::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::template::Params::new();
        $( params.insert($key.to_string(), ::serde_json::json!($value)); )+
        params
    }};
}
