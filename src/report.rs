//! Reports from markdown templates.
//!
//! ```text
//! markdown template ──render──► markdown ──pulldown-cmark──► naked html
//!        ──postprocessors──► content ──layout template──► html / docx
//! ```
//!
//! Templates see `ts`, the `meta`, `sql`, `tables` and `charts` namespaces and
//! the caller's parameters. The `as_template` filter renders a string as a
//! template with that same context, so `{{ snippet | as_template }}` works.
use anyhow::{bail, Context, Result};
use minijinja::{AutoEscape, Environment, State};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::frame::{Frame, Styler};
use crate::template::{self, Params};
use crate::ts::Ts;

pub type PostProcessor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Which postprocessors a single render applies.
#[derive(Clone, Default)]
pub enum PostSelection {
    /// Only the ones given to [`Report::new`].
    #[default]
    Configured,
    /// The configured ones followed by these.
    Extend(Vec<PostProcessor>),
    None,
}

/// A named collection that can be filled but not swapped out.
#[derive(Debug, Clone)]
pub struct Namespace<T> {
    items: BTreeMap<String, T>,
}

impl<T> Namespace<T> {
    fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Option<T> {
        self.items.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.items.remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.items.iter()
    }
}

/// A table of contents entry, nested by heading level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub id: String,
    pub name: String,
    pub children: Vec<TocEntry>,
}

/// Converted markdown.
#[derive(Debug, Clone)]
pub struct Converted {
    pub html: String,
    pub toc: Vec<TocEntry>,
}

pub struct Report {
    pub markdown_template: Option<String>,
    pub layout_template: Option<String>,
    post: Vec<PostProcessor>,
    styler: Styler,
    env: Environment<'static>,
    meta: Namespace<serde_json::Value>,
    sql: Namespace<String>,
    tables: Namespace<Frame>,
    charts: Namespace<serde_json::Value>,
}

impl Report {
    /// Templates are searched in `template_paths`, then the working directory.
    pub fn new(
        markdown_template: Option<&str>,
        layout_template: Option<&str>,
        template_paths: Vec<PathBuf>,
        post: Vec<PostProcessor>,
    ) -> Self {
        let mut env = template::environment(template_paths);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self {
            markdown_template: markdown_template.map(str::to_string),
            layout_template: layout_template.map(str::to_string),
            post,
            styler: Styler::default(),
            env,
            meta: Namespace::new(),
            sql: Namespace::new(),
            tables: Namespace::new(),
            charts: Namespace::new(),
        }
    }

    /// Like [`Report::new`], adding the configured `templates` folders after
    /// `template_paths` and using the configured table styler.
    pub fn from_config(
        config: &Config,
        markdown_template: Option<&str>,
        layout_template: Option<&str>,
        template_paths: Vec<PathBuf>,
    ) -> Result<Self> {
        let mut paths = template_paths;
        paths.extend(config.template_paths()?);
        let mut report = Self::new(markdown_template, layout_template, paths, vec![]);
        report.styler = config.report.styler.clone();
        Ok(report)
    }

    pub fn with_styler(mut self, styler: Styler) -> Self {
        self.styler = styler;
        self
    }

    pub fn meta(&mut self) -> &mut Namespace<serde_json::Value> {
        &mut self.meta
    }

    pub fn sql(&mut self) -> &mut Namespace<String> {
        &mut self.sql
    }

    pub fn tables(&mut self) -> &mut Namespace<Frame> {
        &mut self.tables
    }

    pub fn charts(&mut self) -> &mut Namespace<serde_json::Value> {
        &mut self.charts
    }

    fn context(&self, params: &Params) -> Result<serde_json::Value> {
        let tables: BTreeMap<&String, _> = self
            .tables
            .iter()
            .map(|(name, frame)| (name, frame.view(&self.styler)))
            .collect();
        let mut context = serde_json::Map::new();
        context.insert("ts".into(), serde_json::to_value(Ts::now())?);
        context.insert("meta".into(), serde_json::to_value(&self.meta.items)?);
        context.insert("sql".into(), serde_json::to_value(&self.sql.items)?);
        context.insert("tables".into(), serde_json::to_value(tables)?);
        context.insert("charts".into(), serde_json::to_value(&self.charts.items)?);
        for (key, value) in params {
            context.insert(key.clone(), value.clone());
        }
        Ok(serde_json::Value::Object(context))
    }

    /// The environment for one render, with `as_template` bound to `context`.
    fn env_for(&self, context: &serde_json::Value) -> Environment<'static> {
        let mut env = self.env.clone();
        let context = context.clone();
        env.add_filter(
            "as_template",
            move |state: &State, value: String| -> Result<String, minijinja::Error> {
                state.env().render_str(&value, &context)
            },
        );
        env
    }

    fn render(&self, name: &str, context: &serde_json::Value) -> Result<String> {
        let env = self.env_for(context);
        let template = env
            .get_template(name)
            .with_context(|| format!("Failed to load template: {}", name))?;
        template
            .render(context)
            .with_context(|| format!("Failed to render template: {}", name))
    }

    fn markdown_name<'a>(&'a self, name: Option<&'a str>) -> Result<&'a str> {
        match name.or(self.markdown_template.as_deref()) {
            Some(name) => Ok(name),
            None => bail!("No markdown template given"),
        }
    }

    pub fn rendered_markdown(&self, markdown_template: Option<&str>, params: &Params) -> Result<String> {
        let name = self.markdown_name(markdown_template)?;
        self.render(name, &self.context(params)?)
    }

    pub fn naked_html(&self, markdown_template: Option<&str>, params: &Params) -> Result<String> {
        let markdown = self.rendered_markdown(markdown_template, params)?;
        Ok(markdown_to_html(&markdown).html)
    }

    pub fn rendered_html(
        &self,
        markdown_template: Option<&str>,
        layout_template: Option<&str>,
        post: &PostSelection,
        params: &Params,
    ) -> Result<String> {
        let layout = match layout_template.or(self.layout_template.as_deref()) {
            Some(name) => name,
            None => bail!("No layout template given"),
        };
        let markdown = self.rendered_markdown(markdown_template, params)?;
        let converted = markdown_to_html(&markdown);

        let processors: Vec<&PostProcessor> = match post {
            PostSelection::Configured => self.post.iter().collect(),
            PostSelection::Extend(extra) => self.post.iter().chain(extra).collect(),
            PostSelection::None => vec![],
        };
        let content = processors
            .into_iter()
            .fold(converted.html, |html, process| process(&html));

        let mut context = self.context(params)?;
        if let serde_json::Value::Object(map) = &mut context {
            map.insert("content".into(), serde_json::Value::String(content));
            map.insert("toc".into(), serde_json::to_value(&converted.toc)?);
        }
        self.render(layout, &context)
    }

    pub fn to_html(
        &self,
        output_path: &Path,
        markdown_template: Option<&str>,
        layout_template: Option<&str>,
        post: &PostSelection,
        params: &Params,
    ) -> Result<()> {
        let html = self.rendered_html(markdown_template, layout_template, post, params)?;
        std::fs::write(output_path, html)
            .with_context(|| format!("Failed to write report: {}", output_path.display()))?;
        info!("Report written to {}", output_path.display());
        Ok(())
    }

    /// Render to HTML and convert it with `pandoc`.
    pub fn to_docx(
        &self,
        output_path: &Path,
        markdown_template: Option<&str>,
        layout_template: Option<&str>,
        post: &PostSelection,
        params: &Params,
    ) -> Result<()> {
        let temp_path = output_path.with_extension("temp.html");
        let html = self.rendered_html(markdown_template, layout_template, post, params)?;
        std::fs::write(&temp_path, html)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;

        let output = Command::new("pandoc")
            .arg(&temp_path)
            .arg("-o")
            .arg(output_path)
            .output();
        let _ = std::fs::remove_file(&temp_path);

        let output = output.context("Failed to run pandoc")?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("pandoc: {}", stderr.trim());
        }
        if !output.status.success() {
            bail!("pandoc exited with {}", output.status);
        }
        info!("Report written to {}", output_path.display());
        Ok(())
    }
}

/// Convert markdown with tables, footnotes, strikethrough and heading ids.
/// Headings without an explicit `{#id}` get a slug of their text.
pub fn markdown_to_html(markdown: &str) -> Converted {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_HEADING_ATTRIBUTES;
    let mut events: Vec<Event> = Parser::new_ext(markdown, options).collect();

    let mut headings = Vec::new();
    let mut used: HashSet<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::Start(Tag::Heading { id: Some(id), .. }) => Some(id.to_string()),
            _ => None,
        })
        .collect();
    let mut i = 0;
    while i < events.len() {
        let heading = match &events[i] {
            Event::Start(Tag::Heading { level, id, .. }) => Some((*level as u8, id.clone())),
            _ => None,
        };
        if let Some((level, explicit)) = heading {
            let end = events[i..]
                .iter()
                .position(|e| matches!(e, Event::End(TagEnd::Heading(_))))
                .map(|p| i + p)
                .unwrap_or(events.len());
            let title: String = events[i + 1..end]
                .iter()
                .filter_map(|e| match e {
                    Event::Text(t) | Event::Code(t) => Some(&**t),
                    _ => None,
                })
                .collect();
            let anchor = match explicit {
                Some(id) => id.to_string(),
                None => unique_slug(&title, &mut used),
            };
            if let Event::Start(Tag::Heading { id, .. }) = &mut events[i] {
                *id = Some(CowStr::from(anchor.clone()));
            }
            headings.push((level, anchor, title));
            i = end;
        }
        i += 1;
    }

    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    Converted {
        html: out,
        toc: nest(&headings),
    }
}

/// Lowercase, drop punctuation, join words with `-`.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn unique_slug(text: &str, used: &mut HashSet<String>) -> String {
    let base = slugify(text);
    let mut slug = base.clone();
    let mut n = 1;
    while !used.insert(slug.clone()) {
        slug = format!("{}_{}", base, n);
        n += 1;
    }
    slug
}

fn nest(headings: &[(u8, String, String)]) -> Vec<TocEntry> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < headings.len() {
        let (level, id, name) = &headings[i];
        let mut j = i + 1;
        while j < headings.len() && headings[j].0 > *level {
            j += 1;
        }
        out.push(TocEntry {
            level: *level,
            id: id.clone(),
            name: name.clone(),
            children: nest(&headings[i + 1..j]),
        });
        i = j;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::students;
    use crate::params;

    fn report_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("report.md"),
            "# Results {{ meta.title }}\n\n\
             {{ tables.students.markdown }}\n\n\
             {{ snippet | as_template }}\n\n\
             ## Details\n\n~~old~~ text\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("layout.html"),
            "<main>{{ content }}</main>\n<nav>{% for h in toc %}{{ h.id }}:{{ h.children | length }}{% endfor %}</nav>",
        )
        .unwrap();
        dir
    }

    fn report(dir: &Path, post: Vec<PostProcessor>) -> Report {
        let mut report = Report::new(
            Some("report.md"),
            Some("layout.html"),
            vec![dir.to_path_buf()],
            post,
        );
        report.meta().insert("title", serde_json::json!("Q1"));
        report.tables().insert("students", students());
        report
    }

    #[test]
    fn test_rendered_markdown_uses_namespaces() {
        let dir = report_dir();
        let report = report(dir.path(), vec![]);
        let params = params! { "snippet" => "rows: {{ tables.students.n_rows }}" };
        let markdown = report.rendered_markdown(None, &params).unwrap();
        assert!(markdown.starts_with("# Results Q1"));
        assert!(markdown.contains("rows: 4"));
        assert!(markdown.contains("| Alice"));
    }

    #[test]
    fn test_rendered_html_with_layout_and_toc() {
        let dir = report_dir();
        let report = report(dir.path(), vec![]);
        let params = params! { "snippet" => "" };
        let html = report
            .rendered_html(None, None, &PostSelection::Configured, &params)
            .unwrap();
        assert!(html.starts_with("<main><h1 id=\"results-q1\">Results Q1</h1>"));
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
        assert!(html.ends_with("<nav>results-q1:1</nav>"));
    }

    #[test]
    fn test_postprocessors() {
        let dir = report_dir();
        let shout: PostProcessor = Arc::new(|html: &str| html.replace("Results", "RESULTS"));
        let report = report(dir.path(), vec![shout]);
        let params = params! { "snippet" => "" };

        let html = report
            .rendered_html(None, None, &PostSelection::Configured, &params)
            .unwrap();
        assert!(html.contains(">RESULTS Q1<"));

        let extra: PostProcessor = Arc::new(|html: &str| html.replace("Q1", "Q2"));
        let html = report
            .rendered_html(None, None, &PostSelection::Extend(vec![extra]), &params)
            .unwrap();
        assert!(html.contains(">RESULTS Q2<"));

        let html = report
            .rendered_html(None, None, &PostSelection::None, &params)
            .unwrap();
        assert!(html.contains(">Results Q1<"));
    }

    #[test]
    fn test_to_html_writes_file() {
        let dir = report_dir();
        let report = report(dir.path(), vec![]);
        let out = dir.path().join("out.html");
        report
            .to_html(&out, None, None, &PostSelection::None, &params! { "snippet" => "" })
            .unwrap();
        assert!(std::fs::read_to_string(out).unwrap().contains("<main>"));
    }

    #[test]
    fn test_missing_template_name() {
        let report = Report::new(None, None, vec![], vec![]);
        assert!(report.rendered_markdown(None, &Params::new()).is_err());
    }

    #[test]
    fn test_markdown_headings() {
        let converted = markdown_to_html("# A b\n\n## C\n\n## C\n\n# Own {#custom}\n");
        assert!(converted.html.contains("<h2 id=\"c_1\">C</h2>"));
        assert!(converted.html.contains("<h1 id=\"custom\">Own</h1>"));
        assert_eq!(converted.toc.len(), 2);
        assert_eq!(converted.toc[0].id, "a-b");
        assert_eq!(converted.toc[0].children.len(), 2);
        assert_eq!(converted.toc[1].level, 1);
    }

    #[test]
    fn test_slugs_avoid_explicit_ids() {
        let converted = markdown_to_html("# Intro\n\n## Summary {#intro}\n\n# Intro\n");
        assert!(converted.html.contains("<h1 id=\"intro_1\">Intro</h1>"));
        assert!(converted.html.contains("<h2 id=\"intro\">Summary</h2>"));
        assert!(converted.html.contains("<h1 id=\"intro_2\">Intro</h1>"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Multi   space_ok "), "multi-space_ok");
    }
}
