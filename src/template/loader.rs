use minijinja::{Error, ErrorKind};
use std::path::{Path, PathBuf};

/// Templates shipped with the crate, looked up after every search path.
pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("macros/aggregate.sql", include_str!("sql/macros/aggregate.sql")),
    ("base/select.sql", include_str!("sql/base/select.sql")),
    ("base/aggregate.sql", include_str!("sql/base/aggregate.sql")),
    ("reference/all_tables.sql", include_str!("sql/reference/all_tables.sql")),
    ("reference/all_columns.sql", include_str!("sql/reference/all_columns.sql")),
    ("reference/table.sql", include_str!("sql/reference/table.sql")),
    ("sanity/last_mutation.sql", include_str!("sql/sanity/last_mutation.sql")),
];

pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN_TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, source)| *source)
}

/// Join `name` onto `dir`, refusing names that climb out of it.
fn safe_join(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut path = dir.to_path_buf();
    for segment in name.split('/') {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

/// A loader that tries each directory in order, then the built-in templates.
pub fn search_loader(
    paths: Vec<PathBuf>,
) -> impl Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static {
    move |name| {
        for dir in &paths {
            let Some(path) = safe_join(dir, name) else {
                return Ok(None);
            };
            if path.is_file() {
                return std::fs::read_to_string(&path).map(Some).map_err(|err| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("could not read template {}", path.display()),
                    )
                    .with_source(err)
                });
            }
        }
        Ok(builtin(name).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        assert!(builtin("base/select.sql").is_some());
        assert!(builtin("base/missing.sql").is_none());
    }

    #[test]
    fn test_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.sql"), "first").unwrap();
        std::fs::write(second.path().join("a.sql"), "second").unwrap();
        std::fs::write(second.path().join("b.sql"), "only second").unwrap();

        let loader = search_loader(vec![first.path().into(), second.path().into()]);
        assert_eq!(loader("a.sql").unwrap().as_deref(), Some("first"));
        assert_eq!(loader("b.sql").unwrap().as_deref(), Some("only second"));
        assert!(loader("c.sql").unwrap().is_none());
    }

    #[test]
    fn test_local_template_shadows_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("base")).unwrap();
        std::fs::write(dir.path().join("base/select.sql"), "custom").unwrap();
        let loader = search_loader(vec![dir.path().into()]);
        assert_eq!(loader("base/select.sql").unwrap().as_deref(), Some("custom"));
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let loader = search_loader(vec![dir.path().into()]);
        assert!(loader("../etc/passwd").unwrap().is_none());
    }
}
