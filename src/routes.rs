use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::RefreshConfig;

/// File stem that marks a directory as a route.
const PAGE_STEM: &str = "page";

/// Extensions a page file may carry.
const PAGE_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mdx"];

/// Outcome of resolving a request path against the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteLookup {
    Found { file: PathBuf },
    NotFound,
}

/// Routes discovered under the app directory, keyed by URL path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteTable {
    pub routes: BTreeMap<String, PathBuf>,
}

impl RouteTable {
    /// Walk `<root>/<config.app_dir>` and collect every directory holding a page file.
    ///
    /// Respects `.gitignore` rules, always excludes `node_modules`, and applies any
    /// additional exclusions from `config.exclude`. A missing app directory yields
    /// an empty table.
    pub fn build(root: &Path, config: &RefreshConfig) -> anyhow::Result<Self> {
        let app_dir = root.join(&config.app_dir);
        let mut table = Self::default();
        if !app_dir.is_dir() {
            tracing::debug!(app_dir = %app_dir.display(), "no app directory");
            return Ok(table);
        }

        let walker = ignore::WalkBuilder::new(&app_dir)
            .standard_filters(true)
            // Read .gitignore files even when the directory is not inside a git repository.
            .require_git(false)
            .build();

        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(%err, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(true) {
                continue;
            }
            if path_contains_node_modules(path) || config.is_excluded(path) {
                continue;
            }
            if !is_page_file(path) {
                continue;
            }

            let Some(dir) = path.parent() else { continue };
            let Ok(relative) = dir.strip_prefix(&app_dir) else {
                continue;
            };
            table
                .routes
                .insert(route_for(relative), path.to_path_buf());
        }

        Ok(table)
    }

    /// Resolve a request path. Query strings, fragments and trailing slashes are ignored.
    pub fn resolve(&self, request_path: &str) -> RouteLookup {
        match self.routes.get(&normalize(request_path)) {
            Some(file) => RouteLookup::Found { file: file.clone() },
            None => RouteLookup::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Normalize a request path to the form used as a table key: leading slash,
/// no trailing slash, no query or fragment.
pub fn normalize(request_path: &str) -> String {
    let path = request_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    format!("/{path}")
}

/// Build the URL path for a directory relative to the app root. Route groups
/// (`(marketing)`) do not contribute a segment.
fn route_for(relative: &Path) -> String {
    let segments: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .filter(|s| !(s.starts_with('(') && s.ends_with(')')))
        .collect();
    format!("/{}", segments.join("/"))
}

fn is_page_file(path: &Path) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str());
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    stem == Some(PAGE_STEM) && PAGE_EXTENSIONS.contains(&ext)
}

/// Returns true if any component of `path` is named `node_modules`.
fn path_contains_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_str() == Some("node_modules"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn page(root: &Path, dir: &str) {
        let d = root.join("app").join(dir);
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("page.tsx"), "export default function Page() {}").unwrap();
    }

    #[test]
    fn test_build_discovers_nested_routes() {
        let dir = tmp();
        page(dir.path(), "");
        page(dir.path(), "folder");
        page(dir.path(), "blog/post");
        fs::write(dir.path().join("app").join("layout.tsx"), "").unwrap();

        let table = RouteTable::build(dir.path(), &RefreshConfig::default()).unwrap();
        let keys: Vec<&str> = table.routes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["/", "/blog/post", "/folder"]);
    }

    #[test]
    fn test_route_groups_are_transparent() {
        let dir = tmp();
        page(dir.path(), "(marketing)/about");
        let table = RouteTable::build(dir.path(), &RefreshConfig::default()).unwrap();
        assert!(matches!(table.resolve("/about"), RouteLookup::Found { .. }));
    }

    #[test]
    fn test_resolve_normalizes_request_path() {
        let dir = tmp();
        page(dir.path(), "folder");
        let table = RouteTable::build(dir.path(), &RefreshConfig::default()).unwrap();
        assert!(matches!(table.resolve("/folder/"), RouteLookup::Found { .. }));
        assert!(matches!(table.resolve("/folder?x=1"), RouteLookup::Found { .. }));
        assert_eq!(table.resolve("/does-not-exist"), RouteLookup::NotFound);
    }

    #[test]
    fn test_rename_moves_route() {
        let dir = tmp();
        page(dir.path(), "folder");
        let app = dir.path().join("app");
        fs::rename(app.join("folder"), app.join("renamed-folder")).unwrap();

        let table = RouteTable::build(dir.path(), &RefreshConfig::default()).unwrap();
        assert_eq!(table.resolve("/folder"), RouteLookup::NotFound);
        assert!(matches!(
            table.resolve("/renamed-folder"),
            RouteLookup::Found { .. }
        ));
    }

    #[test]
    fn test_missing_app_dir_is_empty() {
        let dir = tmp();
        let table = RouteTable::build(dir.path(), &RefreshConfig::default()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_excludes_apply() {
        let dir = tmp();
        page(dir.path(), "drafts/one");
        page(dir.path(), "live");
        let config = RefreshConfig {
            exclude: Some(vec!["drafts".to_string()]),
            ..Default::default()
        };
        let table = RouteTable::build(dir.path(), &config).unwrap();
        assert_eq!(table.len(), 1);
    }
}
