//! Two-tier name resolution (spec §4.1): project overlay, then builtin.
//!
//! Generalizes `agenticlaw-core::openclaw_config`'s "probe one fixed
//! path, fall back to default" idiom into two ordered tiers that both
//! get tried before failing.

use std::path::{Path, PathBuf};
use wfe_core::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Workflow,
    Agent,
    Prompt,
}

impl Kind {
    fn dir(self) -> &'static str {
        match self {
            Kind::Workflow => "workflows",
            Kind::Agent => "agents",
            Kind::Prompt => "prompts",
        }
    }

    fn ext(self) -> &'static str {
        match self {
            Kind::Workflow => ".yaml",
            Kind::Agent | Kind::Prompt => ".md",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kind::Workflow => "workflow",
            Kind::Agent => "agent",
            Kind::Prompt => "prompt",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Project,
    Builtin,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Project => "project",
            Source::Builtin => "builtin",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub source: Source,
}

#[derive(Clone, Debug)]
pub struct Resolver {
    project_root: PathBuf,
    plugin_root: PathBuf,
    scope: String,
}

impl Resolver {
    pub fn new(project_root: impl Into<PathBuf>, plugin_root: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            plugin_root: plugin_root.into(),
            scope: scope.into(),
        }
    }

    fn filename(kind: Kind, name: &str) -> String {
        if name.ends_with(kind.ext()) {
            name.to_string()
        } else {
            format!("{name}{}", kind.ext())
        }
    }

    fn project_path(&self, kind: Kind, name: &str) -> PathBuf {
        self.project_root
            .join(format!(".{}", self.scope))
            .join(kind.dir())
            .join(Self::filename(kind, name))
    }

    fn builtin_path(&self, kind: Kind, name: &str) -> PathBuf {
        self.plugin_root.join(kind.dir()).join(Self::filename(kind, name))
    }

    pub fn resolve(&self, kind: Kind, name: &str) -> Result<ResolvedPath> {
        if contains_traversal(name) {
            return Err(Error::PathEscapesWorkflowDir(PathBuf::from(name)));
        }

        let project = self.project_path(kind, name);
        if project.is_file() {
            return Ok(ResolvedPath {
                path: project,
                source: Source::Project,
            });
        }

        let builtin = self.builtin_path(kind, name);
        if builtin.is_file() {
            return Ok(ResolvedPath {
                path: builtin,
                source: Source::Builtin,
            });
        }

        Err(Error::not_found(
            kind.label(),
            name,
            vec![project.display().to_string(), builtin.display().to_string()],
        ))
    }
}

/// True if any path segment is `..` or a prototype-pollution-style name
/// (spec §9): `__proto__`, `prototype`, `constructor`.
pub fn contains_traversal(name: &str) -> bool {
    Path::new(name).components().any(|c| {
        matches!(
            c,
            std::path::Component::ParentDir
        ) || matches!(c, std::path::Component::Normal(seg) if is_unsafe_segment(seg.to_str().unwrap_or("")))
    })
}

fn is_unsafe_segment(segment: &str) -> bool {
    matches!(segment, "__proto__" | "prototype" | "constructor")
}

/// True if `candidate`, once joined under `base` and lexically
/// normalized, would resolve outside of `base`.
pub fn escapes_base(base: &Path, candidate: &str) -> bool {
    if contains_traversal(candidate) {
        return true;
    }
    let joined = base.join(candidate);
    let normalized = normalize(&joined);
    let base_normalized = normalize(base);
    !normalized.starts_with(&base_normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn project_tier_wins_over_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let project_root = tmp.path().join("project");
        let plugin_root = tmp.path().join("plugin");
        fs::create_dir_all(project_root.join(".wfe/workflows")).unwrap();
        fs::create_dir_all(plugin_root.join("workflows")).unwrap();
        fs::write(project_root.join(".wfe/workflows/review.yaml"), "project").unwrap();
        fs::write(plugin_root.join("workflows/review.yaml"), "builtin").unwrap();

        let resolver = Resolver::new(&project_root, &plugin_root, "wfe");
        let resolved = resolver.resolve(Kind::Workflow, "review").unwrap();
        assert_eq!(resolved.source, Source::Project);
        assert_eq!(fs::read_to_string(resolved.path).unwrap(), "project");
    }

    #[test]
    fn falls_back_to_builtin_tier() {
        let tmp = tempfile::tempdir().unwrap();
        let project_root = tmp.path().join("project");
        let plugin_root = tmp.path().join("plugin");
        fs::create_dir_all(plugin_root.join("agents")).unwrap();
        fs::write(plugin_root.join("agents/reviewer.md"), "name: reviewer\n---\nbody").unwrap();

        let resolver = Resolver::new(&project_root, &plugin_root, "wfe");
        let resolved = resolver.resolve(Kind::Agent, "reviewer").unwrap();
        assert_eq!(resolved.source, Source::Builtin);
    }

    #[test]
    fn not_found_lists_both_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(tmp.path().join("project"), tmp.path().join("plugin"), "wfe");
        let err = resolver.resolve(Kind::Prompt, "missing").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("project"));
        assert!(msg.contains("plugin"));
    }

    #[test]
    fn name_already_extended_is_not_re_extended() {
        assert_eq!(Resolver::filename(Kind::Workflow, "review.yaml"), "review.yaml");
        assert_eq!(Resolver::filename(Kind::Workflow, "review"), "review.yaml");
    }

    #[test]
    fn rejects_traversal_and_unsafe_segments() {
        assert!(contains_traversal("../../etc/passwd"));
        assert!(contains_traversal("__proto__/x"));
        assert!(!contains_traversal("reviewer"));
    }

    #[test]
    fn escapes_base_detects_normalized_escape() {
        let base = Path::new("/work/repo");
        assert!(escapes_base(base, "../../etc/x"));
        assert!(!escapes_base(base, "reviewer"));
    }
}
