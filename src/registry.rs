use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::SyncError;

/// The closed set of distributable component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Language,
    Framework,
    Workflow,
    Template,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Language,
        ComponentKind::Framework,
        ComponentKind::Workflow,
        ComponentKind::Template,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Language => "language",
            ComponentKind::Framework => "framework",
            ComponentKind::Workflow => "workflow",
            ComponentKind::Template => "template",
        }
    }

    /// Resolves a kind from its name, plural or short alias.
    pub fn parse(input: &str) -> Option<ComponentKind> {
        match input.to_ascii_lowercase().as_str() {
            "language" | "languages" | "lang" => Some(ComponentKind::Language),
            "framework" | "frameworks" | "fw" => Some(ComponentKind::Framework),
            "workflow" | "workflows" | "wf" => Some(ComponentKind::Workflow),
            "template" | "templates" | "tpl" => Some(ComponentKind::Template),
            _ => None,
        }
    }

    /// Templates are project scaffolding: written once by `init`, then owned
    /// by the project. They never enter the installed-components record.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, ComponentKind::Template)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::parse(s).ok_or_else(|| SyncError::UnknownKind(s.to_string()))
    }
}

/// Identity of a component, as persisted in the project config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub name: String,
}

impl ComponentId {
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// An addressable distributable unit: one file or one directory tree.
///
/// `source` is relative to the root of a fetched version, `dest` relative to
/// the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub kind: ComponentKind,
    pub name: String,
    pub source: PathBuf,
    pub dest: PathBuf,
}

impl Component {
    pub fn new(
        kind: ComponentKind,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            source: source.into(),
            dest: dest.into(),
        }
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(self.kind, self.name.clone())
    }

    /// True when `path` (project-relative) is this component's destination
    /// or lies beneath it.
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.dest)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// (kind, name, source path in the upstream tree, destination in the project)
const CATALOG: &[(ComponentKind, &str, &str, &str)] = &[
    (ComponentKind::Language, "go", "language-guides/go.md", ".claude/language-guides/go.md"),
    (ComponentKind::Language, "python", "language-guides/python.md", ".claude/language-guides/python.md"),
    (ComponentKind::Language, "rust", "language-guides/rust.md", ".claude/language-guides/rust.md"),
    (ComponentKind::Language, "typescript", "language-guides/typescript.md", ".claude/language-guides/typescript.md"),
    (ComponentKind::Language, "javascript", "language-guides/javascript.md", ".claude/language-guides/javascript.md"),
    (ComponentKind::Language, "java", "language-guides/java.md", ".claude/language-guides/java.md"),
    (ComponentKind::Framework, "react", "framework-guides/react.md", ".claude/framework-guides/react.md"),
    (ComponentKind::Framework, "nextjs", "framework-guides/nextjs.md", ".claude/framework-guides/nextjs.md"),
    (ComponentKind::Framework, "django", "framework-guides/django.md", ".claude/framework-guides/django.md"),
    (ComponentKind::Framework, "fastapi", "framework-guides/fastapi.md", ".claude/framework-guides/fastapi.md"),
    (ComponentKind::Workflow, "code-review", "workflows/code-review.md", ".claude/workflows/code-review.md"),
    (ComponentKind::Workflow, "testing", "workflows/testing.md", ".claude/workflows/testing.md"),
    (ComponentKind::Workflow, "debugging", "workflows/debugging.md", ".claude/workflows/debugging.md"),
    (ComponentKind::Workflow, "git-commit", "workflows/git-commit.md", ".claude/workflows/git-commit.md"),
    (ComponentKind::Workflow, "hooks", "workflows/hooks", ".claude/hooks"),
    (ComponentKind::Template, "claude-md", "templates/CLAUDE.md", "CLAUDE.md"),
    (ComponentKind::Template, "settings", "templates/settings.json", ".claude/settings.json"),
];

const NAME_ALIASES: &[(ComponentKind, &str, &str)] = &[
    (ComponentKind::Language, "golang", "go"),
    (ComponentKind::Language, "py", "python"),
    (ComponentKind::Language, "rs", "rust"),
    (ComponentKind::Language, "ts", "typescript"),
    (ComponentKind::Language, "js", "javascript"),
    (ComponentKind::Framework, "next", "nextjs"),
];

/// Static catalog of components, in definition order.
#[derive(Debug, Clone)]
pub struct Registry {
    components: Vec<Component>,
}

impl Registry {
    /// The catalog shipped with this build.
    pub fn builtin() -> Registry {
        Registry::from_components(
            CATALOG
                .iter()
                .map(|(kind, name, source, dest)| Component::new(*kind, *name, *source, *dest)),
        )
    }

    /// Builds a registry from an arbitrary component list. Later duplicates of
    /// an already-defined (kind, name) are dropped.
    pub fn from_components<I: IntoIterator<Item = Component>>(components: I) -> Registry {
        let mut unique: Vec<Component> = Vec::new();
        for component in components {
            if unique
                .iter()
                .any(|c| c.kind == component.kind && c.name == component.name)
            {
                continue;
            }
            unique.push(component);
        }
        Registry { components: unique }
    }

    /// Looks a component up by kind and name. Both accept aliases
    /// (`lang go`, `language golang`). Unknown identifiers yield `None`.
    pub fn resolve(&self, kind: &str, name: &str) -> Option<&Component> {
        let kind = ComponentKind::parse(kind)?;
        self.find(kind, name)
    }

    /// Like [`Registry::resolve`] but with a typed kind.
    pub fn find(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        let lowered = name.to_ascii_lowercase();
        let canonical = NAME_ALIASES
            .iter()
            .find(|(k, alias, _)| *k == kind && *alias == lowered)
            .map(|(_, _, target)| *target)
            .unwrap_or(lowered.as_str());
        self.components
            .iter()
            .find(|c| c.kind == kind && c.name == canonical)
    }

    /// Resolves a persisted identity.
    pub fn resolve_id(&self, id: &ComponentId) -> Option<&Component> {
        self.find(id.kind, &id.name)
    }

    /// Like [`Registry::resolve`], but reports what was not found.
    pub fn require(&self, kind: &str, name: &str) -> Result<&Component, SyncError> {
        let parsed = kind.parse::<ComponentKind>()?;
        self.find(parsed, name)
            .ok_or_else(|| SyncError::UnknownComponent {
                kind: parsed.to_string(),
                name: name.to_string(),
            })
    }

    /// Parses a `type:name` selector as used on the command line.
    pub fn select(&self, selector: &str) -> Result<&Component, SyncError> {
        match selector.split_once([':', '/']) {
            Some((kind, name)) => self.require(kind, name),
            None => Err(SyncError::UnknownComponent {
                kind: "component".to_string(),
                name: selector.to_string(),
            }),
        }
    }

    /// All components, or those of one kind, in definition order.
    pub fn list(&self, kind: Option<ComponentKind>) -> Vec<&Component> {
        self.components
            .iter()
            .filter(|c| kind.is_none_or(|k| c.kind == k))
            .collect()
    }

    /// Destination paths of a selection, first occurrence wins.
    pub fn destinations_for(&self, selection: &[&Component]) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        for component in selection {
            if !out.contains(&component.dest) {
                out.push(component.dest.clone());
            }
        }
        out
    }

    /// The component whose destination contains `path`, preferring the most
    /// specific destination.
    pub fn owner_of(&self, path: &Path) -> Option<&Component> {
        self.components
            .iter()
            .filter(|c| c.owns(path))
            .max_by_key(|c| c.dest.components().count())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
