//! Type registry for multi-tagged graph elements.
//!
//! A stored element carries one or more type tags. The registry maps each tag
//! to a declared kind, and resolves the tags of one element to the minimal
//! set of most specific kinds: never a kind together with one of its
//! supertypes. When more than one kind survives, a composite view is
//! synthesised and memoised under an order-independent key.
//!
//! The registry is built once at start-up from a static declaration table and
//! shared behind an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{Edge, Vertex};
use crate::schema;

/// Static declaration of one element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDeclaration {
    pub name: &'static str,
    /// Type tag stored on elements of this kind. Untagged kinds exist only to
    /// be inherited from and are left out of the tag table.
    pub tag: Option<&'static str>,
    /// Direct supertypes, by name.
    pub extends: &'static [&'static str],
}

impl KindDeclaration {
    pub const fn new(
        name: &'static str,
        tag: Option<&'static str>,
        extends: &'static [&'static str],
    ) -> Self {
        Self { name, tag, extends }
    }
}

/// Root kind every element resolves to when it carries no known tag.
pub const FRAME: &str = "Frame";
/// Root kind for vertices.
pub const VERTEX_FRAME: &str = "VertexFrame";

/// Kinds of the analysis model family.
pub const BUILTIN_KINDS: &[KindDeclaration] = &[
    KindDeclaration::new(FRAME, None, &[]),
    KindDeclaration::new(VERTEX_FRAME, None, &[FRAME]),
    KindDeclaration::new("AnalysisModel", Some(schema::analysis::TYPE), &[VERTEX_FRAME]),
    KindDeclaration::new(
        "WindupExecutionModel",
        Some(schema::execution::TYPE),
        &[VERTEX_FRAME],
    ),
    KindDeclaration::new(
        "WindupConfigurationModel",
        Some(schema::configuration::TYPE),
        &[VERTEX_FRAME],
    ),
    KindDeclaration::new(
        "WindupJavaConfigurationModel",
        Some(schema::java_configuration::TYPE),
        &[VERTEX_FRAME],
    ),
    KindDeclaration::new("FileModel", Some("FileResource"), &[VERTEX_FRAME]),
    KindDeclaration::new("ArchiveModel", Some("ArchiveModelResource"), &["FileModel"]),
    KindDeclaration::new("SourceFileModel", Some("SourceFileModel"), &["FileModel"]),
    KindDeclaration::new(
        "JavaSourceFileModel",
        Some("JavaSourceFileModel"),
        &["SourceFileModel"],
    ),
    KindDeclaration::new("PackageModel", Some(schema::package::TYPE), &[VERTEX_FRAME]),
    KindDeclaration::new(
        "TechnologyReferenceModel",
        Some(schema::technology::TYPE),
        &[VERTEX_FRAME],
    ),
    KindDeclaration::new(
        "EffortReportModel",
        Some(schema::effort_report::TYPE),
        &[VERTEX_FRAME],
    ),
    KindDeclaration::new(
        "ClassificationModel",
        Some("ClassificationModel"),
        &["EffortReportModel"],
    ),
    KindDeclaration::new("FileReferenceModel", Some("FileReferenceModel"), &[VERTEX_FRAME]),
    KindDeclaration::new(
        "FileLocationModel",
        Some("FileLocationModel"),
        &["FileReferenceModel"],
    ),
    KindDeclaration::new(
        "InlineHintModel",
        Some(schema::inline_hint::TYPE),
        &["EffortReportModel", "FileLocationModel"],
    ),
    KindDeclaration::new(
        "IssueCategoryModel",
        Some(schema::issue_category::TYPE),
        &[VERTEX_FRAME],
    ),
];

/// Index of a kind inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId(usize);

/// A registered kind with its precomputed ancestry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kind {
    pub id: KindId,
    pub name: String,
    pub tag: Option<String>,
    pub parents: Vec<KindId>,
    /// Every supertype, including the kind itself.
    ancestors: BTreeSet<KindId>,
}

impl Kind {
    /// Whether this kind is `other` or one of its subtypes.
    pub fn is_subkind_of(&self, other: KindId) -> bool {
        self.ancestors.contains(&other)
    }
}

/// Synthesised view over several unrelated most-specific kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKind {
    /// Member kind names, sorted.
    pub key: Vec<String>,
    pub members: Vec<Arc<Kind>>,
}

impl CompositeKind {
    pub fn name(&self) -> String {
        self.key.join("+")
    }
}

/// Outcome of resolving the tags of one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedKind {
    Single(Arc<Kind>),
    Composite(Arc<CompositeKind>),
}

impl ResolvedKind {
    /// Whether this view includes `kind`, directly or through a supertype.
    pub fn implements(&self, kind: KindId) -> bool {
        match self {
            ResolvedKind::Single(k) => k.is_subkind_of(kind),
            ResolvedKind::Composite(c) => c.members.iter().any(|k| k.is_subkind_of(kind)),
        }
    }

    /// Names of the most specific kinds in this view.
    pub fn kind_names(&self) -> Vec<String> {
        match self {
            ResolvedKind::Single(k) => vec![k.name.clone()],
            ResolvedKind::Composite(c) => c.key.clone(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ResolvedKind::Composite(_))
    }
}

/// Anything carrying type tags.
pub trait TypeTagged {
    fn tags(&self) -> Vec<String>;
}

impl TypeTagged for Vertex {
    fn tags(&self) -> Vec<String> {
        self.type_tags.clone()
    }
}

impl TypeTagged for Edge {
    fn tags(&self) -> Vec<String> {
        self.type_tags()
    }
}

/// Tag-to-kind table with most-specific resolution.
#[derive(Debug)]
pub struct TypeRegistry {
    kinds: Vec<Arc<Kind>>,
    by_name: HashMap<String, KindId>,
    by_tag: HashMap<String, KindId>,
    composites: RwLock<HashMap<Vec<String>, Arc<CompositeKind>>>,
}

impl TypeRegistry {
    /// Registry over [`BUILTIN_KINDS`].
    pub fn builtin() -> Result<Self> {
        Self::new(BUILTIN_KINDS)
    }

    /// Build the registry from a declaration table.
    ///
    /// Fails when two declarations claim the same tag, when a name is
    /// declared twice, or when a supertype is unknown or cyclic.
    pub fn new(declarations: &[KindDeclaration]) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(declarations.len());
        for (index, decl) in declarations.iter().enumerate() {
            if by_name.insert(decl.name.to_string(), KindId(index)).is_some() {
                return Err(Error::Config(format!(
                    "Kind '{}' is declared more than once",
                    decl.name
                )));
            }
        }

        let mut parents = Vec::with_capacity(declarations.len());
        for decl in declarations {
            let mut ids = Vec::with_capacity(decl.extends.len());
            for parent in decl.extends {
                let id = by_name.get(*parent).copied().ok_or_else(|| {
                    Error::Config(format!(
                        "Kind '{}' extends unknown kind '{}'",
                        decl.name, parent
                    ))
                })?;
                ids.push(id);
            }
            parents.push(ids);
        }

        let mut ancestry: Vec<Option<BTreeSet<KindId>>> = vec![None; declarations.len()];
        for index in 0..declarations.len() {
            let mut visiting = BTreeSet::new();
            collect_ancestors(index, &parents, &mut ancestry, &mut visiting, declarations)?;
        }

        let mut by_tag: HashMap<String, KindId> = HashMap::new();
        let mut kinds = Vec::with_capacity(declarations.len());
        for (index, decl) in declarations.iter().enumerate() {
            if let Some(tag) = decl.tag {
                if let Some(existing) = by_tag.get(tag) {
                    return Err(Error::DuplicateTypeTag {
                        tag: tag.to_string(),
                        existing: declarations[existing.0].name.to_string(),
                        duplicate: decl.name.to_string(),
                    });
                }
                by_tag.insert(tag.to_string(), KindId(index));
            } else {
                debug!(kind = decl.name, "Kind has no type tag, excluded from tag table");
            }
            kinds.push(Arc::new(Kind {
                id: KindId(index),
                name: decl.name.to_string(),
                tag: decl.tag.map(String::from),
                parents: parents[index].clone(),
                ancestors: ancestry[index].take().unwrap_or_default(),
            }));
        }

        debug!(
            kind_count = kinds.len(),
            tag_count = by_tag.len(),
            "Type registry built"
        );

        Ok(Self {
            kinds,
            by_name,
            by_tag,
            composites: RwLock::new(HashMap::new()),
        })
    }

    pub fn kind(&self, id: KindId) -> Option<&Arc<Kind>> {
        self.kinds.get(id.0)
    }

    pub fn kind_id(&self, name: &str) -> Option<KindId> {
        self.by_name.get(name).copied()
    }

    pub fn kind_for_tag(&self, tag: &str) -> Option<&Arc<Kind>> {
        self.by_tag.get(tag).and_then(|id| self.kind(*id))
    }

    /// Number of tags in the tag table.
    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    /// Whether `kind` is `other` or one of its subtypes.
    pub fn is_subkind(&self, kind: KindId, other: KindId) -> bool {
        self.kind(kind).is_some_and(|k| k.is_subkind_of(other))
    }

    /// Minimal antichain of most specific kinds for a set of tags.
    ///
    /// Unknown tags are ignored. Order follows first appearance.
    pub fn resolve_kinds<I, S>(&self, tags: I) -> Vec<Arc<Kind>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut result: Vec<Arc<Kind>> = Vec::new();
        for tag in tags {
            let Some(kind) = self.kind_for_tag(tag.as_ref()) else {
                continue;
            };
            // Drop supertypes of the new kind already present.
            result.retain(|present| present.id == kind.id || !kind.is_subkind_of(present.id));
            // Skip the new kind when a subtype (or itself) is already present.
            if !result.iter().any(|present| present.is_subkind_of(kind.id)) {
                result.push(Arc::clone(kind));
            }
        }
        result
    }

    /// Resolve tags to a single view, falling back to `default` when no tag
    /// is known.
    pub fn resolve<I, S>(&self, tags: I, default: KindId) -> Result<ResolvedKind>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kinds = self.resolve_kinds(tags);
        match kinds.len() {
            0 => self
                .kind(default)
                .map(|k| ResolvedKind::Single(Arc::clone(k)))
                .ok_or_else(|| Error::Internal(format!("Unknown default kind {:?}", default))),
            1 => Ok(ResolvedKind::Single(kinds.remove(0))),
            _ => Ok(ResolvedKind::Composite(self.composite(kinds))),
        }
    }

    /// Resolve the tags stored on a vertex or edge.
    pub fn resolve_element<E: TypeTagged>(&self, element: &E, default: KindId) -> Result<ResolvedKind> {
        self.resolve(element.tags(), default)
    }

    /// Tags stamped on a new element of `kind`: its own tag followed by its
    /// supertypes' tags. An untagged kind contributes nothing, and neither do
    /// its supertypes.
    pub fn type_tags_for(&self, kind: KindId) -> Vec<String> {
        let mut tags = Vec::new();
        self.push_type_tags(kind, &mut tags);
        tags
    }

    fn push_type_tags(&self, kind: KindId, tags: &mut Vec<String>) {
        let Some(kind) = self.kind(kind) else {
            return;
        };
        let Some(ref tag) = kind.tag else {
            return;
        };
        if tags.contains(tag) {
            return;
        }
        tags.push(tag.clone());
        for parent in &kind.parents {
            self.push_type_tags(*parent, tags);
        }
    }

    /// Tags for a kind looked up by name.
    pub fn type_tags_named(&self, name: &str) -> Result<Vec<String>> {
        let id = self
            .kind_id(name)
            .ok_or_else(|| Error::NotFound(format!("Kind '{}'", name)))?;
        Ok(self.type_tags_for(id))
    }

    fn composite(&self, mut members: Vec<Arc<Kind>>) -> Arc<CompositeKind> {
        members.sort_by(|a, b| a.name.cmp(&b.name));
        let key: Vec<String> = members.iter().map(|k| k.name.clone()).collect();

        if let Ok(cache) = self.composites.read() {
            if let Some(existing) = cache.get(&key) {
                return Arc::clone(existing);
            }
        }

        let composite = Arc::new(CompositeKind {
            key: key.clone(),
            members,
        });
        if let Ok(mut cache) = self.composites.write() {
            let entry = cache.entry(key).or_insert_with(|| Arc::clone(&composite));
            return Arc::clone(entry);
        }
        composite
    }

    /// Number of memoised composite views.
    pub fn composite_count(&self) -> usize {
        self.composites.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn collect_ancestors(
    index: usize,
    parents: &[Vec<KindId>],
    ancestry: &mut [Option<BTreeSet<KindId>>],
    visiting: &mut BTreeSet<usize>,
    declarations: &[KindDeclaration],
) -> Result<BTreeSet<KindId>> {
    if let Some(ref done) = ancestry[index] {
        return Ok(done.clone());
    }
    if !visiting.insert(index) {
        return Err(Error::Config(format!(
            "Kind '{}' inherits from itself",
            declarations[index].name
        )));
    }
    let mut set = BTreeSet::new();
    set.insert(KindId(index));
    for parent in &parents[index] {
        let inherited = collect_ancestors(parent.0, parents, ancestry, visiting, declarations)?;
        set.extend(inherited);
    }
    visiting.remove(&index);
    ancestry[index] = Some(set.clone());
    Ok(set)
}
