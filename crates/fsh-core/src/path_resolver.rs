//! Path Resolver (spec §4.5): locates or synthesizes the element
//! definition(s) a rule's path/caret-path addresses within a structure's
//! current element array.
//!
//! Soft indices have already been resolved to concrete integers by
//! [`crate::soft_index`] before any rule reaches this module, so every
//! step here sees a plain name, a named slice, or a resolved integer —
//! never a `[+]`/`[=]` token.

use thiserror::Error;

use crate::export::fhir_types::ElementDefinition;
use crate::model::{Bracket, Path};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown path '{0}'")]
    UnknownPath(String),
    #[error("unknown slice '{1}' on path '{0}'")]
    UnknownSlice(String, String),
    #[error("index {1} out of range for slices of path '{0}'")]
    IndexOutOfRange(String, u32),
    #[error("'{0}' is not yet defined — add its parent element first")]
    MissingParent(String),
}

/// Walks an element array rooted at `root_path` (the structure's own
/// type name, e.g. `"Observation"`), resolving dotted element paths to
/// the index of the element they address.
pub struct PathResolver<'a> {
    pub elements: &'a mut Vec<ElementDefinition>,
    pub root_path: String,
}

impl<'a> PathResolver<'a> {
    pub fn new(elements: &'a mut Vec<ElementDefinition>, root_path: impl Into<String>) -> Self {
        Self {
            elements,
            root_path: root_path.into(),
        }
    }

    /// Resolve an already-existing element, descending through any
    /// ContainsRule-created slices the path names. Does not create
    /// anything — a CardRule/FlagRule/BindingRule/AssignmentRule/OnlyRule/
    /// CaretValueRule/ObeysRule all target an element that must already
    /// be present, either inherited from the base snapshot or created
    /// earlier in document order by a ContainsRule.
    pub fn resolve(&self, path: &Path) -> Result<usize, ResolveError> {
        let mut current_path = self.root_path.clone();
        let mut current_index: Option<usize> = None;
        for step in &path.steps {
            let next_path = format!("{current_path}.{}", step.name);
            let idx = self.find_step(&next_path, step.slice_name(), step.effective_index())?;
            current_index = Some(idx);
            current_path = next_path;
        }
        current_index.ok_or_else(|| ResolveError::UnknownPath(current_path.clone()))
    }

    /// Resolve every step but the last, requiring each to already exist;
    /// returns the dotted path string for the final step and the index
    /// its sibling group starts at, for [`crate::model::AddElementRule`]
    /// which always creates its own final element.
    pub fn resolve_parent(&self, path: &Path) -> Result<String, ResolveError> {
        let mut current_path = self.root_path.clone();
        for step in &path.steps[..path.steps.len().saturating_sub(1)] {
            let next_path = format!("{current_path}.{}", step.name);
            self.find_step(&next_path, step.slice_name(), step.effective_index())?;
            current_path = next_path;
        }
        Ok(current_path)
    }

    fn find_step(
        &self,
        full_path: &str,
        slice_name: Option<&str>,
        index: Option<u32>,
    ) -> Result<usize, ResolveError> {
        match (slice_name, index) {
            (Some(name), _) => self
                .elements
                .iter()
                .position(|e| e.path == full_path && e.slice_name.as_deref() == Some(name))
                .ok_or_else(|| ResolveError::UnknownSlice(full_path.to_string(), name.to_string())),
            (None, Some(n)) => {
                let slices: Vec<usize> = self
                    .elements
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.path == full_path && e.slice_name.is_some())
                    .map(|(i, _)| i)
                    .collect();
                if slices.is_empty() {
                    // No slices created yet: a bare numeric index on an
                    // unsliced repeating element addresses the base
                    // element itself (e.g. `telecom[0].system` before any
                    // ContainsRule exists for `telecom`).
                    self.unsliced(full_path)
                } else {
                    slices
                        .get(n as usize)
                        .copied()
                        .ok_or_else(|| ResolveError::IndexOutOfRange(full_path.to_string(), n))
                }
            }
            (None, None) => self.unsliced(full_path),
        }
    }

    fn unsliced(&self, full_path: &str) -> Result<usize, ResolveError> {
        self.elements
            .iter()
            .position(|e| e.path == full_path && e.slice_name.is_none())
            .ok_or_else(|| ResolveError::UnknownPath(full_path.to_string()))
    }

    /// Insert a new ContainsRule-created slice element right after the
    /// last existing slice of the same parent path (or right after the
    /// unsliced element itself if this is the first slice), matching the
    /// target format's convention of grouping a sliced element's variants
    /// contiguously.
    pub fn insert_slice(&mut self, parent_path: &str, slice_name: String, mut cloned: ElementDefinition) -> usize {
        cloned.slice_name = Some(slice_name.clone());
        cloned.id = Some(format!("{parent_path}:{slice_name}"));
        let insert_at = self
            .elements
            .iter()
            .rposition(|e| e.path == parent_path)
            .map(|i| i + 1)
            .unwrap_or(self.elements.len());
        self.elements.insert(insert_at, cloned);
        insert_at
    }

    /// Append a brand-new element at the end of its parent's children,
    /// for [`crate::model::AddElementRule`] (logical models / custom
    /// resources, whose elements don't pre-exist in any base snapshot).
    pub fn append_new(&mut self, element: ElementDefinition) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }
}

/// The caret path addressed inside an already-resolved element — metadata
/// on the element definition itself rather than a further tree traversal
/// (spec §4.5 "Caret paths address the element's own metadata keys").
pub fn caret_key(caret: &crate::model::CaretPath) -> String {
    caret
        .steps
        .iter()
        .map(|s| match &s.bracket {
            Some(Bracket::Index(n)) => format!("{}[{n}]", s.name),
            _ => s.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(path: &str) -> ElementDefinition {
        ElementDefinition::new(path)
    }

    fn path_from(steps: &[&str]) -> Path {
        use crate::model::PathStep;
        Path {
            steps: steps.iter().map(|s| PathStep::plain(*s)).collect(),
        }
    }

    #[test]
    fn resolves_simple_child_path() {
        let mut elements = vec![elem("Observation"), elem("Observation.status"), elem("Observation.category")];
        let resolver = PathResolver::new(&mut elements, "Observation");
        let idx = resolver.resolve(&path_from(&["category"])).unwrap();
        assert_eq!(resolver.elements[idx].path, "Observation.category");
    }

    #[test]
    fn unknown_path_is_an_error() {
        let mut elements = vec![elem("Observation")];
        let resolver = PathResolver::new(&mut elements, "Observation");
        assert!(matches!(
            resolver.resolve(&path_from(&["nonexistent"])),
            Err(ResolveError::UnknownPath(_))
        ));
    }

    #[test]
    fn resolves_into_a_created_slice() {
        let mut elements = vec![elem("Observation"), elem("Observation.category")];
        {
            let mut resolver = PathResolver::new(&mut elements, "Observation");
            let base = resolver.elements[1].clone();
            resolver.insert_slice("Observation.category", "vitals".to_string(), base);
        }
        let resolver = PathResolver::new(&mut elements, "Observation");
        use crate::model::{Bracket, PathStep};
        let path = Path {
            steps: vec![PathStep {
                name: "category".to_string(),
                bracket: Some(Bracket::Slice("vitals".to_string())),
                resolved_index: None,
            }],
        };
        let idx = resolver.resolve(&path).unwrap();
        assert_eq!(resolver.elements[idx].slice_name.as_deref(), Some("vitals"));
    }
}
