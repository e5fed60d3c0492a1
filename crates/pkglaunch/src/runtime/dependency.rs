//! Dependency closure resolution
//!
//! Depth-first, post-order traversal from the root package. Each package is
//! emitted after its alias and requirements, so later packages override
//! earlier ones when the environment is composed.

use crate::runtime::catalog::{PackageCatalog, PackageSpec};
use std::collections::HashSet;

/// Ordered, duplicate-free package closure; the root is last
#[derive(Debug, Clone)]
pub struct ResolvedClosure {
    packages: Vec<PackageSpec>,
}

impl ResolvedClosure {
    /// The package the closure was resolved for
    pub fn root(&self) -> &PackageSpec {
        // resolve() always emits the root last
        &self.packages[self.packages.len() - 1]
    }

    /// Packages in resolution order (dependencies first)
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PackageSpec> {
        self.packages.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&PackageSpec> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// The root followed by the packages reached through `alias`, stopping at
    /// the first package that has no alias or whose alias was already visited
    pub fn alias_chain(&self) -> Vec<&PackageSpec> {
        let mut chain = vec![self.root()];
        let mut visited: HashSet<&str> = HashSet::from([self.root().id.as_str()]);

        while let Some(alias) = chain.last().and_then(|p| p.alias.as_deref()) {
            if !visited.insert(alias) {
                break;
            }
            match self.get(alias) {
                Some(spec) => chain.push(spec),
                None => break,
            }
        }
        chain
    }
}

/// One package on the traversal path
struct Frame {
    spec: PackageSpec,
    children: Vec<String>,
    next: usize,
}

impl Frame {
    fn new(spec: PackageSpec) -> Self {
        let children = spec
            .alias
            .iter()
            .chain(spec.requires.iter())
            .cloned()
            .collect();
        Self {
            spec,
            children,
            next: 0,
        }
    }
}

/// Resolve the closure of `root_id`
pub fn resolve(root_id: &str, catalog: &PackageCatalog) -> Result<ResolvedClosure, DependencyError> {
    let root = catalog
        .spec(root_id)
        .ok_or_else(|| DependencyError::PackageNotFound {
            id: root_id.to_string(),
            required_by: None,
        })?;

    if !root.requires.is_empty() && root.requires.iter().all(|r| root.excludes(r)) {
        return Err(DependencyError::ExcludedAllRequirements(root.id.clone()));
    }

    let mut order: Vec<PackageSpec> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    // Ids of the frames on the stack, in stack order
    let mut path: Vec<String> = vec![root.id.clone()];
    let mut on_path: HashSet<String> = HashSet::from([root.id.clone()]);
    let mut stack: Vec<Frame> = vec![Frame::new(root)];

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.children.len() {
            let child = frame.children[frame.next].clone();
            frame.next += 1;

            if frame.spec.excludes(&child) {
                log::debug!("'{}' excludes '{}'", frame.spec.id, child);
                continue;
            }
            if on_path.contains(&child) {
                let mut cycle = path.clone();
                cycle.push(child);
                return Err(DependencyError::CyclicDependency(cycle));
            }
            if seen.contains(&child) {
                continue;
            }

            let spec = catalog
                .spec(&child)
                .ok_or_else(|| DependencyError::PackageNotFound {
                    id: child.clone(),
                    required_by: Some(frame.spec.id.clone()),
                })?;
            on_path.insert(child.clone());
            path.push(child);
            stack.push(Frame::new(spec));
        } else if let Some(done) = stack.pop() {
            path.pop();
            on_path.remove(&done.spec.id);
            seen.insert(done.spec.id.clone());
            order.push(done.spec);
        }
    }

    log::debug!(
        "Resolved '{}': {}",
        root_id,
        order.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(" -> ")
    );

    Ok(ResolvedClosure { packages: order })
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    required_by
        .as_ref()
        .map(|r| format!(" (required by '{}')", r))
        .unwrap_or_default()
}

/// Errors that can occur while resolving a closure
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Package '{id}' not found{}", required_by_suffix(.required_by))]
    PackageNotFound {
        id: String,
        required_by: Option<String>,
    },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Package '{0}' excludes every package it requires")]
    ExcludedAllRequirements(String),
}
