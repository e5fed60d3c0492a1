//! Process delegates and their registry
//!
//! A delegate customizes how a specific program is launched: it can edit the
//! environment, rewrite arguments, react to package actions and take over
//! in-process execution. Delegates are registered under a stable name and
//! instantiated lazily, at most once per launch.

use crate::runtime::catalog::PackageSpec;
use crate::runtime::dependency::ResolvedClosure;
use crate::runtime::environment::Environment;
use crate::runtime::process::ProcessError;
use std::process::Command;
use std::sync::Arc;

/// Arguments handed to a delegate factory
#[derive(Debug, Clone)]
pub struct DelegateArgs {
    /// Package whose configuration named the delegate
    pub package: String,
}

/// Hooks a delegate may override. Every hook has a neutral default.
pub trait ProcessDelegate: Send {
    /// Identifying name, matched against the name configured on packages
    fn name(&self) -> &str;

    /// Adjust the composed environment before arguments are built
    fn prepare_environment(
        &mut self,
        _closure: &ResolvedClosure,
        _env: &mut Environment,
    ) -> Result<(), DelegateError> {
        Ok(())
    }

    /// Rewrite the final argument list
    fn transform_arguments(
        &mut self,
        _closure: &ResolvedClosure,
        args: Vec<String>,
    ) -> Result<Vec<String>, DelegateError> {
        Ok(args)
    }

    /// Request a child process even when in-process execution is possible
    fn force_spawn(&self, _closure: &ResolvedClosure) -> bool {
        false
    }

    /// Handle one entry of a package's `actions`
    fn handle_action(
        &mut self,
        _closure: &ResolvedClosure,
        package: &str,
        action: &str,
    ) -> Result<(), DelegateError> {
        log::warn!(
            "Delegate '{}' ignores action '{}' of package '{}'",
            self.name(),
            action,
            package
        );
        Ok(())
    }

    /// Last chance to edit the command before a child is spawned
    fn pre_spawn(&mut self, _command: &mut Command) -> Result<(), DelegateError> {
        Ok(())
    }

    /// Run the command in the current process.
    ///
    /// On unix the default replaces the process image and only returns on
    /// failure. Elsewhere it runs the command to completion.
    fn execute_in_process(&mut self, command: Command) -> Result<i32, ProcessError> {
        default_execute_in_process(command)
    }
}

#[cfg(unix)]
pub fn default_execute_in_process(mut command: Command) -> Result<i32, ProcessError> {
    use std::os::unix::process::CommandExt;

    let program = command.get_program().to_string_lossy().into_owned();
    let source = command.exec();
    Err(ProcessError::Exec { program, source })
}

#[cfg(not(unix))]
pub fn default_execute_in_process(mut command: Command) -> Result<i32, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command.status().map_err(|source| ProcessError::Exec {
        program: program.clone(),
        source,
    })?;
    Ok(status.code().unwrap_or(1))
}

type Factory = Arc<dyn Fn(&DelegateArgs) -> Box<dyn ProcessDelegate> + Send + Sync>;

/// Name-keyed delegate factories. Read-only once built, cheap to share.
#[derive(Clone, Default)]
pub struct DelegateRegistry {
    entries: Vec<(String, Factory)>,
}

impl std::fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DelegateArgs) -> Box<dyn ProcessDelegate> + Send + Sync + 'static,
    {
        log::debug!("Registered delegate '{}'", name);
        self.entries.push((name.to_string(), Arc::new(factory)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Guard consulted before each instantiation: only the first candidate
    /// named `target` is created
    pub fn may_create(
        candidate: &str,
        existing: &[Box<dyn ProcessDelegate>],
        target: &str,
    ) -> bool {
        existing.is_empty() && candidate == target
    }

    /// Instantiate registered delegates accepted by [`Self::may_create`]
    pub fn new_instances(&self, target: &str, args: &DelegateArgs) -> Vec<Box<dyn ProcessDelegate>> {
        let mut instances: Vec<Box<dyn ProcessDelegate>> = Vec::new();
        for (name, factory) in &self.entries {
            if Self::may_create(name, &instances, target) {
                instances.push(factory(args));
            }
        }
        instances
    }

    /// Find the delegate called `name`. An empty or missing name means no
    /// delegate.
    pub fn find_delegate(
        &self,
        name: Option<&str>,
        args: &DelegateArgs,
    ) -> Result<Option<Box<dyn ProcessDelegate>>, DelegateError> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };

        match self.new_instances(name, args).into_iter().next() {
            Some(delegate) => {
                log::debug!("Instantiated delegate '{}' for '{}'", name, args.package);
                Ok(Some(delegate))
            }
            None => Err(DelegateError::NotFound {
                name: name.to_string(),
                package: args.package.clone(),
            }),
        }
    }
}

/// The delegate name configured for a closure and the package naming it.
///
/// The root wins, then packages along its alias chain, then the first package
/// in resolution order that names one.
pub fn delegate_name(closure: &ResolvedClosure) -> Option<(String, String)> {
    let named = |spec: &&PackageSpec| spec.delegate.is_some();

    closure
        .alias_chain()
        .into_iter()
        .find(named)
        .or_else(|| closure.iter().find(named))
        .and_then(|spec| Some((spec.delegate.clone()?, spec.id.clone())))
}

/// Per-launch delegate binding; resolves once and caches the result
#[derive(Default)]
pub struct DelegateSlot {
    bound: bool,
    delegate: Option<Box<dyn ProcessDelegate>>,
}

impl std::fmt::Debug for DelegateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateSlot")
            .field("bound", &self.bound)
            .field("delegate", &self.name())
            .finish()
    }
}

impl DelegateSlot {
    /// Resolve the delegate for `closure` on first call; later calls return
    /// the cached instance
    pub fn bind(
        &mut self,
        registry: &DelegateRegistry,
        closure: &ResolvedClosure,
    ) -> Result<Option<&mut Box<dyn ProcessDelegate>>, DelegateError> {
        if !self.bound {
            self.delegate = match delegate_name(closure) {
                Some((name, package)) => {
                    registry.find_delegate(Some(name.as_str()), &DelegateArgs { package })?
                }
                None => None,
            };
            self.bound = true;
        }
        Ok(self.delegate.as_mut())
    }

    pub fn get_mut(&mut self) -> Option<&mut Box<dyn ProcessDelegate>> {
        self.delegate.as_mut()
    }

    pub fn name(&self) -> Option<&str> {
        self.delegate.as_ref().map(|d| d.name())
    }
}

/// Errors raised while locating or running a delegate
#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("Delegate '{name}' requested by package '{package}' is not registered")]
    NotFound { name: String, package: String },

    #[error("Delegate '{delegate}' failed: {message}")]
    Hook { delegate: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KvStore;
    use crate::runtime::catalog::PackageCatalog;
    use crate::runtime::dependency::resolve;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(&'static str);

    impl ProcessDelegate for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn counting_registry(counter: Arc<AtomicUsize>) -> DelegateRegistry {
        let mut registry = DelegateRegistry::new();
        registry.register("MayaDelegate", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Named("MayaDelegate"))
        });
        registry.register("NukeDelegate", |_| Box::new(Named("NukeDelegate")));
        registry
    }

    fn closure(yaml: &str, root: &str) -> ResolvedClosure {
        let catalog = PackageCatalog::from_store(&KvStore::from_yaml(yaml).unwrap()).unwrap();
        resolve(root, &catalog).unwrap()
    }

    fn args() -> DelegateArgs {
        DelegateArgs {
            package: "test".to_string(),
        }
    }

    #[test]
    fn test_empty_name_means_no_delegate() {
        let registry = counting_registry(Arc::default());
        assert!(registry.find_delegate(None, &args()).unwrap().is_none());
        assert!(registry.find_delegate(Some(""), &args()).unwrap().is_none());
    }

    #[test]
    fn test_unknown_name_fails() {
        let registry = counting_registry(Arc::default());
        assert!(matches!(
            registry.find_delegate(Some("Houdini"), &args()),
            Err(DelegateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_may_create_allows_single_instance() {
        let mut registry = DelegateRegistry::new();
        registry.register("Dup", |_| Box::new(Named("Dup")));
        registry.register("Dup", |_| Box::new(Named("Dup")));
        assert_eq!(registry.new_instances("Dup", &args()).len(), 1);

        let existing: Vec<Box<dyn ProcessDelegate>> = vec![Box::new(Named("Dup"))];
        assert!(!DelegateRegistry::may_create("Dup", &existing, "Dup"));
        assert!(!DelegateRegistry::may_create("Other", &[], "Dup"));
        assert!(DelegateRegistry::may_create("Dup", &[], "Dup"));
    }

    #[test]
    fn test_slot_binds_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(counter.clone());
        let closure = closure("packages:\n  maya:\n    delegate: MayaDelegate\n", "maya");

        let mut slot = DelegateSlot::default();
        assert!(slot.bind(&registry, &closure).unwrap().is_some());
        assert!(slot.bind(&registry, &closure).unwrap().is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(slot.name(), Some("MayaDelegate"));
    }

    #[test]
    fn test_name_priority() {
        // root wins over everything
        let c = closure(
            r#"
packages:
  root:
    delegate: RootDelegate
    alias: target
    requires: [dep]
  target:
    delegate: AliasDelegate
  dep:
    delegate: DepDelegate
"#,
            "root",
        );
        assert_eq!(
            delegate_name(&c),
            Some(("RootDelegate".to_string(), "root".to_string()))
        );

        // then the alias chain
        let c = closure(
            r#"
packages:
  root:
    alias: middle
    requires: [dep]
  middle:
    alias: target
  target:
    delegate: AliasDelegate
  dep:
    delegate: DepDelegate
"#,
            "root",
        );
        assert_eq!(
            delegate_name(&c),
            Some(("AliasDelegate".to_string(), "target".to_string()))
        );

        // then the first package in resolution order
        let c = closure(
            r#"
packages:
  root:
    requires: [a, b]
  a:
    delegate: FirstDelegate
  b:
    delegate: SecondDelegate
"#,
            "root",
        );
        assert_eq!(delegate_name(&c).map(|(n, _)| n), Some("FirstDelegate".to_string()));

        let c = closure("packages:\n  root: {}\n", "root");
        assert!(delegate_name(&c).is_none());
    }
}
