//! Dependency-ordered bundle installation.
//!
//! A bundle is identified by its Rust type. `install_bundles` first walks the
//! whole prerequisite graph so a missing or cyclic prerequisite fails before
//! any bundle runs, then installs depth-first, each bundle exactly once,
//! flushing stores after each so later bundles observe earlier writes.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::deployer::Deployer;
use crate::error::DeployError;

/// Identity of a bundle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleKey {
    id: TypeId,
    name: &'static str,
}

impl BundleKey {
    pub fn of<B: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<B>(),
            name: std::any::type_name::<B>(),
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.name.rsplit("::").next().unwrap_or(self.name);
        write!(f, "{short}")
    }
}

/// A named unit of install logic.
pub trait Bundle: 'static {
    fn key(&self) -> BundleKey {
        BundleKey::of::<Self>()
    }

    /// Bundles that must be installed first.
    fn requires(&self) -> Vec<BundleKey> {
        Vec::new()
    }

    fn install(&self, deployer: &mut Deployer) -> Result<(), DeployError>;
}

impl Deployer {
    /// Installs `bundles` and their prerequisites in dependency order.
    ///
    /// Returns the keys in the order they were installed. The first failure
    /// aborts the run; a failing `install` is reported as `BundleFailed`.
    pub fn install_bundles(
        &mut self,
        bundles: &[Box<dyn Bundle>],
    ) -> Result<Vec<BundleKey>, DeployError> {
        let mut by_key: HashMap<BundleKey, &dyn Bundle> = HashMap::new();
        for bundle in bundles {
            if by_key.insert(bundle.key(), &**bundle).is_some() {
                tracing::warn!("bundle {} supplied more than once", bundle.key());
            }
        }

        let mut run = BundleRun {
            by_key,
            installed: HashSet::new(),
            visiting: HashSet::new(),
            order: Vec::new(),
        };
        let mut checked = HashSet::new();
        for bundle in bundles {
            run.check(bundle.key(), &mut checked)?;
        }
        for bundle in bundles {
            run.visit(self, bundle.key())?;
        }
        Ok(run.order)
    }
}

struct BundleRun<'b> {
    by_key: HashMap<BundleKey, &'b dyn Bundle>,
    installed: HashSet<BundleKey>,
    visiting: HashSet<BundleKey>,
    order: Vec<BundleKey>,
}

impl<'b> BundleRun<'b> {
    /// Verifies the graph below `key` is complete and acyclic.
    fn check(
        &mut self,
        key: BundleKey,
        checked: &mut HashSet<BundleKey>,
    ) -> Result<(), DeployError> {
        if checked.contains(&key) {
            return Ok(());
        }
        if !self.visiting.insert(key) {
            return Err(DeployError::CyclicDependency { bundle: key });
        }
        let prereqs = self.prerequisites(key)?;
        for prereq in prereqs {
            self.check(prereq, checked)?;
        }
        self.visiting.remove(&key);
        checked.insert(key);
        Ok(())
    }

    fn visit(&mut self, deployer: &mut Deployer, key: BundleKey) -> Result<(), DeployError> {
        if self.installed.contains(&key) {
            return Ok(());
        }
        if !self.visiting.insert(key) {
            return Err(DeployError::CyclicDependency { bundle: key });
        }
        for prereq in self.prerequisites(key)? {
            self.visit(deployer, prereq)?;
        }

        let bundle = self.by_key[&key];
        bundle
            .install(deployer)
            .and_then(|()| deployer.flush())
            .map_err(|e| DeployError::BundleFailed {
                bundle: key,
                source: Box::new(e),
            })?;
        tracing::info!("installed bundle {key}");

        self.visiting.remove(&key);
        self.installed.insert(key);
        self.order.push(key);
        Ok(())
    }

    /// Declared prerequisites of `key`, all of which must have been supplied.
    fn prerequisites(&self, key: BundleKey) -> Result<Vec<BundleKey>, DeployError> {
        let prereqs = self.by_key[&key].requires();
        if let Some(missing) = prereqs.iter().find(|p| !self.by_key.contains_key(*p)) {
            return Err(DeployError::BrokenDependency {
                missing: *missing,
                requested_by: key,
            });
        }
        Ok(prereqs)
    }
}
