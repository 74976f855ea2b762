// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Instrument, Profile, ResolvedPaths};
use crate::db::Databases;
use crate::engine::{InProcessLauncher, ProcessLauncher, Supervisor, Worker};
use crate::lock::LockManager;
use crate::recipes::RecipeRegistry;
use crate::traits::WorkerLauncher;

/// Everything a command needs: the profile, its resolved roots, the
/// instrument tables, the recipe registry, the lock manager and the stores.
pub struct Workspace {
    pub profile: Profile,
    pub paths: ResolvedPaths,
    pub instrument: Arc<Instrument>,
    pub registry: Arc<RecipeRegistry>,
    pub locks: LockManager,
    pub databases: Databases,
}

impl Workspace {
    /// Load the profile from `explicit` or `APERO_PROFILE` and open the tree.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let profile = Profile::discover(explicit).context("cannot load profile")?;
        Self::open(profile)
    }

    pub fn open(profile: Profile) -> Result<Self> {
        let paths = profile.paths();
        paths.create_all()?;
        let instrument = Arc::new(Instrument::builtin(&profile.instrument)?);
        let registry = Arc::new(RecipeRegistry::builtin(&instrument));
        let locks = LockManager::new(paths.locks.clone(), profile.lock.options());
        let databases = Databases::open(&paths.db, &locks, profile.database.retry_policy())
            .with_context(|| format!("cannot open databases under {}", paths.db.display()))?;
        Ok(Self {
            profile,
            paths,
            instrument,
            registry,
            locks,
            databases,
        })
    }

    /// Child-process workers from the running binary, or worker threads.
    pub fn launcher(&self, in_process: bool) -> Result<Arc<dyn WorkerLauncher>> {
        if in_process {
            let worker = Worker::new(Arc::clone(&self.instrument), Arc::clone(&self.registry));
            return Ok(Arc::new(InProcessLauncher::new(worker)));
        }
        let launcher = ProcessLauncher::current_exe().context("cannot locate the apero binary")?;
        Ok(Arc::new(launcher))
    }

    pub fn supervisor(&self, launcher: Arc<dyn WorkerLauncher>) -> Supervisor {
        Supervisor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.instrument),
            self.profile.clone(),
            self.databases.clone(),
            self.locks.clone(),
            launcher,
        )
    }
}
