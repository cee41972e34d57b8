//! Node wiring
//!
//! A `Node` assembles the stores, lock service, replay engine, import policy
//! and archival task for one configured role. The sync service (local
//! machine) or endpoint (online web) and the scheduler are built from it.

use crate::config::{NodeConfig, NodeRole};
use crate::ledger::EventApplier;
use crate::store::{BackupStore, EventStore, MemoryBackupStore, MemoryEventStore, RocksBackupStore, RocksEventStore};
use crate::sync::scheduler::jitter;
use crate::sync::{
    policy_for, ArchivalTask, ArchiveJob, ErrorRecorder, EventProducer, ExchangeJob, Importer, LockService,
    MemoryLockService, OnlineWebEndpoint, ReplayEngine, ReplaySweepJob, Scheduler, SyncService, Transport,
};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

pub struct Node {
    config: NodeConfig,
    store: Arc<dyn EventStore>,
    backup: Arc<dyn BackupStore>,
    replay: Arc<ReplayEngine>,
    importer: Arc<Importer>,
    archive: Arc<ArchivalTask>,
}

impl Node {
    /// Assemble a node around existing stores
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn EventStore>,
        backup: Arc<dyn BackupStore>,
        locks: Arc<dyn LockService>,
        applier: Arc<dyn EventApplier>,
    ) -> Result<Self> {
        config.validate()?;

        let replay = Arc::new(ReplayEngine::new(
            store.clone(),
            locks,
            applier,
            config.lock_lease(),
        ));
        let importer = Arc::new(Importer::new(store.clone(), policy_for(&config), replay.clone()));
        let archive = Arc::new(ArchivalTask::new(
            store.clone(),
            backup.clone(),
            config.archive_page_size,
        ));

        tracing::info!(
            role = ?config.role,
            facility = %config.facility_id,
            policy = importer.policy().name(),
            "Node assembled"
        );

        Ok(Self {
            config,
            store,
            backup,
            replay,
            importer,
            archive,
        })
    }

    /// Node backed by RocksDB under `storage_path`
    pub fn open(config: NodeConfig, applier: Arc<dyn EventApplier>) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_path).map_err(|e| {
            Error::Storage(format!(
                "Failed to create {}: {}",
                config.storage_path.display(),
                e
            ))
        })?;
        let store = Arc::new(RocksEventStore::open(config.storage_path.join("events"))?);
        let backup = Arc::new(RocksBackupStore::open(config.storage_path.join("backup"))?);
        Self::new(config, store, backup, Arc::new(MemoryLockService::new()), applier)
    }

    /// Node with memory stores and a private lock service
    pub fn in_memory(config: NodeConfig, applier: Arc<dyn EventApplier>) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryBackupStore::new()),
            Arc::new(MemoryLockService::new()),
            applier,
        )
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    pub fn backup(&self) -> Arc<dyn BackupStore> {
        self.backup.clone()
    }

    pub fn replay_engine(&self) -> Arc<ReplayEngine> {
        self.replay.clone()
    }

    pub fn importer(&self) -> Arc<Importer> {
        self.importer.clone()
    }

    pub fn archival_task(&self) -> Arc<ArchivalTask> {
        self.archive.clone()
    }

    pub fn producer(&self) -> EventProducer {
        EventProducer::new(self.store.clone(), self.config.facility_id)
    }

    /// Push/pull service of a local machine
    pub fn sync_service(&self, transport: Arc<dyn Transport>, errors: Arc<dyn ErrorRecorder>) -> Result<SyncService> {
        if self.config.role != NodeRole::LocalMachine {
            return Err(Error::Config("only a local machine runs the sync service".to_string()));
        }
        Ok(SyncService::new(
            self.config.facility_id,
            self.config.known_facilities.clone(),
            self.store.clone(),
            transport,
            self.importer.clone(),
            errors,
            self.config.push_byte_budget,
        ))
    }

    /// Push/pull handler of the online web
    pub fn endpoint(&self) -> Result<OnlineWebEndpoint> {
        if self.config.role != NodeRole::OnlineWeb {
            return Err(Error::Config("only the online web serves push/pull".to_string()));
        }
        Ok(OnlineWebEndpoint::new(self.store.clone(), self.importer.clone()))
    }

    /// Scheduler with the replay sweep, archival and, given a sync service,
    /// the jittered exchange loop
    pub fn scheduler(&self, sync: Option<Arc<SyncService>>) -> Scheduler {
        let mut scheduler = Scheduler::new();
        scheduler.add(
            Arc::new(ReplaySweepJob::new(self.replay.clone())),
            self.config.replay_interval(),
            Duration::ZERO,
        );
        if let Some(service) = sync {
            scheduler.add(
                Arc::new(ExchangeJob::new(service)),
                self.config.exchange_interval(),
                jitter(self.config.max_start_jitter()),
            );
        }
        scheduler.add(
            Arc::new(ArchiveJob::new(self.archive.clone())),
            self.config.archive_interval(),
            self.config.archive_interval(),
        );
        scheduler
    }
}
