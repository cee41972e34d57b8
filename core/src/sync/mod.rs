//! Synchronization machinery
//!
//! Everything that moves events between nodes and into the ledger:
//! - `lock`: named lease locks guarding replay
//! - `replay`: ordered, exactly-once application of stored events
//! - `import`: role-specific accept policies and the import pipeline
//! - `producer`: gate-checked creation of local events
//! - `publish`: confirmation bookkeeping after acknowledgements
//! - `exchange`: push/pull protocol and the local machine sync service
//! - `endpoint`: online web side of push/pull
//! - `archive`: compaction of fully confirmed events
//! - `scheduler`: periodic jobs driving the above

pub mod archive;
pub mod endpoint;
pub mod exchange;
pub mod import;
pub mod lock;
pub mod producer;
pub mod publish;
pub mod replay;
pub mod scheduler;

pub use archive::ArchivalTask;
pub use endpoint::{InProcessTransport, OnlineWebEndpoint};
pub use exchange::{
    ErrorRecorder, LoggingErrorRecorder, MemoryErrorRecorder, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncService, Transport,
};
pub use import::{policy_for, AcceptPolicy, ImportReport, Importer, LocalMachinePolicy, OnlineWebPolicy};
pub use lock::{LockHandle, LockService, MemoryLockService};
pub use producer::EventProducer;
pub use publish::Publisher;
pub use replay::{ReplayEngine, ReplayReport, DEFAULT_REPLAY_LOCK};
pub use scheduler::{ArchiveJob, ExchangeJob, Job, ReplaySweepJob, Scheduler};
