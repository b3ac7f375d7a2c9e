//! Git-backed reconciliation of cluster resources.
//!
//! The working copy holds one YAML manifest per resource at
//! `<kind>/<namespace>/<name>.yaml` (or `<kind>/<name>.yaml` for
//! cluster-scoped kinds). Cluster changes flow into it through the
//! [`guard::DriftHandler`]; repository changes flow into the cluster through
//! the [`reconciler::Reconciler`].

pub mod applier;
pub mod batch;
pub mod context;
pub mod diff;
pub mod error;
pub mod git;
pub mod guard;
pub mod manager;
pub mod normalize;
pub mod ordering;
pub mod reconciler;
pub mod recovery;
pub mod resource;
pub mod status;
pub mod sync_scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{ChangeType, ChangedFile, PendingChangeQueue};
pub use context::IacContext;
pub use error::{GitOpsError, Result};
pub use git::{GitBackend, GitIdentity, GitRepository};
pub use guard::{DriftHandler, DriftOutcome, SkipReason};
pub use manager::{IacHandle, IacManager, IacStatusSnapshot};
pub use normalize::{Normalizer, SecretTreatment};
pub use reconciler::{Reconciler, SyncOutcome, SyncReport};
pub use resource::ResourceKey;
pub use status::{
    ErrorSlot, IacChange, LoopState, RepoSyncState, ResourceSyncStatus, StatusTracker, SyncState,
};
pub use sync_scheduler::SyncScheduler;
