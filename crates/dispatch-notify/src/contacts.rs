use async_trait::async_trait;

use dispatch_core::types::UserId;

/// Snapshot returned by a contacts lookup (§6 "Contacts service").
#[derive(Debug, Clone, Default)]
pub struct ContactsSnapshot {
    pub humans: Vec<String>,
    pub bots: Vec<String>,
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    pub supergroups: Vec<String>,
    pub service: String,
}

/// Out-of-core collaborator: a client/server RPC service for contact
/// resolution, surfaced here only as the interface the dispatch core would
/// call against. No transport is implemented — this crate defines the seam
/// and a no-op stub for tests and standalone operation.
#[async_trait]
pub trait ContactsService: Send + Sync {
    async fn lookup(&self, user_id: UserId) -> ContactsSnapshot;
}

/// Always returns an empty snapshot — used where no real contacts backend
/// is wired up (tests, or deployments that don't need operator escalation
/// contact resolution).
#[derive(Debug, Default)]
pub struct NullContactsService;

#[async_trait]
impl ContactsService for NullContactsService {
    async fn lookup(&self, _user_id: UserId) -> ContactsSnapshot {
        ContactsSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_service_returns_empty_snapshot() {
        let service = NullContactsService;
        let snapshot = service.lookup(UserId(1)).await;
        assert!(snapshot.humans.is_empty());
        assert!(snapshot.service.is_empty());
    }
}
