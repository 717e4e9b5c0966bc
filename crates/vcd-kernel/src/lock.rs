//! Process-wide named locks keyed by parent entity.
//!
//! The remote serializes changes under one edge gateway (or one vApp) and
//! answers concurrent writers with conflicts. Mutations that touch the same
//! parent therefore queue on one interned mutex per key.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use vcd_sdk::{OpContext, Urn};

use crate::error::{KernelError, KernelResult};
use crate::identity::ParentContext;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    EdgeGateway(Urn),
    VApp {
        org: String,
        vdc: String,
        vapp: String,
    },
    VdcGroup(Urn),
    Named(String),
}

impl LockKey {
    pub fn vapp(org: &str, vdc: &str, vapp: &str) -> Self {
        LockKey::VApp {
            org: org.to_string(),
            vdc: vdc.to_string(),
            vapp: vapp.to_string(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::EdgeGateway(urn) => write!(f, "edge-gateway:{urn}"),
            LockKey::VApp { org, vdc, vapp } => write!(f, "vapp:{org}/{vdc}/{vapp}"),
            LockKey::VdcGroup(urn) => write!(f, "vdc-group:{urn}"),
            LockKey::Named(name) => f.write_str(name),
        }
    }
}

/// Keys for a child of an edge gateway.
///
/// An edge gateway that was moved into a VDC group shares the group's lock so
/// that group-level operations and gateway children exclude each other.
pub fn edge_gateway_keys(owner: &ParentContext, edge_gateway: &Urn) -> Vec<LockKey> {
    match owner {
        ParentContext::VdcGroup { group, .. } => vec![LockKey::VdcGroup(group.clone())],
        _ => vec![LockKey::EdgeGateway(edge_gateway.clone())],
    }
}

/// Held locks; dropping the guard releases them.
#[derive(Debug)]
pub struct LockGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<LockKey>,
}

impl LockGuard {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

#[derive(Debug, Default)]
pub struct LockBroker {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(table.entry(key.to_string()).or_default())
    }

    pub async fn acquire(&self, ctx: &OpContext, key: LockKey) -> KernelResult<LockGuard> {
        self.acquire_all(ctx, vec![key]).await
    }

    /// Take every key in a fixed global order so two callers asking for
    /// overlapping sets cannot deadlock.
    pub async fn acquire_all(&self, ctx: &OpContext, mut keys: Vec<LockKey>) -> KernelResult<LockGuard> {
        keys.sort_by_key(|key| key.to_string());
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let mutex = self.mutex_for(key);
            debug!(key = %key, "waiting for lock");
            let guard = tokio::select! {
                guard = mutex.lock_owned() => guard,
                err = ctx.expired() => {
                    return Err(KernelError::Cancelled(format!("{err} while waiting for lock {key}")));
                }
            };
            guards.push(guard);
        }
        Ok(LockGuard {
            _guards: guards,
            keys,
        })
    }

    /// Number of interned keys.
    pub fn len(&self) -> usize {
        match self.table.lock() {
            Ok(table) => table.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn edge() -> Urn {
        Urn::new("gateway", "e1")
    }

    #[test]
    fn key_rendering() {
        assert_eq!(
            LockKey::EdgeGateway(edge()).to_string(),
            "edge-gateway:urn:vcloud:gateway:e1"
        );
        assert_eq!(LockKey::vapp("org", "vdc", "web").to_string(), "vapp:org/vdc/web");
    }

    #[test]
    fn group_owned_gateway_locks_the_group() {
        let group = Urn::new("vdcgroup", "g1");
        let owner = ParentContext::VdcGroup {
            org: "org".into(),
            group: group.clone(),
        };
        assert_eq!(edge_gateway_keys(&owner, &edge()), vec![LockKey::VdcGroup(group)]);
        let owner = ParentContext::Vdc {
            org: "org".into(),
            vdc: Urn::new("vdc", "v1"),
        };
        assert_eq!(edge_gateway_keys(&owner, &edge()), vec![LockKey::EdgeGateway(edge())]);
    }

    #[tokio::test]
    async fn same_key_is_exclusive_and_released_on_drop() {
        let broker = Arc::new(LockBroker::new());
        let ctx = OpContext::new();
        let first = broker.acquire(&ctx, LockKey::EdgeGateway(edge())).await.unwrap();

        let contender = {
            let broker = Arc::clone(&broker);
            let ctx = ctx.clone();
            tokio::spawn(async move { broker.acquire(&ctx, LockKey::EdgeGateway(edge())).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        let second = contender.await.unwrap().unwrap();
        assert_eq!(second.keys(), &[LockKey::EdgeGateway(edge())]);
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_gives_up() {
        let broker = LockBroker::new();
        let holder_ctx = OpContext::new();
        let _held = broker.acquire(&holder_ctx, LockKey::Named("k".into())).await.unwrap();

        let ctx = OpContext::new();
        ctx.cancel();
        let err = broker.acquire(&ctx, LockKey::Named("k".into())).await.unwrap_err();
        assert!(matches!(err, KernelError::Cancelled(_)));
    }

    #[tokio::test]
    async fn waiter_gives_up_at_its_deadline() {
        let broker = LockBroker::new();
        let _held = broker
            .acquire(&OpContext::new(), LockKey::Named("k".into()))
            .await
            .unwrap();

        let ctx = OpContext::new().with_timeout(Duration::from_millis(50));
        let err = tokio::time::timeout(
            Duration::from_millis(500),
            broker.acquire(&ctx, LockKey::Named("k".into())),
        )
        .await
        .expect("deadline ends the wait")
        .unwrap_err();
        match err {
            KernelError::Cancelled(message) => {
                assert!(message.contains("deadline exceeded"), "{message}");
                assert!(message.ends_with("while waiting for lock k"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
