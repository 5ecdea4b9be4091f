//! Maintenance reference runtime demo scenarios.
//!
//! Each scenario wires up real Custodian components (batch writer, recorder,
//! verifier) over a store and drives them with mock maintenance data.
//! `AuditRuntime` is the shared wiring.

pub mod chain_rebuild;
pub mod concurrent_load;
pub mod tamper_detection;
pub mod work_order_lifecycle;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use custodian_audit::{new_chain_lock, BatchWriter, InMemoryAuditStore, Recorder, WriterStats};
use custodian_contracts::{
    context::{new_correlation_id, RequestContext},
    error::{CustodianError, CustodianResult},
};
use custodian_core::traits::{AuditStore, SystemClock, StaticContextProvider};
use custodian_policy::AuditPolicy;
use custodian_verify::ChainVerifier;

/// Embedded audit policy for the maintenance runtime.
pub const MAINTENANCE_POLICY: &str = include_str!("../../policies/maintenance.toml");

/// A running audit stack: writer task, recorder and verifier over one store.
pub struct AuditRuntime<S> {
    pub store: Arc<S>,
    pub recorder: Recorder,
    pub verifier: ChainVerifier,
    /// Swap this to change who the next recorded events are attributed to.
    pub context: Arc<StaticContextProvider>,
    shutdown: CancellationToken,
    writer_task: JoinHandle<()>,
}

impl AuditRuntime<InMemoryAuditStore> {
    /// An in-memory stack using the embedded maintenance policy.
    pub async fn in_memory() -> CustodianResult<Self> {
        let policy = AuditPolicy::from_toml_str(MAINTENANCE_POLICY)?;
        Self::start(Arc::new(InMemoryAuditStore::new()), policy).await
    }
}

impl<S: AuditStore + 'static> AuditRuntime<S> {
    /// Spawn the writer over `store` and run the verifier's preflight.
    pub async fn start(store: Arc<S>, policy: AuditPolicy) -> CustodianResult<Self> {
        let shutdown = CancellationToken::new();
        let chain_lock = new_chain_lock();
        let dyn_store: Arc<dyn AuditStore> = store.clone();

        let (handle, writer_task) = BatchWriter::spawn(
            dyn_store.clone(),
            policy.writer().clone(),
            shutdown.clone(),
            chain_lock.clone(),
        );

        let context = Arc::new(StaticContextProvider::new(RequestContext::system()));
        let recorder = Recorder::new(handle, context.clone(), Arc::new(SystemClock), policy);
        let verifier = ChainVerifier::new(dyn_store, recorder.clone(), chain_lock);

        let runtime = Self {
            store,
            recorder,
            verifier,
            context,
            shutdown,
            writer_task,
        };
        let preflight = runtime.verifier.preflight().await;
        if let Err(e) = preflight {
            runtime.shutdown().await?;
            return Err(e);
        }
        Ok(runtime)
    }

    /// Attribute subsequent events to `user` acting through `ip`.
    pub fn act_as(&self, user_id: &str, user_name: &str, ip: &str) {
        self.context.set(RequestContext {
            user_id: Some(user_id.to_string()),
            user_name: Some(user_name.to_string()),
            ip_address: Some(ip.to_string()),
            user_agent: Some("cmms-web/4.2".to_string()),
            session_id: Some(format!("sess-{}", user_id)),
            correlation_id: Some(new_correlation_id()),
            http_method: None,
            request_url: None,
        });
    }

    /// Stop accepting events, drain the queue, and wait for the writer.
    pub async fn shutdown(self) -> CustodianResult<WriterStats> {
        let stats_handle = self.recorder.writer().clone();
        self.shutdown.cancel();
        self.writer_task
            .await
            .map_err(|e| CustodianError::Persistence {
                reason: format!("audit writer task failed: {}", e),
            })?;
        let stats = stats_handle.stats();
        info!(
            persisted = stats.persisted,
            lost = stats.lost,
            "audit runtime stopped"
        );
        Ok(stats)
    }
}
