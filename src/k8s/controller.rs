use super::access::ResourceAccess;
use super::resource_meta::ResourceMeta;
use crate::watch::WatchEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a controller is constructed from for one event
#[derive(Clone)]
pub struct ControllerContext {
    /// Private copy of the watched resource's descriptor
    pub resource: ResourceMeta,
    pub event: WatchEvent,
    pub access: Arc<dyn ResourceAccess>,
    /// Logging context for this event's reconciliation
    pub span: tracing::Span,
    pub finalizer: Option<String>,
}

impl std::fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerContext")
            .field("resource", &self.resource.name())
            .field("event", &self.event.event_type)
            .field("finalizer", &self.finalizer)
            .finish_non_exhaustive()
    }
}

/// Reconciliation logic for one event.
///
/// The same change can arrive more than once (stream plus polling sweep), so
/// implementations must be idempotent. Failures are the controller's own
/// business; nothing retries them.
#[async_trait]
pub trait Controller: Send {
    async fn execute(&mut self);
}

/// Builds a fresh [`Controller`] per event
pub trait ControllerFactory: Send + Sync + 'static {
    fn create(&self, context: ControllerContext) -> Box<dyn Controller>;
}

impl<F, C> ControllerFactory for F
where
    F: Fn(ControllerContext) -> C + Send + Sync + 'static,
    C: Controller + 'static,
{
    fn create(&self, context: ControllerContext) -> Box<dyn Controller> {
        Box::new(self(context))
    }
}
