//! Refresh loop engine
//!
//! Runs connect → request → parse → deliver → teardown cycles. Manual and
//! scheduled cycles share one lock, so at most one cycle is ever in flight.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use crate::config::ServerConfig;
use crate::error::RefreshError;
use crate::image::ImageAndMetadata;
use crate::protocol;
use crate::receiver::{ImageReceiver, ImageSizeProvider, ReceiveHandler, RefreshDelayProvider};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Scheduled,
}

/// Polls the image server on a schedule
///
/// Cloning is cheap and every clone drives the same schedule and lock.
#[derive(Clone)]
pub struct RefreshLoop {
    inner: Arc<Inner>,
}

struct Inner {
    server: ServerConfig,
    size_provider: Arc<dyn ImageSizeProvider>,
    delay_provider: Arc<dyn RefreshDelayProvider>,
    handler: Arc<dyn ReceiveHandler>,
    cycle_lock: Mutex<()>,
    armed: AtomicBool,
    completed: AtomicU64,
}

impl RefreshLoop {
    pub fn new(
        server: ServerConfig,
        size_provider: Arc<dyn ImageSizeProvider>,
        delay_provider: Arc<dyn RefreshDelayProvider>,
        handler: Arc<dyn ReceiveHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                server,
                size_provider,
                delay_provider,
                handler,
                cycle_lock: Mutex::new(()),
                armed: AtomicBool::new(false),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Use one receiver for size, delay and delivery
    pub fn with_receiver<R>(server: ServerConfig, receiver: Arc<R>) -> Self
    where
        R: ImageReceiver + 'static,
    {
        Self::new(server, receiver.clone(), receiver.clone(), receiver)
    }

    /// Run one cycle now, then keep refreshing in the background
    ///
    /// The schedule lives on its own tokio task and runs until the runtime
    /// shuts down. Calling this again runs another immediate cycle but does not
    /// arm a second schedule.
    pub async fn start(&self) {
        self.inner.run_cycle(Trigger::Manual).await;

        if self.inner.armed.swap(true, Ordering::SeqCst) {
            warn!(addr = %self.server().addr(), "RefreshLoop already scheduled");
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_schedule());
        info!(addr = %self.server().addr(), "RefreshLoop started");
    }

    /// Run exactly one cycle, outside the schedule
    ///
    /// Waits for any cycle already in progress. Never fails; errors are logged.
    pub async fn refresh_once(&self) {
        self.inner.run_cycle(Trigger::Manual).await;
    }

    /// Number of cycles finished so far, successful or not
    pub fn completed_cycles(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    pub fn server(&self) -> &ServerConfig {
        &self.inner.server
    }
}

impl std::fmt::Debug for RefreshLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLoop")
            .field("server", self.server())
            .field("scheduled", &self.is_scheduled())
            .field("completed_cycles", &self.completed_cycles())
            .finish()
    }
}

impl Inner {
    async fn run_schedule(self: Arc<Self>) {
        loop {
            let delay = self.delay_provider.refresh_delay();
            debug!(delay_ms = delay.as_millis() as u64, "run_schedule: next refresh armed");
            tokio::time::sleep(delay).await;
            self.run_cycle(Trigger::Scheduled).await;
        }
    }

    async fn run_cycle(&self, trigger: Trigger) {
        let _guard = self.cycle_lock.lock().await;

        debug!(?trigger, addr = %self.server.addr(), "run_cycle: starting");
        match self.cycle().await {
            Ok(()) => debug!(?trigger, "run_cycle: image delivered"),
            Err(e) => error!(?trigger, kind = failure_kind(&e), error = %e, "Refresh cycle failed"),
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    async fn cycle(&self) -> Result<(), RefreshError> {
        let mut conn = Connection::open(&self.server.addr()).await?;

        let result = AssertUnwindSafe(self.exchange(&mut conn))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RefreshError::Panicked(panic_message(panic.as_ref()))));

        let report = conn.close().await;
        if !report.is_clean() {
            debug!(
                attempted = report.attempted.len(),
                failed = ?report.failed,
                "cycle: teardown incomplete"
            );
        }
        result
    }

    async fn exchange(&self, conn: &mut Connection) -> Result<(), RefreshError> {
        let dimension = self.size_provider.image_dimension();
        protocol::write_request(&mut conn.writer, dimension).await?;

        let header = protocol::read_header(&mut conn.reader).await?;
        info!("Metadata: {}", header.raw_metadata);

        let image = ImageAndMetadata::new(
            header.image_byte_size,
            header.metadata_byte_size,
            header.metadata,
            &mut conn.reader,
        );
        self.handler.on_receive(image).await.map_err(RefreshError::Handler)
    }
}

/// Short label for where a cycle broke down
fn failure_kind(err: &RefreshError) -> &'static str {
    if err.is_connect() {
        "unreachable"
    } else if err.is_protocol() {
        "protocol"
    } else {
        "client"
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
