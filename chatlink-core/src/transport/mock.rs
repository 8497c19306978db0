//! Scriptable in-memory transport for tests
//!
//! The factory records every open and hands tests a handle per instance:
//! push events through `events`, inspect what was sent through the
//! transport's `sent` log.

use super::{
    Transport, TransportError, TransportEvent, TransportFactory, WireOutbound,
};
use crate::core_creds::Credential;
use crate::tenant::TenantId;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

pub struct MockTransport {
    sent: Mutex<Vec<WireOutbound>>,
    /// Scripted pairing-code responses; when empty, codes are generated.
    scripted_codes: Mutex<VecDeque<Result<String, TransportError>>>,
    code_counter: AtomicUsize,
    closed: AtomicBool,
    logged_out: AtomicBool,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            scripted_codes: Mutex::new(VecDeque::new()),
            code_counter: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<WireOutbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn was_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Queue a scripted response for the next pairing-code request.
    pub fn script_pairing_code(&self, response: Result<String, TransportError>) {
        self.scripted_codes.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, outbound: WireOutbound) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(outbound);
        Ok(())
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(scripted) = self.scripted_codes.lock().unwrap().pop_front() {
            return scripted;
        }
        let n = self.code_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("CODE-{:04}", n))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One opened transport instance, as seen by a test.
#[derive(Clone)]
pub struct MockHandle {
    pub tenant: TenantId,
    /// Credential the factory was given for this open
    pub credential: Credential,
    pub transport: Arc<MockTransport>,
    /// Push transport events into the supervisor from here
    pub events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
pub struct MockTransportFactory {
    opened: Mutex<Vec<MockHandle>>,
    open_count: AtomicUsize,
    fail_next_open: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Make the next `open` call fail (transient open error).
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Latest opened instance for a tenant, if any.
    pub fn handle_for(&self, tenant: &TenantId) -> Option<MockHandle> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|h| &h.tenant == tenant)
            .cloned()
    }

    pub fn handles(&self) -> Vec<MockHandle> {
        self.opened.lock().unwrap().clone()
    }

    /// Poll until a transport is opened for the tenant or the timeout
    /// elapses. Opens happen inside the supervisor task, so tests need to
    /// wait for them.
    pub async fn wait_for_open(
        &self,
        tenant: &TenantId,
        timeout: Duration,
    ) -> Option<MockHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.handle_for(tenant) {
                return Some(handle);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Like [`wait_for_open`], but skips instances already seen.
    pub async fn wait_for_reopen(
        &self,
        tenant: &TenantId,
        seen: usize,
        timeout: Duration,
    ) -> Option<MockHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let opened = self.opened.lock().unwrap();
                let nth = opened
                    .iter()
                    .filter(|h| &h.tenant == tenant)
                    .nth(seen)
                    .cloned();
                if let Some(handle) = nth {
                    return Some(handle);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open(
        &self,
        tenant: &TenantId,
        credential: Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Open("scripted open failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        let transport = Arc::new(MockTransport::new());
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push(MockHandle {
            tenant: tenant.clone(),
            credential,
            transport: transport.clone(),
            events: tx,
        });
        Ok((transport, rx))
    }
}
