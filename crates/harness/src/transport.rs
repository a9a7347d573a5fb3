use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use tessera_storage::{
    Method, RemoteRequest, RemoteResponse, SqliteBackend, Transport, TransportError,
};
use tokio::time::Instant;

/// A scripted failure for the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Status(u16),
    Timeout,
    Network,
}

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: Method,
    pub path: String,
    pub at: Instant,
}

/// Wraps a backend, failing requests from a script before passing the
/// rest through. Records every request it sees.
pub struct FaultyTransport {
    backend: Rc<SqliteBackend>,
    faults: RefCell<VecDeque<Fault>>,
    sent: RefCell<Vec<SentRequest>>,
}

impl FaultyTransport {
    pub fn new(backend: Rc<SqliteBackend>) -> Self {
        Self {
            backend,
            faults: RefCell::new(VecDeque::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, fault: Fault) {
        self.faults.borrow_mut().push_back(fault);
    }

    pub fn fail_next_n(&self, fault: Fault, count: usize) {
        for _ in 0..count {
            self.fail_next(fault.clone());
        }
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.borrow().clone()
    }

    pub fn sent_with(&self, method: Method) -> Vec<SentRequest> {
        self.sent
            .borrow()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.sent.borrow_mut().clear();
    }
}

#[async_trait(?Send)]
impl Transport for FaultyTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.sent.borrow_mut().push(SentRequest {
            method: request.method,
            path: request.path.clone(),
            at: Instant::now(),
        });
        let fault = self.faults.borrow_mut().pop_front();
        match fault {
            Some(Fault::Status(status)) => {
                Ok(RemoteResponse::error(status, format!("injected status {status}")))
            }
            Some(Fault::Timeout) => Err(TransportError::Timeout),
            Some(Fault::Network) => Err(TransportError::Network("connection reset".into())),
            None => self.backend.send(request).await,
        }
    }
}
