//! Scripted broker transport.
//!
//! Each `publish()` pops the next scripted result (defaults to success when the
//! script is exhausted). Individual event ids can be made to fail permanently.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CallLog;
use crate::port::outbound::broker::{BrokerMessage, BrokerTransport, PublishAck, TransportError};

pub struct ScriptedTransport {
    publish_results: Mutex<VecDeque<Result<(), TransportError>>>,
    failing_events: Mutex<HashMap<String, TransportError>>,
    connect_results: Mutex<VecDeque<Result<(), TransportError>>>,
    ping_result: Mutex<Result<(), TransportError>>,
    close_result: Mutex<Result<(), TransportError>>,
    published: Mutex<Vec<BrokerMessage>>,
    publish_count: Arc<AtomicU32>,
    connect_count: Arc<AtomicU32>,
    sequence: AtomicU64,
    closed: AtomicBool,
    log: Option<CallLog>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            publish_results: Mutex::new(VecDeque::new()),
            failing_events: Mutex::new(HashMap::new()),
            connect_results: Mutex::new(VecDeque::new()),
            ping_result: Mutex::new(Ok(())),
            close_result: Mutex::new(Ok(())),
            published: Mutex::new(Vec::new()),
            publish_count: Arc::new(AtomicU32::new(0)),
            connect_count: Arc::new(AtomicU32::new(0)),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            log: None,
        }
    }

    pub fn with_publish_results(self, results: Vec<Result<(), TransportError>>) -> Self {
        *self.publish_results.lock() = results.into();
        self
    }

    /// Fail every publish of `event_id` with `error`.
    pub fn with_failing_event(self, event_id: &str, error: TransportError) -> Self {
        self.failing_events
            .lock()
            .insert(event_id.to_string(), error);
        self
    }

    pub fn with_connect_results(self, results: Vec<Result<(), TransportError>>) -> Self {
        *self.connect_results.lock() = results.into();
        self
    }

    pub fn with_ping_result(self, result: Result<(), TransportError>) -> Self {
        *self.ping_result.lock() = result;
        self
    }

    pub fn with_close_result(self, result: Result<(), TransportError>) -> Self {
        *self.close_result.lock() = result;
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Every message the broker accepted, in publish order.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published.lock().clone()
    }

    /// Total publish attempts, successful or not.
    pub fn publish_count(&self) -> u32 {
        self.publish_count.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn event_id_of(message: &BrokerMessage) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(&message.payload)
        .ok()?
        .get("eventId")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.connect_results
            .lock()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn publish(&self, message: &BrokerMessage) -> Result<PublishAck, TransportError> {
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        if let Some(id) = event_id_of(message) {
            if let Some(err) = self.failing_events.lock().get(&id) {
                return Err(err.clone());
            }
        }

        let scripted = self.publish_results.lock().pop_front();
        if let Some(Err(err)) = scripted {
            return Err(err);
        }

        self.published.lock().push(message.clone());
        Ok(PublishAck {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn ping(&self) -> Result<Duration, TransportError> {
        self.ping_result
            .lock()
            .clone()
            .map(|()| Duration::from_millis(1))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(log) = &self.log {
            log.record("broker.close");
        }
        self.closed.store(true, Ordering::SeqCst);
        self.close_result.lock().clone()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
