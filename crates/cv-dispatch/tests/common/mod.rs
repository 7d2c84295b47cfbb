//! Shared test doubles for dispatcher, route and manager tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cv_dispatch::{Provider, ProviderError, RawMessage};

/// Lifecycle events shared between providers, to check start/stop ordering
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Provider serving scripted batches and recording every acknowledgment
pub struct MockProvider {
    name: String,
    batches: Mutex<VecDeque<Vec<RawMessage>>>,
    fetch_calls: AtomicU32,
    /// Fail the n-th fetch call (1-based)
    fail_fetch_on_call: Option<u32>,
    fail_start: bool,
    fail_confirm: bool,
    panic_on_confirm: bool,
    fetch_delay_ms: u64,
    confirmed: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    events: EventLog,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            batches: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicU32::new(0),
            fail_fetch_on_call: None,
            fail_start: false,
            fail_confirm: false,
            panic_on_confirm: false,
            fetch_delay_ms: 0,
            confirmed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a batch whose message bodies equal their ids
    pub fn with_batch(self, ids: &[&str]) -> Self {
        let batch = ids.iter().map(|id| RawMessage::new(*id, *id)).collect();
        self.with_messages(batch)
    }

    pub fn with_messages(self, batch: Vec<RawMessage>) -> Self {
        self.batches.lock().push_back(batch);
        self
    }

    pub fn failing_fetch_on_call(mut self, call: u32) -> Self {
        self.fail_fetch_on_call = Some(call);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_confirm(mut self) -> Self {
        self.fail_confirm = true;
        self
    }

    pub fn panicking_confirm(mut self) -> Self {
        self.panic_on_confirm = true;
        self
    }

    pub fn with_fetch_delay(mut self, delay_ms: u64) -> Self {
        self.fetch_delay_ms = delay_ms;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn confirmed(&self) -> Vec<String> {
        self.confirmed.lock().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn fetch_messages(&self) -> Result<Vec<RawMessage>, ProviderError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fetch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.fetch_delay_ms)).await;
        }

        if self.fail_fetch_on_call == Some(call) {
            return Err(ProviderError::Connection(format!("{} connection lost", self.name)));
        }

        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    async fn confirm_message(&self, message: &RawMessage) -> Result<(), ProviderError> {
        if self.panic_on_confirm {
            panic!("{} client poisoned", self.name);
        }
        if self.fail_confirm {
            return Err(ProviderError::NotFound(message.id.clone()));
        }
        self.confirmed.lock().push(message.id.clone());
        Ok(())
    }

    async fn message_not_processed(&self, message: &RawMessage) -> Result<(), ProviderError> {
        self.released.lock().push(message.id.clone());
        Ok(())
    }

    async fn start(&self) -> Result<(), ProviderError> {
        if self.fail_start {
            return Err(ProviderError::Connection(format!("{} unreachable", self.name)));
        }
        self.events.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) {
        self.events.lock().push(format!("stop:{}", self.name));
    }
}

/// Counts handler invocations
#[derive(Default)]
pub struct CallCounter(AtomicU32);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}
