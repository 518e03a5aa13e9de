//! Shared test double: a transport that records every call

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use sockethub::{EntityIdentity, Transport, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Send(Vec<u8>),
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Vec<u8>),
    Close(Option<u16>, Option<String>),
}

/// Records every transport invocation for later assertion, with optional
/// failure injection
pub struct RecordingTransport {
    identity: EntityIdentity,
    calls: Mutex<Vec<TransportCall>>,
    closed: AtomicBool,
    fail_next_subscribe: AtomicBool,
}

impl RecordingTransport {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Arc<Self> {
        Arc::new(Self {
            identity: EntityIdentity::new(id.into(), name.into()),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_next_subscribe: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Every subsequent `send` fails with `TransportError::Closed`
    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_subscribe(&self) {
        self.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent().len()
    }

    pub fn publishes(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish(topic, bytes) => {
                    Some((topic, serde_json::from_slice(&bytes).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Unsubscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, bytes: &[u8]) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Send(bytes.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<()> {
        if self.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(TransportError::other("injected subscribe failure"));
        }
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Unsubscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &str, bytes: &[u8]) -> TransportResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Publish(topic.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn close(&self, code: Option<u16>, reason: Option<&str>) -> TransportResult<()> {
        self.calls.lock().unwrap().push(TransportCall::Close(
            code,
            reason.map(|reason| reason.to_string()),
        ));
        Ok(())
    }

    fn data(&self) -> EntityIdentity {
        self.identity.clone()
    }
}
