//! In-process broker double for tests

use crate::metagov::{GovernanceBroker, MetagovError, ProcessData, ProcessStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeBroker {
    calls: Mutex<Vec<String>>,
    process: Mutex<Option<ProcessData>>,
    action_result: Mutex<Value>,
    failing: AtomicBool,
}

impl FakeBroker {
    pub fn with_process(process: ProcessData) -> Self {
        let broker = Self::default();
        *broker.process.lock().unwrap() = Some(process);
        broker
    }

    pub fn with_action_result(result: Value) -> Self {
        let broker = Self::default();
        *broker.action_result.lock().unwrap() = result;
        broker
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_process(&self, process: ProcessData) {
        *self.process.lock().unwrap() = Some(process);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), MetagovError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MetagovError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn current(&self) -> Result<ProcessData, MetagovError> {
        self.process
            .lock()
            .unwrap()
            .clone()
            .ok_or(MetagovError::MissingLocation)
    }
}

/// A pending process at `/api/internal/process/{process_type}/1`
pub fn pending(process_type: &str, outcome: Value) -> ProcessData {
    ProcessData {
        location: format!("/api/internal/process/{}/1", process_type),
        status: ProcessStatus::Pending,
        outcome: Some(outcome),
        errors: None,
    }
}

#[async_trait]
impl GovernanceBroker for FakeBroker {
    async fn register_community(
        &self,
        slug: &str,
        readable_name: &str,
        plugins: Vec<Value>,
    ) -> Result<Value, MetagovError> {
        self.record(format!("register {} {} {}", slug, readable_name, plugins.len()))?;
        Ok(json!({"name": slug, "readable_name": readable_name, "plugins": plugins}))
    }

    async fn start_process(
        &self,
        community: &str,
        process_type: &str,
        payload: Value,
    ) -> Result<ProcessData, MetagovError> {
        self.record(format!("start {} {} {}", community, process_type, payload))?;
        self.current()
    }

    async fn get_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError> {
        self.record(format!("get {} {}", community, location))?;
        self.current()
    }

    async fn close_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError> {
        self.record(format!("close {} {}", community, location))?;
        let mut process = self.current()?;
        process.status = ProcessStatus::Completed;
        self.set_process(process.clone());
        Ok(process)
    }

    async fn perform_action(
        &self,
        community: &str,
        action_type: &str,
        parameters: Value,
    ) -> Result<Value, MetagovError> {
        self.record(format!("action {} {} {}", community, action_type, parameters))?;
        Ok(self.action_result.lock().unwrap().clone())
    }

    async fn get_resource(
        &self,
        community: &str,
        name: &str,
        _params: &[(String, String)],
    ) -> Result<Value, MetagovError> {
        self.record(format!("resource {} {}", community, name))?;
        Ok(self.action_result.lock().unwrap().clone())
    }
}
