//! In-memory endpoint used by the lifecycle tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::lxd::errors::{Target, endpoint_error};
use crate::lxd::{InstanceFull, InstanceServer, InstanceStatePut, InstancesPost, Operation};

#[derive(Debug, Clone)]
enum Outcome {
    Fail(String),
    Hang,
}

/// Endpoint double. Calls are keyed like `stop test-instance`,
/// `delete test-instance`, `create test-instance`, `get test-instance`,
/// `list` and `profiles`; every call and every wait is recorded in order.
#[derive(Default)]
pub struct MemoryInstanceServer {
    profiles: Vec<String>,
    instances: Vec<InstanceFull>,
    call_errors: HashMap<String, (u16, String)>,
    wait_outcomes: HashMap<String, Outcome>,
    calls: Arc<Mutex<Vec<String>>>,
    created: Mutex<Vec<InstancesPost>>,
}

impl MemoryInstanceServer {
    pub fn new(profiles: &[&str]) -> Self {
        Self {
            profiles: profiles.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_instance(mut self, instance: InstanceFull) -> Self {
        self.instances.push(instance);
        self
    }

    /// Make the call `key` answer with an error envelope.
    pub fn fail_call(mut self, key: &str, status: u16, message: &str) -> Self {
        self.call_errors
            .insert(key.to_string(), (status, message.to_string()));
        self
    }

    /// Make the operation started by `key` finish in failure.
    pub fn fail_wait(mut self, key: &str, message: &str) -> Self {
        self.wait_outcomes
            .insert(key.to_string(), Outcome::Fail(message.to_string()));
        self
    }

    /// Make the operation started by `key` never finish on its own.
    pub fn hang_wait(mut self, key: &str) -> Self {
        self.wait_outcomes.insert(key.to_string(), Outcome::Hang);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<InstancesPost> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn check(&self, key: &str, operation: &str, target: Target) -> Result<()> {
        match self.call_errors.get(key) {
            Some((status, message)) => Err(endpoint_error(operation, &target, *status, message)),
            None => Ok(()),
        }
    }

    fn operation(&self, key: &str, operation: &str) -> Box<dyn Operation> {
        Box::new(MemoryOperation {
            key: key.to_string(),
            operation: operation.to_string(),
            outcome: self.wait_outcomes.get(key).cloned(),
            calls: self.calls.clone(),
        })
    }

    fn find(&self, name: &str) -> Option<&InstanceFull> {
        self.instances.iter().find(|i| i.instance.name == name)
    }
}

#[async_trait]
impl InstanceServer for MemoryInstanceServer {
    async fn profile_names(&self) -> Result<Vec<String>> {
        self.record("profiles".to_string());
        self.check("profiles", "listing profiles", Target::other("profiles"))?;
        Ok(self.profiles.clone())
    }

    async fn create_instance(&self, args: &InstancesPost) -> Result<Box<dyn Operation>> {
        let key = format!("create {}", args.name);
        self.record(key.clone());
        self.check(&key, "creating instance", Target::other(&args.name))?;
        self.created.lock().unwrap().push(args.clone());
        Ok(self.operation(&key, "creating instance"))
    }

    async fn update_instance_state(
        &self,
        name: &str,
        state: &InstanceStatePut,
    ) -> Result<Box<dyn Operation>> {
        let key = format!("{} {name}", state.action);
        self.record(format!(
            "{key} timeout={} force={}",
            state.timeout, state.force
        ));
        let operation = format!("changing state of instance ({})", state.action);
        self.check(&key, &operation, Target::instance(name))?;
        Ok(self.operation(&key, &operation))
    }

    async fn instance_full(&self, name: &str) -> Result<InstanceFull> {
        let key = format!("get {name}");
        self.record(key.clone());
        self.check(&key, "fetching instance", Target::instance(name))?;
        self.find(name).cloned().ok_or_else(|| {
            endpoint_error(
                "fetching instance",
                &Target::instance(name),
                404,
                "Instance not found",
            )
        })
    }

    async fn instances_full(&self) -> Result<Vec<InstanceFull>> {
        self.record("list".to_string());
        self.check("list", "listing instances", Target::other("instances"))?;
        Ok(self.instances.clone())
    }

    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>> {
        let key = format!("delete {name}");
        self.record(key.clone());
        self.check(&key, "deleting instance", Target::instance(name))?;
        Ok(self.operation(&key, "deleting instance"))
    }
}

struct MemoryOperation {
    key: String,
    operation: String,
    outcome: Option<Outcome>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Operation for MemoryOperation {
    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        self.calls.lock().unwrap().push(format!("wait {}", self.key));
        match &self.outcome {
            None => Ok(()),
            Some(Outcome::Fail(message)) => Err(Error::AsyncOperation {
                operation: self.operation.clone(),
                message: message.clone(),
            }),
            Some(Outcome::Hang) => {
                cancel.cancelled().await;
                Err(Error::Cancelled {
                    operation: self.operation.clone(),
                })
            }
        }
    }
}
