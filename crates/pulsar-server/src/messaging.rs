//! Queue-driven job control. Managers are bound to topics of an abstract
//! message exchange; the wire transport behind it is pluggable.

use crate::endpoint;
use crate::error::Result;
use pulsar_core::constants::managers::DEFAULT_MANAGER_NAME;
use pulsar_core::model::{JobId, JobStatus};
use pulsar_manager::{StateChangeCallback, StatefulManagerProxy};
use pulsar_staging::LaunchRequest;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CONSUME_WAIT: Duration = Duration::from_millis(100);

/// Publish/consume over named topics. Each message is handed to one consumer
/// at most once; there is no acknowledgement or republish.
pub trait MessageExchange: Send + Sync {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()>;

    /// Delivers messages of `topic` to `handler` until `check` returns false.
    /// A handler error is logged and the message is dropped.
    fn consume(
        &self,
        topic: &str,
        handler: &dyn Fn(Value) -> Result<()>,
        check: &dyn Fn() -> bool,
    ) -> Result<()>;
}

/// Process-local exchange. Messages published to a topic wait in a FIFO
/// queue until a consumer or [`InMemoryExchange::take`] picks them up.
#[derive(Default)]
pub struct InMemoryExchange {
    queues: Mutex<HashMap<String, VecDeque<Value>>>,
    published: Condvar,
}

impl InMemoryExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every message waiting on `topic`.
    pub fn take(&self, topic: &str) -> Vec<Value> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get_mut(topic)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn next(&self, topic: &str, check: &dyn Fn() -> bool) -> Option<Value> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !check() {
                return None;
            }
            if let Some(message) = queues.get_mut(topic).and_then(VecDeque::pop_front) {
                return Some(message);
            }
            queues = self
                .published
                .wait_timeout(queues, CONSUME_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl MessageExchange for InMemoryExchange {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(topic.to_string())
            .or_default()
            .push_back(payload.clone());
        self.published.notify_all();
        Ok(())
    }

    fn consume(
        &self,
        topic: &str,
        handler: &dyn Fn(Value) -> Result<()>,
        check: &dyn Fn() -> bool,
    ) -> Result<()> {
        while let Some(message) = self.next(topic, check) {
            if let Err(e) = handler(message) {
                tracing::warn!("Failed to handle message on '{}': {}", topic, e);
            }
        }
        Ok(())
    }
}

/// `setup` for the default manager, `setup_<manager>` for the others.
pub fn topic_name(base: &str, manager_name: &str) -> String {
    if manager_name == DEFAULT_MANAGER_NAME {
        base.to_string()
    } else {
        format!("{}_{}", base, manager_name)
    }
}

#[derive(Debug, Deserialize)]
struct JobMessage {
    job_id: JobId,
}

/// Consumer threads of one manager's topics.
pub struct QueueBinding {
    active: Arc<AtomicBool>,
    consumers: Vec<JoinHandle<()>>,
}

impl QueueBinding {
    /// Stops consuming and waits for the consumer threads.
    pub fn stop(self) {
        self.active.store(false, Ordering::SeqCst);
        for consumer in self.consumers {
            if consumer.join().is_err() {
                tracing::error!("A queue consumer thread panicked");
            }
        }
    }
}

/// Consumes `setup`, `kill` and `status` messages for `manager` and publishes
/// every state change as a full status on `status_update`.
pub fn bind_manager_to_queue(
    manager: Arc<StatefulManagerProxy>,
    exchange: Arc<dyn MessageExchange>,
) -> QueueBinding {
    let name = manager.name().to_string();
    let status_topic = topic_name("status_update", &name);

    let weak: Weak<StatefulManagerProxy> = Arc::downgrade(&manager);
    let publisher = exchange.clone();
    let update_topic = status_topic.clone();
    let callback: StateChangeCallback = Arc::new(move |job_id: &JobId, status: JobStatus| {
        let Some(manager) = weak.upgrade() else {
            return;
        };
        let published = publish_status(
            manager.as_ref(),
            publisher.as_ref(),
            &update_topic,
            job_id,
            status,
        );
        if let Err(e) = published {
            tracing::warn!("Failed to publish status of job '{}': {}", job_id, e);
        }
    });
    manager.set_state_change_callback(callback);

    let active = Arc::new(AtomicBool::new(true));
    let mut consumers = Vec::new();
    for base in ["setup", "kill", "status"] {
        let topic = topic_name(base, &name);
        let manager = manager.clone();
        let exchange = exchange.clone();
        let active = active.clone();
        let status_topic = status_topic.clone();
        tracing::info!("Manager '{}' consuming topic '{}'", name, topic);
        consumers.push(thread::spawn(move || {
            let handler = |message: Value| -> Result<()> {
                match base {
                    "setup" => handle_setup(&manager, message),
                    "kill" => {
                        let message: JobMessage = serde_json::from_value(message)?;
                        Ok(manager.kill(&message.job_id)?)
                    }
                    _ => {
                        let message: JobMessage = serde_json::from_value(message)?;
                        let status = manager.get_status(&message.job_id)?;
                        publish_status(
                            &manager,
                            exchange.as_ref(),
                            &status_topic,
                            &message.job_id,
                            status,
                        )
                    }
                }
            };
            let check = || active.load(Ordering::SeqCst);
            if let Err(e) = exchange.consume(&topic, &handler, &check) {
                tracing::error!("Consumer of '{}' stopped: {}", topic, e);
            }
        }));
    }
    QueueBinding { active, consumers }
}

/// A setup message is a launch request; its `setup_params` create the job
/// directory before the launch.
fn handle_setup(manager: &StatefulManagerProxy, message: Value) -> Result<()> {
    let mut request: LaunchRequest = serde_json::from_value(message)?;
    let mut params = request.setup_params.clone().unwrap_or_default();
    if params.job_id.is_none() {
        params.job_id = Some(request.job_id.to_string());
    }
    let job_config = endpoint::setup_job(manager, &params)?;
    request.job_id = job_config.job_id;
    endpoint::submit_job(manager, request)
}

fn publish_status(
    manager: &StatefulManagerProxy,
    exchange: &dyn MessageExchange,
    topic: &str,
    job_id: &JobId,
    status: JobStatus,
) -> Result<()> {
    let payload = endpoint::full_status(manager, job_id, status)?;
    let payload = serde_json::to_value(payload)?;
    exchange.publish(topic, &payload)
}
