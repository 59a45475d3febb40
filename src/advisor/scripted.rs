//! Advisor that replays a fixed script, for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Advice, AdvisorError, AdvisorRequest, FixAdvisor};

/// Replays scripted outcomes in order; answers "no fix" once the script runs out
#[derive(Debug, Default)]
pub struct ScriptedAdvisor {
    script: Mutex<VecDeque<Result<Advice, AdvisorError>>>,
    requests: Mutex<Vec<AdvisorRequest>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedAdvisor {
    pub fn new(script: Vec<Result<Advice, AdvisorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<AdvisorRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FixAdvisor for ScriptedAdvisor {
    async fn propose(&self, request: &AdvisorRequest) -> Result<Advice, AdvisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| {
            Ok(Advice::NoFix {
                reason: "script exhausted".to_string(),
            })
        })
    }
}
