//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::clock::{Clock, Sleeper, after};
use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::marketplace::{ChatSender, MarketplaceError};

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = after(*now, duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Sleeper that records requested delays and returns immediately,
/// optionally advancing a [`ManualClock`] by the same amount.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advancing(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(Vec::new()),
            clock: Some(clock),
        })
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}

/// Transport answering from a script; repeats the last entry once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn statuses(statuses: &[u16]) -> Arc<Self> {
        Self::new(
            statuses
                .iter()
                .map(|&status| Ok(HttpResponse::new(status, "")))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            return script.pop_front().unwrap();
        }
        match script.front() {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(TransportError::Timeout { url })) => Err(TransportError::Timeout { url: url.clone() }),
            Some(Err(TransportError::InvalidRequest(reason))) => {
                Err(TransportError::InvalidRequest(reason.clone()))
            }
            Some(Err(_)) => Err(TransportError::Connection {
                url: request.url.clone(),
                reason: "scripted failure".to_owned(),
            }),
            None => Ok(HttpResponse::new(200, "")),
        }
    }
}

/// Chat sender that records what would have been sent.
#[derive(Debug, Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSender for RecordingChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), MarketplaceError> {
        self.sent.lock().unwrap().push((chat_id, text.to_owned()));
        Ok(())
    }
}
