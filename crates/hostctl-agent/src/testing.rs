//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use hostctl_proto::{CallerId, Command, Reply};
use hostctl_telegram::{Inbound, Transport, TransportError};

use crate::agent::Handler;

pub const OWNER: i64 = 42;
pub const STRANGER: i64 = 7;

/// Inbound command parsed from chat text
pub fn inbound(caller: i64, text: &str) -> Inbound {
    Inbound {
        chat_id: caller,
        command: Command::parse(text, CallerId(caller)).unwrap(),
    }
}

/// Transport that replays scripted poll results and records replies
///
/// Once the script is exhausted, polling waits forever.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<std::result::Result<Vec<Inbound>, TransportError>>>,
    sent: Mutex<Vec<(i64, Reply)>>,
    polls: AtomicUsize,
    acknowledged: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(self, batch: Vec<Inbound>) -> Self {
        self.script.lock().unwrap().push_back(Ok(batch));
        self
    }

    pub fn push_error(self, error: TransportError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn sent(&self) -> Vec<(i64, Reply)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|(_, reply)| reply.as_text().to_string())
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn next_commands(&self) -> hostctl_telegram::Result<Vec<Inbound>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn send(&self, chat_id: i64, reply: &Reply) -> hostctl_telegram::Result<()> {
        self.sent.lock().unwrap().push((chat_id, reply.clone()));
        Ok(())
    }

    async fn acknowledge(&self) -> hostctl_telegram::Result<()> {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that counts calls and answers with a fixed text
pub struct MockHandler {
    reply: String,
    ack: Option<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockHandler {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ack: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_ack(mut self, ack: &str) -> Self {
        self.ack = Some(ack.to_string());
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn acknowledgement(&self) -> Option<String> {
        self.ack.clone()
    }

    async fn handle(&self, _command: &Command) -> Result<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("tool exploded: token=123:secret");
        }
        Ok(Reply::text(self.reply.clone()))
    }
}
