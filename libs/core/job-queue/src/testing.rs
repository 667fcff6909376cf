//! In-memory doubles for the broker-facing traits

use async_trait::async_trait;
use database::common::RetryPolicy;
use database::redis::{RedisConfig, RedisConnection};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{QueueError, QueueResult};
use crate::record::{JobRecord, StreamRecord};
use crate::traits::{RecordSink, RecordSource, SeenFilter};

/// A connection manager that never reaches a broker, failing fast
pub fn offline_connection() -> Arc<RedisConnection> {
    Arc::new(RedisConnection::with_policy(
        RedisConfig::new("redis://127.0.0.1:1"),
        RetryPolicy::fixed(1, 0),
    ))
}

fn transport_failure(what: &str) -> QueueError {
    QueueError::Connection(database::DatabaseError::ConnectionFailed {
        attempts: 1,
        reason: what.to_string(),
    })
}

/// Hands out queued batches in order, then empty batches
#[derive(Default)]
pub struct FakeSource {
    batches: Mutex<VecDeque<Vec<StreamRecord>>>,
    reclaimable: Mutex<Vec<StreamRecord>>,
    acked: Mutex<Vec<(String, String)>>,
    failing_acks: HashSet<String>,
    prepared: Mutex<u32>,
}

impl FakeSource {
    pub fn with_batches(batches: Vec<Vec<StreamRecord>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            ..Self::default()
        }
    }

    pub fn with_reclaimable(self, records: Vec<StreamRecord>) -> Self {
        *self.reclaimable.lock().unwrap() = records;
        self
    }

    pub fn failing_ack_for(mut self, ids: &[&str]) -> Self {
        self.failing_acks = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn acked_ids(&self) -> Vec<String> {
        self.acked.lock().unwrap().iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn acked(&self) -> Vec<(String, String)> {
        self.acked.lock().unwrap().clone()
    }

    pub fn prepare_calls(&self) -> u32 {
        *self.prepared.lock().unwrap()
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn prepare(&self) -> QueueResult<()> {
        *self.prepared.lock().unwrap() += 1;
        Ok(())
    }

    async fn fetch(&self, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(mut batch) => {
                batch.truncate(count);
                Ok(batch)
            }
            None => {
                tokio::task::yield_now().await;
                Ok(Vec::new())
            }
        }
    }

    async fn acknowledge(&self, stream: &str, id: &str) -> QueueResult<u64> {
        if self.failing_acks.contains(id) {
            return Err(transport_failure("ack failed"));
        }
        self.acked
            .lock()
            .unwrap()
            .push((stream.to_string(), id.to_string()));
        Ok(1)
    }

    async fn reclaim(&self, _min_idle_ms: u64, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let mut reclaimable = self.reclaimable.lock().unwrap();
        let take = count.min(reclaimable.len());
        Ok(reclaimable.drain(..take).collect())
    }
}

/// Records everything published; fails for chosen message ids
#[derive(Default)]
pub struct FakeSink {
    published: Mutex<Vec<JobRecord>>,
    batches: Mutex<usize>,
    failing: HashSet<String>,
}

impl FakeSink {
    pub fn failing_on<'a>(message_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            failing: message_ids.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<JobRecord> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published()
            .iter()
            .map(|record| record.message_id().to_string())
            .collect()
    }

    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap()
    }
}

#[async_trait]
impl RecordSink for FakeSink {
    async fn publish(&self, record: &JobRecord) -> QueueResult<String> {
        if self.failing.contains(record.message_id()) {
            return Err(transport_failure("publish failed"));
        }
        let mut published = self.published.lock().unwrap();
        published.push(record.clone());
        Ok(format!("{}-0", published.len()))
    }

    async fn publish_batch(&self, records: &[JobRecord]) -> QueueResult<Vec<String>> {
        if records.iter().any(|r| self.failing.contains(r.message_id())) {
            return Err(transport_failure("batch failed"));
        }
        *self.batches.lock().unwrap() += 1;
        let mut published = self.published.lock().unwrap();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            published.push(record.clone());
            ids.push(format!("{}-0", published.len()));
        }
        Ok(ids)
    }
}

/// Set-backed filter
#[derive(Default)]
pub struct FakeFilter {
    seen: Mutex<HashSet<String>>,
    lookups: Mutex<usize>,
}

impl FakeFilter {
    pub fn with_seen(keys: &[&str]) -> Self {
        Self {
            seen: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.lock().unwrap().contains(key)
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl SeenFilter for FakeFilter {
    async fn unseen(&self, keys: &[String]) -> QueueResult<Vec<String>> {
        if keys.is_empty() {
            return Err(QueueError::invalid_argument("keys must not be empty"));
        }
        *self.lookups.lock().unwrap() += 1;
        let seen = self.seen.lock().unwrap();
        Ok(keys.iter().filter(|k| !seen.contains(*k)).cloned().collect())
    }

    async fn mark_seen(&self, keys: &[String]) -> QueueResult<()> {
        if keys.is_empty() {
            return Err(QueueError::invalid_argument("keys must not be empty"));
        }
        self.seen.lock().unwrap().extend(keys.iter().cloned());
        Ok(())
    }
}

/// Custom reply for a command; `None` falls back to the broker's defaults
pub type Responder = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// Minimal RESP2 server speaking just enough Redis for connection-level tests
///
/// Defaults: `PING` answers `PONG`, `XREADGROUP` holds the reply for its
/// `BLOCK` time and then answers nil, everything else answers `OK`. Every
/// command received is recorded.
pub struct FakeBroker {
    url: String,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::with_responder(Arc::new(|_: &[String]| -> Option<String> { None })).await
    }

    pub async fn with_responder(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let commands = Arc::new(Mutex::new(Vec::new()));

        let log = commands.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, responder.clone(), log.clone()));
            }
        });

        Self { url, commands }
    }

    /// A connection to this broker that gives up after one attempt
    pub fn connection(&self) -> Arc<RedisConnection> {
        Arc::new(RedisConnection::with_policy(
            RedisConfig::new(self.url.clone()),
            RetryPolicy::fixed(1, 0),
        ))
    }

    /// Received commands whose name matches `name`
    pub fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.first().is_some_and(|c| c.eq_ignore_ascii_case(name)))
            .cloned()
            .collect()
    }
}

async fn serve(mut socket: TcpStream, responder: Responder, log: Arc<Mutex<Vec<Vec<String>>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        while let Some((command, used)) = parse_command(&buf) {
            buf.drain(..used);
            log.lock().unwrap().push(command.clone());

            let reply = match (*responder)(&command) {
                Some(reply) => reply,
                None => default_reply(&command).await,
            };
            if socket.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }

        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn default_reply(command: &[String]) -> String {
    let name = command.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
    match name.as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "XREADGROUP" => {
            let block_ms = command
                .iter()
                .position(|arg| arg.eq_ignore_ascii_case("BLOCK"))
                .and_then(|i| command.get(i + 1))
                .and_then(|ms| ms.parse::<u64>().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(block_ms)).await;
            "*-1\r\n".to_string()
        }
        _ => "+OK\r\n".to_string(),
    }
}

/// Parse one `*N` array of bulk strings; `None` until a full command is buffered
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = parse_header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);

    for _ in 0..count {
        let (len, start) = parse_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }

    Some((args, pos))
}

fn parse_header(buf: &[u8], pos: usize, prefix: u8) -> Option<(usize, usize)> {
    if *buf.get(pos)? != prefix {
        return None;
    }
    let line_len = buf[pos..].windows(2).position(|w| w == b"\r\n")?;
    let value = std::str::from_utf8(&buf[pos + 1..pos + line_len]).ok()?.parse().ok()?;
    Some((value, pos + line_len + 2))
}

/// RESP encoders for scripted replies
pub mod resp {
    pub fn bulk(value: &str) -> String {
        format!("${}\r\n{}\r\n", value.len(), value)
    }

    pub fn array(items: &[String]) -> String {
        format!("*{}\r\n{}", items.len(), items.concat())
    }

    /// `[id, [payload, <payload>]]`
    pub fn entry(id: &str, payload: &str) -> String {
        array(&[bulk(id), array(&[bulk(crate::record::PAYLOAD_FIELD), bulk(payload)])])
    }

    /// `[stream, [entries...]]`
    pub fn stream(name: &str, entries: &[String]) -> String {
        array(&[bulk(name), array(entries)])
    }
}
