//! Redis-backed queue.
//!
//! Layout for queue `q` under prefix `p`:
//!
//! ```text
//! p:q:job:<id>     HASH   one field per record attribute, payload kept as raw JSON
//! p:q:waiting      ZSET   score = priority * 2^32 + sequence
//! p:q:delayed      ZSET   score = due time (ms)
//! p:q:active       ZSET   score = lock expiry (ms)
//! p:q:completed    ZSET   score = finish time (ms)
//! p:q:failed       ZSET   score = finish time (ms)
//! p:q:paused       STRING present while paused
//! p:q:seq          STRING admission counter
//! ```
//!
//! Every transition runs as one Lua script so concurrent workers on any
//! number of hosts observe a single claim per job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::job::{
    after, BackoffKind, BackoffPolicy, JobId, JobLock, JobOptions, JobRecord, JobStatus, NewJob,
};
use super::queue::{QueueBackend, QueueFactory, QueueSettings, QueueStats, STALLED_REASON};
use crate::error::{ErrorCode, JobforgeError, Result};

/// Priorities above this share a score band so scores stay exact in a double.
const MAX_SCORED_PRIORITY: u32 = 1 << 20;

// ═══════════════════════════════════════════════════════════════════════════════
// Lua Scripts
// ═══════════════════════════════════════════════════════════════════════════════

const LUA_HELPERS: &str = r#"
local MAX_MS = 8000000000000000

local function waiting_score(jk)
  local priority = tonumber(redis.call('HGET', jk, 'priority')) or 0
  if priority > 1048576 then priority = 1048576 end
  local seq = tonumber(redis.call('HGET', jk, 'sequence')) or 0
  return priority * 4294967296 + seq
end

local function trim(set, keep, prefix)
  local n = redis.call('ZCARD', set)
  if n > keep then
    local old = redis.call('ZRANGE', set, 0, n - keep - 1)
    for _, id in ipairs(old) do
      redis.call('DEL', prefix .. id)
    end
    redis.call('ZREMRANGEBYRANK', set, 0, n - keep - 1)
  end
end

local function fail_job(id, reason, now, prefix, active, delayed, failed)
  local jk = prefix .. id
  local attempts = (tonumber(redis.call('HGET', jk, 'attempts_made')) or 0) + 1
  local max = tonumber(redis.call('HGET', jk, 'max_attempts')) or 1
  if attempts > max then attempts = max end
  redis.call('ZREM', active, id)
  redis.call('HDEL', jk, 'lock_owner', 'lock_expires')
  redis.call('HSET', jk, 'attempts_made', attempts)
  if attempts < max then
    local delay = tonumber(redis.call('HGET', jk, 'backoff_delay')) or 0
    if redis.call('HGET', jk, 'backoff_kind') == 'exponential' then
      delay = delay * 2 ^ (attempts - 1)
    end
    local due = now + delay
    if due > MAX_MS then due = MAX_MS end
    due = string.format('%d', due)
    redis.call('HSET', jk, 'status', 'delayed', 'scheduled_at', due)
    redis.call('ZADD', delayed, due, id)
  else
    redis.call('HSET', jk, 'status', 'failed', 'finished_at', now, 'failure_reason', reason)
    redis.call('ZADD', failed, now, id)
  end
end
"#;

// KEYS: waiting, delayed, active, paused
// ARGV: now, lock_expires, worker, prefix
const LUA_CLAIM: &str = r#"
local now = tonumber(ARGV[1])
local prefix = ARGV[4]
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
  local jk = prefix .. id
  redis.call('ZREM', KEYS[2], id)
  redis.call('HSET', jk, 'status', 'waiting')
  redis.call('ZADD', KEYS[1], waiting_score(jk), id)
end
if redis.call('EXISTS', KEYS[4]) == 1 then
  return false
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end
local id = popped[1]
local jk = prefix .. id
redis.call('HSET', jk, 'status', 'active', 'lock_owner', ARGV[3], 'lock_expires', ARGV[2])
if redis.call('HEXISTS', jk, 'started_at') == 0 then
  redis.call('HSET', jk, 'started_at', ARGV[1])
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
return redis.call('HGETALL', jk)
"#;

// KEYS: job, active, completed
// ARGV: worker, now, result, keep_completed, prefix, id
const LUA_COMPLETE: &str = r#"
local jk = KEYS[1]
if redis.call('HGET', jk, 'status') ~= 'active' or redis.call('HGET', jk, 'lock_owner') ~= ARGV[1] then
  return false
end
local attempts = (tonumber(redis.call('HGET', jk, 'attempts_made')) or 0) + 1
local max = tonumber(redis.call('HGET', jk, 'max_attempts')) or 1
if attempts > max then attempts = max end
redis.call('HDEL', jk, 'lock_owner', 'lock_expires')
redis.call('HSET', jk, 'status', 'completed', 'finished_at', ARGV[2], 'result', ARGV[3], 'attempts_made', attempts)
redis.call('ZREM', KEYS[2], ARGV[6])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[6])
local snapshot = redis.call('HGETALL', jk)
trim(KEYS[3], tonumber(ARGV[4]), ARGV[5])
return snapshot
"#;

// KEYS: job, active, delayed, failed
// ARGV: worker, now, reason, keep_failed, prefix, id
const LUA_RETRY: &str = r#"
local jk = KEYS[1]
if redis.call('HGET', jk, 'status') ~= 'active' or redis.call('HGET', jk, 'lock_owner') ~= ARGV[1] then
  return false
end
fail_job(ARGV[6], ARGV[3], tonumber(ARGV[2]), ARGV[5], KEYS[2], KEYS[3], KEYS[4])
local snapshot = redis.call('HGETALL', jk)
trim(KEYS[4], tonumber(ARGV[4]), ARGV[5])
return snapshot
"#;

// KEYS: active, delayed, failed
// ARGV: now, prefix, keep_failed, reason
const LUA_RECLAIM: &str = r#"
local now = tonumber(ARGV[1])
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now)
local snapshots = {}
for _, id in ipairs(stalled) do
  fail_job(id, ARGV[4], now, ARGV[2], KEYS[1], KEYS[2], KEYS[3])
  table.insert(snapshots, redis.call('HGETALL', ARGV[2] .. id))
end
trim(KEYS[3], tonumber(ARGV[3]), ARGV[2])
return snapshots
"#;

// KEYS: job, active
// ARGV: worker, lock_expires, id
const LUA_EXTEND_LOCK: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'active' or redis.call('HGET', KEYS[1], 'lock_owner') ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'lock_expires', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

// KEYS: job
// ARGV: progress
const LUA_PROGRESS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'progress', ARGV[1])
return 1
"#;

// KEYS: job, waiting, delayed, completed, failed
// ARGV: id
const LUA_REMOVE: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  return 0
end
if status == 'active' then
  return -1
end
for i = 2, 5 do
  redis.call('ZREM', KEYS[i], ARGV[1])
end
redis.call('DEL', KEYS[1])
return 1
"#;

// KEYS: completed, failed
// ARGV: cutoff, prefix
const LUA_PURGE: &str = r#"
local removed = 0
for i = 1, 2 do
  local ids = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', ARGV[1])
  for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[2] .. id)
  end
  removed = removed + #ids
  redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', ARGV[1])
end
return removed
"#;

// KEYS: waiting, delayed
// ARGV: prefix, include_delayed
const LUA_DRAIN: &str = r#"
local last = 1
if ARGV[2] == '1' then last = 2 end
local removed = 0
for i = 1, last do
  local ids = redis.call('ZRANGE', KEYS[i], 0, -1)
  for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[1] .. id)
  end
  removed = removed + #ids
  redis.call('DEL', KEYS[i])
end
return removed
"#;

/// Compiled scripts, shared by every queue of a factory.
struct QueueScripts {
    claim: Script,
    complete: Script,
    retry: Script,
    reclaim: Script,
    extend_lock: Script,
    progress: Script,
    remove: Script,
    purge: Script,
    drain: Script,
}

impl QueueScripts {
    fn new() -> Self {
        let with_helpers = |body: &str| Script::new(&format!("{}\n{}", LUA_HELPERS, body));
        Self {
            claim: with_helpers(LUA_CLAIM),
            complete: with_helpers(LUA_COMPLETE),
            retry: with_helpers(LUA_RETRY),
            reclaim: with_helpers(LUA_RECLAIM),
            extend_lock: Script::new(LUA_EXTEND_LOCK),
            progress: Script::new(LUA_PROGRESS),
            remove: Script::new(LUA_REMOVE),
            purge: Script::new(LUA_PURGE),
            drain: Script::new(LUA_DRAIN),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct QueueKeys {
    job_prefix: String,
    waiting: String,
    delayed: String,
    active: String,
    completed: String,
    failed: String,
    paused: String,
    seq: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        let base = format!("{}:{}", prefix, queue);
        Self {
            job_prefix: format!("{}:job:", base),
            waiting: format!("{}:waiting", base),
            delayed: format!("{}:delayed", base),
            active: format!("{}:active", base),
            completed: format!("{}:completed", base),
            failed: format!("{}:failed", base),
            paused: format!("{}:paused", base),
            seq: format!("{}:seq", base),
        }
    }

    fn job(&self, id: JobId) -> String {
        format!("{}{}", self.job_prefix, id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Record Encoding
// ═══════════════════════════════════════════════════════════════════════════════

fn waiting_score(priority: u32, sequence: u64) -> f64 {
    f64::from(priority.min(MAX_SCORED_PRIORITY)) * 4_294_967_296.0 + sequence as f64
}

fn encode(job: &JobRecord) -> Result<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("queue", job.queue_name.clone()),
        ("name", job.name.clone()),
        ("data", serde_json::to_string(&job.payload)?),
        ("status", job.status.as_str().to_string()),
        ("priority", job.priority.to_string()),
        ("sequence", job.sequence.to_string()),
        ("attempts_made", job.attempts_made.to_string()),
        ("max_attempts", job.max_attempts.to_string()),
        ("backoff_kind", job.backoff.kind.as_str().to_string()),
        ("backoff_delay", job.backoff.delay_ms.to_string()),
        ("progress", job.progress.to_string()),
        ("created_at", job.created_at.timestamp_millis().to_string()),
    ];
    if let Some(at) = job.scheduled_at {
        fields.push(("scheduled_at", at.timestamp_millis().to_string()));
    }
    Ok(fields)
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> JobforgeError {
    JobforgeError::with_internal(
        ErrorCode::DeserializationError,
        "Stored job record is malformed",
        format!("field '{}': {}", field, detail),
    )
}

fn required<'a>(map: &'a HashMap<String, String>, field: &str) -> Result<&'a str> {
    map.get(field)
        .map(String::as_str)
        .ok_or_else(|| corrupt(field, "missing"))
}

fn parsed<T>(map: &HashMap<String, String>, field: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    required(map, field)?.parse().map_err(|e| corrupt(field, e))
}

fn timestamp(map: &HashMap<String, String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match map.get(field).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => {
            let ms: i64 = raw.parse().map_err(|e| corrupt(field, e))?;
            Ok(Some(
                DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC),
            ))
        }
    }
}

fn decode(map: &HashMap<String, String>) -> Result<JobRecord> {
    let kind = match required(map, "backoff_kind")? {
        "fixed" => BackoffKind::Fixed,
        _ => BackoffKind::Exponential,
    };
    let lock = match (map.get("lock_owner"), timestamp(map, "lock_expires")?) {
        (Some(owner), Some(expires_at)) => Some(JobLock {
            owner: owner.clone(),
            expires_at,
        }),
        _ => None,
    };
    let result = map
        .get("result")
        .map(|raw| serde_json::from_str(raw))
        .transpose()?;

    Ok(JobRecord {
        id: parsed(map, "id")?,
        queue_name: required(map, "queue")?.to_string(),
        name: required(map, "name")?.to_string(),
        payload: serde_json::from_str(required(map, "data")?)?,
        status: parsed(map, "status")?,
        priority: parsed(map, "priority")?,
        sequence: parsed(map, "sequence")?,
        attempts_made: parsed(map, "attempts_made")?,
        max_attempts: parsed(map, "max_attempts")?,
        backoff: BackoffPolicy {
            kind,
            delay_ms: parsed(map, "backoff_delay")?,
        },
        progress: parsed(map, "progress")?,
        created_at: timestamp(map, "created_at")?.ok_or_else(|| corrupt("created_at", "missing"))?,
        scheduled_at: timestamp(map, "scheduled_at")?,
        started_at: timestamp(map, "started_at")?,
        finished_at: timestamp(map, "finished_at")?,
        result,
        failure_reason: map.get("failure_reason").cloned(),
        lock,
    })
}

fn decode_opt(map: Option<HashMap<String, String>>) -> Result<Option<JobRecord>> {
    match map {
        Some(map) if !map.is_empty() => decode(&map).map(Some),
        _ => Ok(None),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue backend storing records in Redis.
pub struct RedisQueueBackend {
    name: String,
    settings: QueueSettings,
    keys: QueueKeys,
    conn: ConnectionManager,
    scripts: Arc<QueueScripts>,
}

impl RedisQueueBackend {
    /// Open a standalone queue on its own connection.
    pub async fn connect(url: &str, key_prefix: &str, name: &str, settings: QueueSettings) -> Result<Self> {
        let factory = RedisQueueFactory::connect(url, key_prefix).await?;
        Ok(factory.build(name, settings))
    }

    /// Build the error for a transition script that refused to run.
    async fn refusal(&self, job_id: JobId, attempted: &str) -> JobforgeError {
        match self.get(job_id).await {
            Ok(Some(job)) => JobforgeError::invalid_state_transition(job_id, job.status, attempted),
            Ok(None) => JobforgeError::job_not_found(&self.name, job_id),
            Err(e) => e,
        }
    }

    async fn admit(&self, jobs: &[JobRecord]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for job in jobs {
            let key = self.keys.job(job.id);
            pipe.hset_multiple(&key, &encode(job)?).ignore();
            match job.status {
                JobStatus::Delayed => {
                    let due = job.scheduled_at.unwrap_or(job.created_at).timestamp_millis();
                    pipe.zadd(&self.keys.delayed, job.id.to_string(), due).ignore();
                }
                _ => {
                    let score = waiting_score(job.priority, job.sequence);
                    pipe.zadd(&self.keys.waiting, job.id.to_string(), score).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn reserve_sequences(&self, count: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let last: u64 = conn.incr(&self.keys.seq, count).await?;
        Ok(last + 1 - count)
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, name: &str, payload: serde_json::Value, options: JobOptions) -> Result<JobRecord> {
        let sequence = self.reserve_sequences(1).await?;
        let job = JobRecord::new(&self.name, name, payload, &options, &self.settings, sequence, Utc::now());
        self.admit(std::slice::from_ref(&job)).await?;
        tracing::debug!(queue = %self.name, job_id = %job.id, status = %job.status, "Job enqueued");
        Ok(job)
    }

    async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let first = self.reserve_sequences(jobs.len() as u64).await?;
        let now = Utc::now();
        let records: Vec<JobRecord> = jobs
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                JobRecord::new(
                    &self.name,
                    &entry.name,
                    entry.payload,
                    &entry.options,
                    &self.settings,
                    first + i as u64,
                    now,
                )
            })
            .collect();
        self.admit(&records).await?;
        tracing::debug!(queue = %self.name, count = records.len(), "Bulk enqueued");
        Ok(records)
    }

    async fn claim_next(&self, worker_id: &str, lock_duration: Duration) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        let expires = after(now, lock_duration).timestamp_millis();
        let mut conn = self.conn.clone();
        let raw: Option<HashMap<String, String>> = self
            .scripts
            .claim
            .key(&self.keys.waiting)
            .key(&self.keys.delayed)
            .key(&self.keys.active)
            .key(&self.keys.paused)
            .arg(now.timestamp_millis())
            .arg(expires)
            .arg(worker_id)
            .arg(&self.keys.job_prefix)
            .invoke_async(&mut conn)
            .await?;
        decode_opt(raw)
    }

    async fn complete(&self, job_id: JobId, worker_id: &str, result: serde_json::Value) -> Result<JobRecord> {
        let mut conn = self.conn.clone();
        let raw: Option<HashMap<String, String>> = self
            .scripts
            .complete
            .key(self.keys.job(job_id))
            .key(&self.keys.active)
            .key(&self.keys.completed)
            .arg(worker_id)
            .arg(now_ms())
            .arg(serde_json::to_string(&result)?)
            .arg(self.settings.keep_completed)
            .arg(&self.keys.job_prefix)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match decode_opt(raw)? {
            Some(job) => Ok(job),
            None => Err(self.refusal(job_id, "completed").await),
        }
    }

    async fn retry(&self, job_id: JobId, worker_id: &str, reason: &str) -> Result<JobRecord> {
        let mut conn = self.conn.clone();
        let raw: Option<HashMap<String, String>> = self
            .scripts
            .retry
            .key(self.keys.job(job_id))
            .key(&self.keys.active)
            .key(&self.keys.delayed)
            .key(&self.keys.failed)
            .arg(worker_id)
            .arg(now_ms())
            .arg(reason)
            .arg(self.settings.keep_failed)
            .arg(&self.keys.job_prefix)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match decode_opt(raw)? {
            Some(job) => Ok(job),
            None => Err(self.refusal(job_id, "retried").await),
        }
    }

    async fn extend_lock(&self, job_id: JobId, worker_id: &str, lock_duration: Duration) -> Result<bool> {
        let expires = after(Utc::now(), lock_duration).timestamp_millis();
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .scripts
            .extend_lock
            .key(self.keys.job(job_id))
            .key(&self.keys.active)
            .arg(worker_id)
            .arg(expires)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn update_progress(&self, job_id: JobId, progress: u8) -> Result<()> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .scripts
            .progress
            .key(self.keys.job(job_id))
            .arg(progress.min(100))
            .invoke_async(&mut conn)
            .await?;
        if updated == 0 {
            return Err(JobforgeError::job_not_found(&self.name, job_id));
        }
        Ok(())
    }

    async fn reclaim_stalled(&self) -> Result<Vec<JobRecord>> {
        let mut conn = self.conn.clone();
        let snapshots: Vec<HashMap<String, String>> = self
            .scripts
            .reclaim
            .key(&self.keys.active)
            .key(&self.keys.delayed)
            .key(&self.keys.failed)
            .arg(now_ms())
            .arg(&self.keys.job_prefix)
            .arg(self.settings.keep_failed)
            .arg(STALLED_REASON)
            .invoke_async(&mut conn)
            .await?;

        let reclaimed = snapshots
            .iter()
            .filter(|map| !map.is_empty())
            .map(decode)
            .collect::<Result<Vec<_>>>()?;
        if !reclaimed.is_empty() {
            tracing::warn!(queue = %self.name, count = reclaimed.len(), "Reclaimed stalled jobs");
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.keys.job(job_id)).await?;
        decode_opt(Some(raw))
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .scripts
            .remove
            .key(self.keys.job(job_id))
            .key(&self.keys.waiting)
            .key(&self.keys.delayed)
            .key(&self.keys.completed)
            .key(&self.keys.failed)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            1 => Ok(()),
            -1 => Err(JobforgeError::job_busy(job_id)),
            _ => Err(JobforgeError::job_not_found(&self.name, job_id)),
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let (waiting, active, completed, failed, delayed, paused): (u64, u64, u64, u64, u64, bool) =
            redis::pipe()
                .zcard(&self.keys.waiting)
                .zcard(&self.keys.active)
                .zcard(&self.keys.completed)
                .zcard(&self.keys.failed)
                .zcard(&self.keys.delayed)
                .exists(&self.keys.paused)
                .query_async(&mut conn)
                .await?;
        Ok(QueueStats::new(waiting, active, completed, failed, delayed, paused))
    }

    async fn pause(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.keys.paused, 1).await?;
        tracing::info!(queue = %self.name, "Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.keys.paused).await?;
        tracing::info!(queue = %self.name, "Queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let paused: bool = conn.exists(&self.keys.paused).await?;
        Ok(paused)
    }

    async fn purge(&self, grace: Duration) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(i64::try_from(grace.as_millis()).unwrap_or(i64::MAX));
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .scripts
            .purge
            .key(&self.keys.completed)
            .key(&self.keys.failed)
            .arg(cutoff)
            .arg(&self.keys.job_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn drain(&self, include_delayed: bool) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .scripts
            .drain
            .key(&self.keys.waiting)
            .key(&self.keys.delayed)
            .arg(&self.keys.job_prefix)
            .arg(if include_delayed { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| JobforgeError::broker_unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Creates [`RedisQueueBackend`]s sharing one managed connection.
#[derive(Clone)]
pub struct RedisQueueFactory {
    conn: ConnectionManager,
    key_prefix: String,
    scripts: Arc<QueueScripts>,
}

impl RedisQueueFactory {
    /// Connect and verify the server answers.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            JobforgeError::with_internal(ErrorCode::ConfigurationError, "Invalid Redis URL", e.to_string())
        })?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| JobforgeError::broker_unavailable(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| JobforgeError::broker_unavailable(e.to_string()))?;

        tracing::info!(prefix = %key_prefix, "Redis queue broker connected");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            scripts: Arc::new(QueueScripts::new()),
        })
    }

    fn build(&self, name: &str, settings: QueueSettings) -> RedisQueueBackend {
        RedisQueueBackend {
            name: name.to_string(),
            settings,
            keys: QueueKeys::new(&self.key_prefix, name),
            conn: self.conn.clone(),
            scripts: self.scripts.clone(),
        }
    }
}

impl QueueFactory for RedisQueueFactory {
    fn create(&self, name: &str, settings: QueueSettings) -> Arc<dyn QueueBackend> {
        Arc::new(self.build(name, settings))
    }
}
