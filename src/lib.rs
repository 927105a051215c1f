//! A blocking client for MemcacheDB: a pool of servers addressed as one
//! logical cache over the memcached ASCII protocol plus the `rget` range
//! extension.
//!
//! Keys are routed deterministically with a weighted consistent-hash
//! continuum, so membership changes remap only a small share of the
//! keyspace. Each server gets exactly one lazily-opened TCP connection with
//! bounded I/O; a failing server is quarantined for thirty seconds and
//! requests fail over to the next continuum slot.
//!
//! ```no_run
//! use memcachedb_client::{Client, Options};
//!
//! let client = Client::new(&["cache1:21201", "cache2:21201:2"], Options::default()).unwrap();
//! client.set("greeting", b"hello", 0).unwrap();
//! assert_eq!(client.get("greeting").unwrap(), Some(b"hello".to_vec()));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, info, warn};

mod connection;

mod error;
pub use self::error::Error;
use self::error::OpError;

mod node;
use self::node::Node;
pub use self::node::{DEFAULT_PORT, DEFAULT_WEIGHT};

mod parser;
pub use self::parser::{ErrorKind, Response, StatValue, Status, Value};

mod ring;
use self::ring::Ring;

mod value_serializer;
pub use self::value_serializer::{IdentitySerializer, ValueSerializer};

/// Largest value accepted, after serialization.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Longest key accepted, after namespacing.
pub const MAX_KEY_LENGTH: usize = 250;

/// Default per-I/O deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// How many continuum slots are probed before a request is abandoned, the
/// first with the key's own hash and the rest after rehashing with an
/// attempt-counter prefix.
const FAILOVER_ATTEMPTS: usize = 20;

/// Client configuration.
pub struct Options {
    /// Prefix applied to every key on the wire, as `<namespace>:<key>`.
    pub namespace: Option<String>,
    /// Reject every mutating operation with [`Error::Readonly`].
    pub readonly: bool,
    /// Allow use from any thread. When false, the client may only be used
    /// from the thread that created it; other threads get
    /// [`Error::Concurrency`] before any I/O.
    pub multithread: bool,
    /// Probe other continuum slots when the primary server for a key is
    /// dead. When false, a dead primary fails the request immediately.
    pub failover: bool,
    /// Per-I/O deadline for reads and writes; `None` disables it.
    pub timeout: Option<Duration>,
    /// Converts between caller values and stored bytes. The `*_raw` methods
    /// bypass it.
    pub serializer: Box<dyn ValueSerializer>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            namespace: None,
            readonly: false,
            multithread: false,
            failover: true,
            timeout: Some(DEFAULT_TIMEOUT),
            serializer: Box::new(IdentitySerializer),
        }
    }
}

/// A handle on a pool of MemcacheDB servers.
///
/// All operations take `&self`; internally one lock serializes every request
/// through the client, so a shared client never interleaves requests on the
/// wire.
pub struct Client {
    ring: Mutex<Ring>,
    namespace: Option<String>,
    readonly: bool,
    multithread: bool,
    failover: bool,
    timeout: Option<Duration>,
    serializer: Box<dyn ValueSerializer>,
    owner: ThreadId,
}

impl Client {
    /// Creates a client for the given servers. Specs are `host`,
    /// `host:port`, or `host:port:weight`; the port defaults to
    /// [`DEFAULT_PORT`] and the weight to 1. No connections are opened
    /// until the first request.
    pub fn new<S: AsRef<str>>(servers: &[S], options: Options) -> Result<Client, Error> {
        let Options {
            namespace,
            readonly,
            multithread,
            failover,
            timeout,
            serializer,
        } = options;

        let client = Client {
            ring: Mutex::new(Ring::new(Vec::new())),
            namespace,
            readonly,
            multithread,
            failover,
            timeout,
            serializer,
            owner: thread::current().id(),
        };
        client.set_servers(servers)?;

        Ok(client)
    }

    /// Replaces the server list and rebuilds the continuum.
    pub fn set_servers<S: AsRef<str>>(&self, servers: &[S]) -> Result<(), Error> {
        self.check_thread()?;

        let mut nodes = Vec::with_capacity(servers.len());
        for spec in servers {
            nodes.push(Node::new(spec.as_ref(), self.timeout)?);
        }

        debug!("rebuilding continuum for {} servers", nodes.len());
        *self.ring() = Ring::new(nodes);
        Ok(())
    }

    /// The configured namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether mutating operations are rejected.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// `(host:port, status)` for every configured server. The status is
    /// `CONNECTED`, `NOT CONNECTED`, or `DEAD: <reason>, will retry in 30s`.
    pub fn server_statuses(&self) -> Vec<(String, String)> {
        self.ring()
            .nodes
            .iter()
            .map(|node| (node.name(), node.status().to_string()))
            .collect()
    }

    /// Closes every connection without quarantining anyone; the next
    /// request per server reconnects immediately.
    pub fn reset(&self) {
        for node in self.ring().nodes.iter_mut() {
            node.close();
        }
    }

    /// Retrieves a key, deserialized. `Ok(None)` is a cache miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.fetch(key, false)
    }

    /// Retrieves a key as raw stored bytes.
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.fetch(key, true)
    }

    /// Retrieves many keys in one round trip per involved server. Missing
    /// keys are absent from the result; when one server fails, its keys are
    /// dropped from the result and the rest are returned.
    pub fn get_multi(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>, Error> {
        self.check_thread()?;
        let mut ring = self.ring();
        if ring.nodes.is_empty() {
            return Err(Error::NoServers);
        }

        let mut originals: HashMap<String, String> = HashMap::new();
        let mut server_keys: HashMap<usize, Vec<String>> = HashMap::new();
        for &key in keys {
            let cache_key = self.cache_key(key)?;
            let idx = self.pick_server(&mut ring, &cache_key)?;
            server_keys.entry(idx).or_default().push(cache_key.clone());
            originals.insert(cache_key, key.to_string());
        }

        let mut results = HashMap::new();
        for (idx, cache_keys) in server_keys {
            let mut command = String::from("get");
            for cache_key in &cache_keys {
                command.push(' ');
                command.push_str(cache_key);
            }
            command.push_str("\r\n");

            let fetched = ring.nodes[idx].exchange(command.as_bytes(), |node| {
                match reject_error(node.read_response()?)? {
                    Response::Data(values) => Ok(values.unwrap_or_default()),
                    _ => Err(unexpected("get")),
                }
            });

            match fetched {
                Ok(values) => {
                    for value in values {
                        let wire_key = String::from_utf8_lossy(&value.key).to_string();
                        if let Some(original) = originals.get(&wire_key) {
                            let data = self.serializer.deserialize(value.data)?;
                            results.insert(original.clone(), data);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "get_multi: server {} failed: {}",
                        ring.nodes[idx].name(),
                        err.into_error()
                    );
                }
            }
        }

        Ok(results)
    }

    /// Retrieves up to `limit` keys in `[start, end]`, lexicographically.
    ///
    /// The range query is broadcast to every server: the continuum spreads
    /// the keyspace over all of them, so no single server holds a full
    /// range. The result merges each server's ordered reply by key and
    /// carries no global order. If any server fails, the whole call yields
    /// an empty map after logging a warning.
    pub fn get_range(
        &self,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<HashMap<String, Vec<u8>>, Error> {
        self.check_thread()?;
        let mut ring = self.ring();
        if ring.nodes.is_empty() {
            return Err(Error::NoServers);
        }

        let start_key = self.cache_key(start)?;
        let end_key = self.cache_key(end)?;
        let command = format!("rget {} {} 0 0 {}\r\n", start_key, end_key, limit);

        let mut results = HashMap::new();
        for idx in 0..ring.nodes.len() {
            let fetched = ring.nodes[idx].exchange(command.as_bytes(), |node| {
                match reject_error(node.read_response()?)? {
                    Response::Data(values) => Ok(values.unwrap_or_default()),
                    _ => Err(unexpected("rget")),
                }
            });

            match fetched {
                Ok(values) => {
                    for value in values {
                        let wire_key = String::from_utf8_lossy(&value.key).to_string();
                        let key = self.strip_namespace(&wire_key).to_string();
                        let data = self.serializer.deserialize(value.data)?;
                        results.insert(key, data);
                    }
                }
                Err(err) => {
                    warn!(
                        "get_range: server {} failed: {}",
                        ring.nodes[idx].name(),
                        err.into_error()
                    );
                    return Ok(HashMap::new());
                }
            }
        }

        Ok(results)
    }

    /// Stores a value under a key. `expiry` is seconds from now, or a Unix
    /// timestamp; 0 means never. Returns the server's [`Status::Stored`].
    pub fn set(&self, key: &str, value: &[u8], expiry: u32) -> Result<Status, Error> {
        self.store("set", key, value, expiry, false)
    }

    /// [`Client::set`] without serialization.
    pub fn set_raw(&self, key: &str, value: &[u8], expiry: u32) -> Result<Status, Error> {
        self.store("set", key, value, expiry, true)
    }

    /// Stores a value only if the key does not exist yet. Returns the raw
    /// sentinel: [`Status::Stored`] on success, [`Status::NotStored`] when
    /// the key was already present.
    pub fn add(&self, key: &str, value: &[u8], expiry: u32) -> Result<Status, Error> {
        self.store("add", key, value, expiry, false)
    }

    /// [`Client::add`] without serialization.
    pub fn add_raw(&self, key: &str, value: &[u8], expiry: u32) -> Result<Status, Error> {
        self.store("add", key, value, expiry, true)
    }

    /// Deletes a key. Returns whether the key existed.
    pub fn delete(&self, key: &str, expiry: u32) -> Result<bool, Error> {
        self.check_thread()?;
        if self.readonly {
            return Err(Error::Readonly);
        }

        let mut ring = self.ring();
        self.with_server(&mut ring, key, |node, cache_key| {
            let command = format!("delete {} {}\r\n", cache_key, expiry);
            node.exchange(command.as_bytes(), |node| {
                match reject_error(node.read_response()?)? {
                    Response::Status(Status::Deleted) => Ok(true),
                    Response::Status(Status::NotFound) => Ok(false),
                    _ => Err(unexpected("delete")),
                }
            })
        })
    }

    /// Increments a numeric value, returning the new value, or `None` when
    /// the key does not exist.
    pub fn incr(&self, key: &str, amount: u64) -> Result<Option<u64>, Error> {
        self.arith("incr", key, amount)
    }

    /// Decrements a numeric value, returning the new value, or `None` when
    /// the key does not exist. The server floors the result at zero.
    pub fn decr(&self, key: &str, amount: u64) -> Result<Option<u64>, Error> {
        self.arith("decr", key, amount)
    }

    /// Drops every key on every server.
    pub fn flush_all(&self) -> Result<(), Error> {
        self.check_thread()?;
        if self.readonly {
            return Err(Error::Readonly);
        }

        let mut ring = self.ring();
        if ring.nodes.is_empty() {
            return Err(Error::NoServers);
        }

        for node in ring.nodes.iter_mut() {
            node.exchange(b"flush_all\r\n", |node| {
                match reject_error(node.read_response()?)? {
                    Response::Status(Status::Ok) => Ok(()),
                    _ => Err(unexpected("flush_all")),
                }
            })
            .map_err(OpError::into_error)?;
        }

        Ok(())
    }

    /// Collects statistics from every live server, keyed by `host:port`.
    /// Dead servers are skipped; if none are alive the call fails.
    pub fn stats(&self) -> Result<HashMap<String, HashMap<String, StatValue>>, Error> {
        self.check_thread()?;
        let mut ring = self.ring();
        if ring.nodes.is_empty() {
            return Err(Error::NoServers);
        }

        let mut all = HashMap::new();
        for node in ring.nodes.iter_mut() {
            if !node.alive() {
                continue;
            }

            let entries = node
                .exchange(b"stats\r\n", |node| {
                    let mut entries = HashMap::new();
                    loop {
                        match node.read_stats_response()? {
                            parser::StatsResponse::Entry(name, raw) => {
                                let value = parser::interpret_stat(&name, raw);
                                entries.insert(name, value);
                            }
                            parser::StatsResponse::End => return Ok(entries),
                        }
                    }
                })
                .map_err(OpError::into_error)?;

            all.insert(node.name(), entries);
        }

        if all.is_empty() {
            return Err(Error::NoServers);
        }
        Ok(all)
    }

    fn fetch(&self, key: &str, raw: bool) -> Result<Option<Vec<u8>>, Error> {
        self.check_thread()?;

        let mut ring = self.ring();
        let data = self.with_server(&mut ring, key, |node, cache_key| {
            let command = format!("get {}\r\n", cache_key);
            node.exchange(command.as_bytes(), |node| {
                match reject_error(node.read_response()?)? {
                    Response::Data(Some(mut values)) if values.len() == 1 => {
                        Ok(Some(values.remove(0).data))
                    }
                    Response::Data(None) => Ok(None),
                    Response::Status(Status::NotFound) => Ok(None),
                    _ => Err(unexpected("get")),
                }
            })
        })?;

        match data {
            Some(data) if !raw => Ok(Some(self.serializer.deserialize(data)?)),
            other => Ok(other),
        }
    }

    fn store(
        &self,
        verb: &str,
        key: &str,
        value: &[u8],
        expiry: u32,
        raw: bool,
    ) -> Result<Status, Error> {
        self.check_thread()?;
        if self.readonly {
            return Err(Error::Readonly);
        }

        let payload = if raw {
            value.to_vec()
        } else {
            self.serializer.serialize(value)?
        };
        if payload.len() > MAX_VALUE_SIZE {
            return Err(Error::BadArgument(format!(
                "value too large ({} bytes)",
                payload.len()
            )));
        }

        let mut ring = self.ring();
        self.with_server(&mut ring, key, |node, cache_key| {
            let mut command =
                format!("{} {} 0 {} {}\r\n", verb, cache_key, expiry, payload.len()).into_bytes();
            command.extend_from_slice(&payload);
            command.extend_from_slice(b"\r\n");

            node.exchange(&command, |node| {
                match reject_error(node.read_response()?)? {
                    Response::Status(Status::Stored) => Ok(Status::Stored),
                    Response::Status(Status::NotStored) => Ok(Status::NotStored),
                    _ => Err(unexpected(verb)),
                }
            })
        })
    }

    fn arith(&self, verb: &str, key: &str, amount: u64) -> Result<Option<u64>, Error> {
        self.check_thread()?;
        if self.readonly {
            return Err(Error::Readonly);
        }

        let mut ring = self.ring();
        self.with_server(&mut ring, key, |node, cache_key| {
            let command = format!("{} {} {}\r\n", verb, cache_key, amount);
            node.exchange(command.as_bytes(), |node| {
                match reject_error(node.read_response()?)? {
                    Response::IncrDecr(value) => Ok(Some(value)),
                    Response::Status(Status::NotFound) => Ok(None),
                    _ => Err(unexpected(verb)),
                }
            })
        })
    }

    /// Resolves the target server for a key and runs `op` against it. When
    /// the endpoint turns out to be unusable mid-request, the whole
    /// operation is retried once with the server re-resolved, covering the
    /// race where a server dies between routing and I/O.
    fn with_server<R, F>(&self, ring: &mut Ring, key: &str, op: F) -> Result<R, Error>
    where
        F: Fn(&mut Node, &str) -> Result<R, OpError>,
    {
        let cache_key = self.cache_key(key)?;

        let mut retried = false;
        loop {
            let idx = self.pick_server(ring, &cache_key)?;
            match op(&mut ring.nodes[idx], &cache_key) {
                Ok(result) => return Ok(result),
                Err(OpError::Fail(err)) => return Err(err),
                Err(OpError::Unusable(err)) => {
                    if !retried && ring.nodes.len() > 1 {
                        info!(
                            "server {} unusable, retrying operation elsewhere",
                            ring.nodes[idx].name()
                        );
                        retried = true;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Picks the node index for an effective key. A sole server is returned
    /// as-is. Otherwise up to [`FAILOVER_ATTEMPTS`] continuum slots are
    /// probed, rehashing with an attempt-counter prefix after each dead
    /// server; with failover disabled the first dead server fails the
    /// request.
    fn pick_server(&self, ring: &mut Ring, cache_key: &str) -> Result<usize, Error> {
        if ring.nodes.is_empty() {
            return Err(Error::NoServers);
        }
        if ring.nodes.len() == 1 {
            return Ok(0);
        }

        let mut hash = ring::hash_for(cache_key.as_bytes());
        for attempt in 0..FAILOVER_ATTEMPTS {
            let idx = ring.lookup(hash);
            if ring.nodes[idx].alive() {
                return Ok(idx);
            }
            if !self.failover {
                return Err(Error::NoServers);
            }
            hash = ring::hash_for(format!("{}{}", attempt, cache_key).as_bytes());
        }

        Err(Error::NoServers)
    }

    /// Validates and namespaces a key. The constraints apply to the
    /// effective key, i.e. with the namespace prefix included.
    fn cache_key(&self, key: &str) -> Result<String, Error> {
        let effective = match &self.namespace {
            Some(namespace) => format!("{}:{}", namespace, key),
            None => key.to_string(),
        };

        if effective.chars().any(char::is_whitespace) {
            return Err(Error::BadArgument(format!(
                "illegal character in key `{}`",
                effective
            )));
        }
        if effective.len() > MAX_KEY_LENGTH {
            return Err(Error::BadArgument(format!(
                "key too long ({} bytes)",
                effective.len()
            )));
        }

        Ok(effective)
    }

    fn strip_namespace<'a>(&self, wire_key: &'a str) -> &'a str {
        match &self.namespace {
            Some(ns)
                if wire_key.len() > ns.len()
                    && wire_key.starts_with(ns.as_str())
                    && wire_key.as_bytes()[ns.len()] == b':' =>
            {
                &wire_key[ns.len() + 1..]
            }
            _ => wire_key,
        }
    }

    fn check_thread(&self) -> Result<(), Error> {
        if !self.multithread && thread::current().id() != self.owner {
            return Err(Error::Concurrency(format!(
                "client created on {:?} used from {:?}; enable the multithread option to share a client across threads",
                self.owner,
                thread::current().id()
            )));
        }
        Ok(())
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reject_error(response: Response) -> Result<Response, Error> {
    match response {
        Response::Status(Status::Error(kind)) => Err(Error::Protocol(Status::Error(kind))),
        other => Ok(other),
    }
}

fn unexpected(verb: &str) -> Error {
    Error::Protocol(Status::Error(ErrorKind::Protocol(Some(format!(
        "unexpected response to {}",
        verb
    )))))
}
