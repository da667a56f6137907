//! SQLite implementation of the Endpoint traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. A single connection
//! behind a mutex serializes all writers, which is what gives each
//! operation its transaction boundary.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use relaykit_core::{label, Counter, EndpointId, Packet, SrcDstPair, COUNTER_WIDTH};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    BatchFn, BoundUpdate, Endpoint, FragmentGroup, LocalEndpoint, PacketHandler, PairSummary,
    StateSummary,
};

/// SQLite-backed packet store.
///
/// Thread-safe via internal Mutex. All database work runs on the blocking
/// pool. Packet handlers run on the async runtime with the mutex released,
/// so they can call back into this store without deadlocking.
pub struct SqliteEndpoint {
    name: EndpointId,
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
    handlers: RwLock<Vec<Arc<dyn PacketHandler>>>,
    leaf: AtomicBool,
}

impl SqliteEndpoint {
    /// Open a packet store at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>, name: EndpointId) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
            handlers: RwLock::new(Vec::new()),
            leaf: AtomicBool::new(true),
        })
    }

    /// Open an in-memory packet store.
    ///
    /// Useful for testing.
    pub fn open_memory(name: EndpointId) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
            handlers: RwLock::new(Vec::new()),
            leaf: AtomicBool::new(true),
        })
    }

    fn handlers_snapshot(&self) -> Vec<Arc<dyn PacketHandler>> {
        self.handlers.read().expect("handler lock poisoned").clone()
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
        Some(format!("mutex poisoned: {}", e)),
    ))
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
        Some(format!("spawn_blocking failed: {}", e)),
    ))
}

fn invalid_column(name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, name.into(), rusqlite::types::Type::Text)
}

// Helper to convert a row (src, dst, seq, label, payload) to a Packet
fn row_to_packet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Packet> {
    let src: String = row.get("src")?;
    let dst: String = row.get("dst")?;
    let seq: String = row.get("seq")?;
    let label: u32 = row.get("label")?;
    let payload: Vec<u8> = row.get("payload")?;

    Ok(Packet {
        src: EndpointId::new(src).map_err(|_| invalid_column("src"))?,
        dst: EndpointId::new(dst).map_err(|_| invalid_column("dst"))?,
        seq: Counter::parse(&seq).map_err(|_| invalid_column("seq"))?,
        label,
        payload: Bytes::from(payload),
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Query helpers shared by single operations and transactions
// ─────────────────────────────────────────────────────────────────────────

/// The watermark as defined: max of the stored bound and the first stored
/// packet's counter, zero when neither exists.
fn read_lower_bound(conn: &Connection, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT lower_bound FROM lower_bounds WHERE src = ?1 AND dst = ?2",
            params![src.as_str(), dst.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    let first: Option<String> = conn
        .query_row(
            "SELECT seq FROM packets WHERE src = ?1 AND dst = ?2 ORDER BY seq LIMIT 1",
            params![src.as_str(), dst.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    let stored = match stored {
        Some(s) => Counter::parse(&s)?,
        None => Counter::zero(COUNTER_WIDTH),
    };
    let first = match first {
        Some(s) => Counter::parse(&s)?,
        None => Counter::zero(COUNTER_WIDTH),
    };
    Ok(stored.max(first))
}

/// One past the last stored packet, falling back to the lower bound.
fn read_upper_bound(conn: &Connection, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
    let last: Option<String> = conn
        .query_row(
            "SELECT seq FROM packets WHERE src = ?1 AND dst = ?2 ORDER BY seq DESC LIMIT 1",
            params![src.as_str(), dst.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match last {
        Some(s) => Ok(Counter::parse(&s)?.inc()),
        None => read_lower_bound(conn, src, dst),
    }
}

/// The counter `send_packet` assigns next: the upper bound, or a fresh
/// time-seeded counter for a pair with no history.
fn next_seq(conn: &Connection, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
    let ub = read_upper_bound(conn, src, dst)?;
    if ub.is_zero() {
        Ok(Counter::from_time(COUNTER_WIDTH))
    } else {
        Ok(ub)
    }
}

fn fetch_packet(
    conn: &Connection,
    src: &EndpointId,
    dst: &EndpointId,
    seq: &Counter,
) -> Result<Option<Packet>> {
    conn.query_row(
        "SELECT src, dst, seq, label, payload FROM packets
         WHERE src = ?1 AND dst = ?2 AND seq = ?3",
        params![src.as_str(), dst.as_str(), seq.as_str()],
        row_to_packet,
    )
    .optional()
    .map_err(StoreError::from)
}

fn insert_packet(conn: &Connection, packet: &Packet) -> Result<()> {
    conn.execute(
        "INSERT INTO packets (src, dst, seq, label, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            packet.src.as_str(),
            packet.dst.as_str(),
            packet.seq.as_str(),
            packet.label,
            packet.payload.as_ref(),
        ],
    )?;
    Ok(())
}

/// Raise the watermark to `max(current, value)` and delete packets proven
/// obsolete. Fragments addressed to this store survive until reassembly.
/// With `value` of `None` this is a plain read.
fn apply_lower_bound(
    conn: &Connection,
    own_name: &EndpointId,
    src: &EndpointId,
    dst: &EndpointId,
    value: Option<&Counter>,
) -> Result<Counter> {
    let current = read_lower_bound(conn, src, dst)?;
    let Some(value) = value else {
        return Ok(current);
    };
    if current >= *value {
        return Ok(current);
    }

    conn.execute(
        "INSERT OR REPLACE INTO lower_bounds (src, dst, lower_bound) VALUES (?1, ?2, ?3)",
        params![src.as_str(), dst.as_str(), value.as_str()],
    )?;

    if dst == own_name {
        conn.execute(
            "DELETE FROM packets WHERE src = ?1 AND dst = ?2 AND seq < ?3
             AND label NOT IN (?4, ?5)",
            params![
                src.as_str(),
                dst.as_str(),
                value.as_str(),
                label::FRAGMENT_FIRST,
                label::FRAGMENT_REST,
            ],
        )?;
    } else {
        conn.execute(
            "DELETE FROM packets WHERE src = ?1 AND dst = ?2 AND seq < ?3",
            params![src.as_str(), dst.as_str(), value.as_str()],
        )?;
    }

    Ok(value.clone())
}

/// Store a packet the way `stash_packet` and the relay path of `put_packet`
/// do: insert if absent, accept an identical duplicate, reject a
/// byte-different one.
fn store_dedup(conn: &Connection, packet: &Packet) -> Result<()> {
    match fetch_packet(conn, &packet.src, &packet.dst, &packet.seq)? {
        Some(existing) if existing == *packet => Ok(()),
        Some(_) => {
            tracing::warn!(
                "conflicting packet rejected: {} -> {} seq {}",
                packet.src,
                packet.dst,
                packet.seq
            );
            Err(StoreError::PacketConflict {
                src: packet.src.to_string(),
                dst: packet.dst.to_string(),
                seq: packet.seq.to_string(),
            })
        }
        None => insert_packet(conn, packet),
    }
}

/// Where `put_packet` routed a packet while the lock was held.
enum PutRoute {
    /// Below the watermark or an identical duplicate: nothing to do.
    Skipped,
    /// Stored for relaying.
    Stored,
    /// Addressed to this store: handlers run after the lock is released.
    Terminal,
}

#[async_trait]
impl Endpoint for SqliteEndpoint {
    fn name(&self) -> &EndpointId {
        &self.name
    }

    fn is_leaf(&self) -> bool {
        self.leaf.load(Ordering::Relaxed)
    }

    async fn send_packet(&self, dst: &EndpointId, label: u32, payload: Bytes) -> Result<Packet> {
        let conn = self.conn.clone();
        let src = self.name.clone();
        let dst = dst.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            let seq = next_seq(&tx, &src, &dst)?;
            let packet = Packet { src, dst, seq, label, payload };
            insert_packet(&tx, &packet)?;
            tx.commit()?;
            Ok(packet)
        })
        .await
        .map_err(join_err)?
    }

    async fn put_packet(&self, packet: &Packet) -> Result<()> {
        let route = {
            let conn = self.conn.clone();
            let packet = packet.clone();
            let own = self.name.clone();

            tokio::task::spawn_blocking(move || {
                let mut conn = conn.lock().map_err(lock_err)?;
                let tx = conn.transaction()?;
                let lb = read_lower_bound(&tx, &packet.src, &packet.dst)?;

                let route = if packet.seq < lb {
                    PutRoute::Skipped
                } else if packet.dst == own {
                    PutRoute::Terminal
                } else {
                    store_dedup(&tx, &packet)?;
                    PutRoute::Stored
                };

                tx.commit()?;
                Ok::<_, StoreError>(route)
            })
            .await
            .map_err(join_err)??
        };

        match route {
            PutRoute::Skipped | PutRoute::Stored => Ok(()),
            PutRoute::Terminal => {
                self.deliver(packet).await?;
                // Watermark moves only after every handler succeeded, so a
                // failed delivery is offered again on the next sync.
                let next = packet.seq.inc();
                self.update_lower_bound(&packet.src, &packet.dst, Some(&next))
                    .await?;
                Ok(())
            }
        }
    }

    async fn get_packet(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        seq: &Counter,
    ) -> Result<Option<Packet>> {
        let conn = self.conn.clone();
        let (src, dst, seq) = (src.clone(), dst.clone(), seq.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            fetch_packet(&conn, &src, &dst, &seq)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_total_packet_count(&self) -> Result<u64> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_src_dst_pairs(&self) -> Result<Vec<SrcDstPair>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            let mut stmt =
                conn.prepare("SELECT DISTINCT src, dst FROM packets ORDER BY src, dst")?;
            let pairs = stmt
                .query_map([], |row| {
                    let src: String = row.get(0)?;
                    let dst: String = row.get(1)?;
                    Ok(SrcDstPair {
                        src: EndpointId::new(src).map_err(|_| invalid_column("src"))?,
                        dst: EndpointId::new(dst).map_err(|_| invalid_column("dst"))?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pairs)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_lower_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
        let conn = self.conn.clone();
        let (src, dst) = (src.clone(), dst.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            read_lower_bound(&conn, &src, &dst)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_upper_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
        let conn = self.conn.clone();
        let (src, dst) = (src.clone(), dst.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            read_upper_bound(&conn, &src, &dst)
        })
        .await
        .map_err(join_err)?
    }

    async fn update_lower_bound(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        value: Option<&Counter>,
    ) -> Result<Counter> {
        let conn = self.conn.clone();
        let own = self.name.clone();
        let (src, dst) = (src.clone(), dst.clone());
        let value = value.cloned();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            let effective = apply_lower_bound(&tx, &own, &src, &dst, value.as_ref())?;
            tx.commit()?;
            Ok(effective)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_lower_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>> {
        let conn = self.conn.clone();
        let pairs = pairs.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            let mut out = Vec::with_capacity(pairs.len());
            for pair in &pairs {
                out.push(read_lower_bound(&tx, &pair.src, &pair.dst)?);
            }
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_upper_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>> {
        let conn = self.conn.clone();
        let pairs = pairs.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            let mut out = Vec::with_capacity(pairs.len());
            for pair in &pairs {
                out.push(read_upper_bound(&tx, &pair.src, &pair.dst)?);
            }
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(join_err)?
    }

    async fn update_lower_bounds(&self, updates: &[BoundUpdate]) -> Result<Vec<Counter>> {
        let conn = self.conn.clone();
        let own = self.name.clone();
        let updates = updates.to_vec();

        // Each update is its own transaction, like the singular form.
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let mut out = Vec::with_capacity(updates.len());
            for update in &updates {
                let tx = conn.transaction()?;
                let effective = apply_lower_bound(
                    &tx,
                    &own,
                    &update.pair.src,
                    &update.pair.dst,
                    update.lower_bound.as_ref(),
                )?;
                tx.commit()?;
                out.push(effective);
            }
            Ok(out)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl LocalEndpoint for SqliteEndpoint {
    fn add_packet_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .push(handler);
    }

    fn set_leaf(&self, leaf: bool) {
        self.leaf.store(leaf, Ordering::Relaxed);
    }

    async fn deliver(&self, packet: &Packet) -> Result<()> {
        for handler in self.handlers_snapshot() {
            if let Err(e) = handler.on_packet(self, packet).await {
                tracing::warn!("packet handler failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn send_packet_batch(
        &self,
        count: usize,
        generator: Arc<BatchFn>,
    ) -> Result<Vec<Packet>> {
        let conn = self.conn.clone();
        let src = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            let mut sent: Vec<Packet> = Vec::with_capacity(count);
            for i in 0..count {
                let item = generator(&sent, i);
                let seq = next_seq(&tx, &src, &item.dst)?;
                let packet = Packet {
                    src: src.clone(),
                    dst: item.dst,
                    seq,
                    label: item.label,
                    payload: item.payload,
                };
                insert_packet(&tx, &packet)?;
                sent.push(packet);
            }
            tx.commit()?;
            Ok(sent)
        })
        .await
        .map_err(join_err)?
    }

    async fn stash_packet(&self, packet: &Packet) -> Result<()> {
        let conn = self.conn.clone();
        let packet = packet.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            store_dedup(&tx, &packet)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn count_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<u64> {
        let conn = self.conn.clone();
        let (src, dst) = (src.clone(), dst.clone());
        let (after, upto) = (after.clone(), upto.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM packets WHERE src = ?1 AND dst = ?2
                 AND seq > ?3 AND seq <= ?4 AND label = ?5",
                params![src.as_str(), dst.as_str(), after.as_str(), upto.as_str(), label],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
        .map_err(join_err)?
    }

    async fn packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<Vec<Packet>> {
        let conn = self.conn.clone();
        let (src, dst) = (src.clone(), dst.clone());
        let (after, upto) = (after.clone(), upto.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            let mut stmt = conn.prepare(
                "SELECT src, dst, seq, label, payload FROM packets
                 WHERE src = ?1 AND dst = ?2 AND seq > ?3 AND seq <= ?4 AND label = ?5
                 ORDER BY seq",
            )?;
            let packets = stmt
                .query_map(
                    params![src.as_str(), dst.as_str(), after.as_str(), upto.as_str(), label],
                    row_to_packet,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(packets)
        })
        .await
        .map_err(join_err)?
    }

    async fn remove_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        from: &Counter,
        to: &Counter,
    ) -> Result<()> {
        let conn = self.conn.clone();
        let (src, dst) = (src.clone(), dst.clone());
        let (from, to) = (from.clone(), to.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            conn.execute(
                "DELETE FROM packets WHERE src = ?1 AND dst = ?2 AND seq >= ?3 AND seq <= ?4",
                params![src.as_str(), dst.as_str(), from.as_str(), to.as_str()],
            )?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn touch_fragment_group(
        &self,
        src: &EndpointId,
        group: &Counter,
        last_seq: &Counter,
    ) -> Result<()> {
        let conn = self.conn.clone();
        let own = self.name.clone();
        let (src, group, last_seq) = (src.clone(), group.clone(), last_seq.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            conn.execute(
                "INSERT INTO fragment_groups (src, dst, group_seq, last_seq, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(src, dst, group_seq) DO UPDATE SET
                     last_seq = MAX(last_seq, excluded.last_seq),
                     updated_at = excluded.updated_at",
                params![
                    src.as_str(),
                    own.as_str(),
                    group.as_str(),
                    last_seq.as_str(),
                    relaykit_core::now_millis() as i64,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn clear_fragment_group(&self, src: &EndpointId, group: &Counter) -> Result<()> {
        let conn = self.conn.clone();
        let own = self.name.clone();
        let (src, group) = (src.clone(), group.clone());

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            conn.execute(
                "DELETE FROM fragment_groups WHERE src = ?1 AND dst = ?2 AND group_seq = ?3",
                params![src.as_str(), own.as_str(), group.as_str()],
            )?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn stale_fragment_groups(&self, cutoff_ms: u64) -> Result<Vec<FragmentGroup>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(lock_err)?;
            let mut stmt = conn.prepare(
                "SELECT src, dst, group_seq, last_seq, updated_at FROM fragment_groups
                 WHERE updated_at < ?1 ORDER BY updated_at",
            )?;
            let groups = stmt
                .query_map(params![cutoff_ms as i64], |row| {
                    let src: String = row.get(0)?;
                    let dst: String = row.get(1)?;
                    let group: String = row.get(2)?;
                    let last_seq: String = row.get(3)?;
                    let updated_at: i64 = row.get(4)?;
                    Ok(FragmentGroup {
                        src: EndpointId::new(src).map_err(|_| invalid_column("src"))?,
                        dst: EndpointId::new(dst).map_err(|_| invalid_column("dst"))?,
                        group: Counter::parse(&group).map_err(|_| invalid_column("group_seq"))?,
                        last_seq: Counter::parse(&last_seq)
                            .map_err(|_| invalid_column("last_seq"))?,
                        updated_at: updated_at as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
        .await
        .map_err(join_err)?
    }

    async fn reset(&self) -> Result<()> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM packets;
                 DELETE FROM lower_bounds;
                 DELETE FROM fragment_groups;",
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn state_summary(&self) -> Result<StateSummary> {
        let conn = self.conn.clone();
        let name = self.name.clone();
        let is_leaf = self.is_leaf();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(lock_err)?;
            let tx = conn.transaction()?;

            let total: i64 = tx.query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))?;

            let mut stmt = tx.prepare(
                "SELECT src, dst FROM
                   (SELECT DISTINCT src, dst FROM packets
                    UNION SELECT src, dst FROM lower_bounds)
                 ORDER BY src, dst",
            )?;
            let pairs = stmt
                .query_map([], |row| {
                    let src: String = row.get(0)?;
                    let dst: String = row.get(1)?;
                    Ok(SrcDstPair {
                        src: EndpointId::new(src).map_err(|_| invalid_column("src"))?,
                        dst: EndpointId::new(dst).map_err(|_| invalid_column("dst"))?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            let mut summaries = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let lower_bound = read_lower_bound(&tx, &pair.src, &pair.dst)?;
                let upper_bound = read_upper_bound(&tx, &pair.src, &pair.dst)?;
                let stored: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM packets WHERE src = ?1 AND dst = ?2",
                    params![pair.src.as_str(), pair.dst.as_str()],
                    |row| row.get(0),
                )?;
                summaries.push(PairSummary {
                    pair,
                    lower_bound,
                    upper_bound,
                    stored: stored as u64,
                });
            }

            tx.commit()?;
            Ok(StateSummary {
                name: name.to_string(),
                is_leaf,
                total_packets: total as u64,
                pairs: summaries,
            })
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s).unwrap()
    }

    fn store(name: &str) -> SqliteEndpoint {
        SqliteEndpoint::open_memory(id(name)).unwrap()
    }

    fn relay_packet(src: &str, dst: &str, seq: u64, payload: &[u8]) -> Packet {
        Packet {
            src: id(src),
            dst: id(dst),
            seq: Counter::from_number(seq, COUNTER_WIDTH),
            label: 1,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    struct Recorder {
        seen: Mutex<Vec<Packet>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder { seen: Mutex::new(Vec::new()) })
        }

        fn packets(&self) -> Vec<Packet> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PacketHandler for Recorder {
        async fn on_packet(&self, _cx: &dyn LocalEndpoint, packet: &Packet) -> Result<()> {
            self.seen.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    struct FailOnce {
        failed: AtomicBool,
    }

    #[async_trait]
    impl PacketHandler for FailOnce {
        async fn on_packet(&self, _cx: &dyn LocalEndpoint, _packet: &Packet) -> Result<()> {
            if self.failed.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StoreError::Handler("transient failure".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_send_packet_seeds_from_time_then_increments() {
        let ep = store("a");
        let p1 = ep.send_packet(&id("b"), 7, Bytes::from_static(b"one")).await.unwrap();
        let p2 = ep.send_packet(&id("b"), 7, Bytes::from_static(b"two")).await.unwrap();

        // First counter of a fresh pair starts at the wall clock.
        assert!(p1.seq > Counter::from_number(0x0180000000000, COUNTER_WIDTH));
        assert_eq!(p2.seq, p1.seq.inc());
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 2);

        let ub = ep.get_upper_bound(&id("a"), &id("b")).await.unwrap();
        assert_eq!(ub, p2.seq.inc());
    }

    #[tokio::test]
    async fn test_put_packet_relays_and_dedups() {
        let ep = store("relay");
        let p = relay_packet("a", "b", 10, b"payload");

        ep.put_packet(&p).await.unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 1);

        // Identical redelivery is a no-op.
        ep.put_packet(&p).await.unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 1);

        // Byte-different packet at the same triple is a conflict.
        let mut altered = p.clone();
        altered.payload = Bytes::from_static(b"tampered");
        let err = ep.put_packet(&altered).await.unwrap_err();
        assert!(matches!(err, StoreError::PacketConflict { .. }));
    }

    #[tokio::test]
    async fn test_put_packet_terminal_delivers_and_retires() {
        let ep = store("b");
        let recorder = Recorder::new();
        ep.add_packet_handler(recorder.clone());

        let p = relay_packet("a", "b", 10, b"hello");
        ep.put_packet(&p).await.unwrap();

        assert_eq!(recorder.packets(), vec![p.clone()]);
        // Terminal packets are retired, not stored.
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 0);
        let lb = ep.get_lower_bound(&id("a"), &id("b")).await.unwrap();
        assert_eq!(lb, p.seq.inc());

        // Redelivery is now below the watermark and does not reach handlers.
        ep.put_packet(&p).await.unwrap();
        assert_eq!(recorder.packets().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_blocks_watermark() {
        let ep = store("b");
        ep.add_packet_handler(Arc::new(FailOnce { failed: AtomicBool::new(false) }));
        let recorder = Recorder::new();
        ep.add_packet_handler(recorder.clone());

        let p = relay_packet("a", "b", 10, b"retry me");
        assert!(ep.put_packet(&p).await.is_err());

        // First handler failed before the recorder ran; nothing retired.
        assert!(recorder.packets().is_empty());
        let lb = ep.get_lower_bound(&id("a"), &id("b")).await.unwrap();
        assert!(lb < p.seq.inc());

        // The packet can be delivered again.
        ep.put_packet(&p).await.unwrap();
        assert_eq!(recorder.packets(), vec![p.clone()]);
        assert_eq!(ep.get_lower_bound(&id("a"), &id("b")).await.unwrap(), p.seq.inc());
    }

    #[tokio::test]
    async fn test_update_lower_bound_is_monotone_and_deletes() {
        let ep = store("relay");
        for seq in 1..=4u64 {
            ep.put_packet(&relay_packet("a", "b", seq, b"x")).await.unwrap();
        }

        let three = Counter::from_number(3, COUNTER_WIDTH);
        let effective = ep
            .update_lower_bound(&id("a"), &id("b"), Some(&three))
            .await
            .unwrap();
        assert_eq!(effective, three);
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 2);

        // Lowering is ignored.
        let one = Counter::from_number(1, COUNTER_WIDTH);
        let effective = ep
            .update_lower_bound(&id("a"), &id("b"), Some(&one))
            .await
            .unwrap();
        assert_eq!(effective, three);

        // None reads without writing.
        let read = ep.update_lower_bound(&id("a"), &id("b"), None).await.unwrap();
        assert_eq!(read, three);
    }

    #[tokio::test]
    async fn test_update_lower_bound_spares_own_fragments() {
        let ep = store("b");
        let mut first = relay_packet("a", "b", 10, b"\x07\x00\x00\x00\x02\x00\x00\x00");
        first.label = label::FRAGMENT_FIRST;
        let mut rest = relay_packet("a", "b", 11, b"chunk");
        rest.label = label::FRAGMENT_REST;
        let plain = relay_packet("a", "b", 12, b"plain");

        ep.stash_packet(&first).await.unwrap();
        ep.stash_packet(&rest).await.unwrap();
        ep.stash_packet(&plain).await.unwrap();

        let high = Counter::from_number(20, COUNTER_WIDTH);
        ep.update_lower_bound(&id("a"), &id("b"), Some(&high)).await.unwrap();

        // Fragments addressed to this store survive, the plain packet dies.
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 2);
        assert!(ep.get_packet(&id("a"), &id("b"), &first.seq).await.unwrap().is_some());
        assert!(ep.get_packet(&id("a"), &id("b"), &plain.seq).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_lower_bound_deletes_fragments_at_relay() {
        let ep = store("relay");
        let mut rest = relay_packet("a", "b", 11, b"chunk");
        rest.label = label::FRAGMENT_REST;
        ep.put_packet(&rest).await.unwrap();

        let high = Counter::from_number(20, COUNTER_WIDTH);
        ep.update_lower_bound(&id("a"), &id("b"), Some(&high)).await.unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lower_bound_falls_back_to_first_stored_packet() {
        let ep = store("relay");
        ep.put_packet(&relay_packet("a", "b", 5, b"x")).await.unwrap();

        let lb = ep.get_lower_bound(&id("a"), &id("b")).await.unwrap();
        assert_eq!(lb, Counter::from_number(5, COUNTER_WIDTH));
    }

    #[tokio::test]
    async fn test_upper_bound_falls_back_to_lower_bound() {
        let ep = store("relay");
        assert!(ep.get_upper_bound(&id("a"), &id("b")).await.unwrap().is_zero());

        let lb = Counter::from_number(9, COUNTER_WIDTH);
        ep.update_lower_bound(&id("a"), &id("b"), Some(&lb)).await.unwrap();
        assert_eq!(ep.get_upper_bound(&id("a"), &id("b")).await.unwrap(), lb);
    }

    #[tokio::test]
    async fn test_batch_allocates_contiguous_counters() {
        let ep = store("a");
        let sent = ep
            .send_packet_batch(
                3,
                Arc::new(|_sent: &[Packet], i: usize| crate::traits::BatchItem {
                    dst: EndpointId::new("b").unwrap(),
                    label: 5,
                    payload: Bytes::from(vec![i as u8]),
                }),
            )
            .await
            .unwrap();

        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].seq, sent[0].seq.inc());
        assert_eq!(sent[2].seq, sent[1].seq.inc());
    }

    #[tokio::test]
    async fn test_batch_generator_sees_prior_packets() {
        let ep = store("a");
        let sent = ep
            .send_packet_batch(
                2,
                Arc::new(|sent: &[Packet], _i: usize| {
                    let marker = sent.first().map(|p| p.seq.to_string()).unwrap_or_default();
                    crate::traits::BatchItem {
                        dst: EndpointId::new("b").unwrap(),
                        label: 5,
                        payload: Bytes::from(marker.into_bytes()),
                    }
                }),
            )
            .await
            .unwrap();

        // The second payload embeds the first packet's counter.
        assert_eq!(sent[1].payload, Bytes::from(sent[0].seq.to_string().into_bytes()));
    }

    #[tokio::test]
    async fn test_src_dst_pairs_sorted_distinct() {
        let ep = store("relay");
        ep.put_packet(&relay_packet("c", "d", 1, b"x")).await.unwrap();
        ep.put_packet(&relay_packet("a", "b", 1, b"x")).await.unwrap();
        ep.put_packet(&relay_packet("a", "b", 2, b"x")).await.unwrap();

        let pairs = ep.get_src_dst_pairs().await.unwrap();
        assert_eq!(
            pairs,
            vec![
                SrcDstPair::new(id("a"), id("b")),
                SrcDstPair::new(id("c"), id("d")),
            ]
        );
    }

    #[tokio::test]
    async fn test_fragment_group_staging() {
        let ep = store("b");
        let group = Counter::from_number(100, COUNTER_WIDTH);

        ep.touch_fragment_group(&id("a"), &group, &Counter::from_number(101, COUNTER_WIDTH))
            .await
            .unwrap();
        ep.touch_fragment_group(&id("a"), &group, &Counter::from_number(103, COUNTER_WIDTH))
            .await
            .unwrap();

        let stale = ep.stale_fragment_groups(u64::MAX).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].group, group);
        assert_eq!(stale[0].last_seq, Counter::from_number(103, COUNTER_WIDTH));

        // Nothing is stale with a cutoff in the past.
        assert!(ep.stale_fragment_groups(0).await.unwrap().is_empty());

        ep.clear_fragment_group(&id("a"), &group).await.unwrap();
        assert!(ep.stale_fragment_groups(u64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let ep = store("a");
        ep.send_packet(&id("b"), 1, Bytes::from_static(b"x")).await.unwrap();
        ep.reset().await.unwrap();

        assert_eq!(ep.get_total_packet_count().await.unwrap(), 0);
        assert!(ep.get_src_dst_pairs().await.unwrap().is_empty());
        assert!(ep.get_upper_bound(&id("a"), &id("b")).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_state_summary_reports_pairs() {
        let ep = store("relay");
        ep.put_packet(&relay_packet("a", "b", 3, b"x")).await.unwrap();
        ep.put_packet(&relay_packet("a", "b", 4, b"y")).await.unwrap();

        let summary = ep.state_summary().await.unwrap();
        assert_eq!(summary.name, "relay");
        assert_eq!(summary.total_packets, 2);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].stored, 2);
        assert_eq!(summary.pairs[0].lower_bound, Counter::from_number(3, COUNTER_WIDTH));
        assert_eq!(summary.pairs[0].upper_bound, Counter::from_number(5, COUNTER_WIDTH));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.db");

        let p = {
            let ep = SqliteEndpoint::open(&path, id("a")).unwrap();
            ep.send_packet(&id("b"), 1, Bytes::from_static(b"durable")).await.unwrap()
        };

        let ep = SqliteEndpoint::open(&path, id("a")).unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 1);
        let stored = ep.get_packet(&id("a"), &id("b"), &p.seq).await.unwrap().unwrap();
        assert_eq!(stored, p);
    }
}
