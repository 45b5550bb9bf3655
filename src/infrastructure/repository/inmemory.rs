//! InMemory RoomStore 実装
//!
//! ドメイン層が定義する RoomStore trait のテスト用実装。
//! HashMap をインメモリ DB として使用し、TTL は注入された Clock に
//! 基づいて遅延評価します（アクセス時に期限切れを掃除）。
//!
//! Mutex を 1 つだけ持つため、本物のストアと同じく操作単位で
//! アトミックです。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::time::Clock;
use crate::domain::{ConnId, Jti, JoinOutcome, RoomId, RoomStore, StoreError};

struct RoomState {
    created_at_ms: i64,
    members: HashSet<String>,
    jtis: HashSet<String>,
    expires_at_ms: i64,
}

struct Inner {
    rooms: HashMap<String, RoomState>,
    /// `(rid, jti) → marker expiry`
    jti_markers: HashMap<(String, String), i64>,
}

/// インメモリ RoomStore 実装
pub struct InMemoryRoomStore {
    max_participants: u32,
    room_ttl_ms: i64,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl InMemoryRoomStore {
    pub fn new(max_participants: u32, room_ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_participants,
            room_ttl_ms,
            clock,
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                jti_markers: HashMap::new(),
            }),
        }
    }

    /// Number of live consumed-token markers for a room (test observer).
    pub async fn marker_count(&self, rid: &RoomId) -> usize {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        inner
            .jti_markers
            .keys()
            .filter(|(r, _)| r == rid.as_str())
            .count()
    }

    fn purge_expired(inner: &mut Inner, now_ms: i64) {
        let expired: Vec<String> = inner
            .rooms
            .iter()
            .filter(|(_, room)| room.expires_at_ms <= now_ms)
            .map(|(rid, _)| rid.clone())
            .collect();
        for rid in expired {
            inner.rooms.remove(&rid);
            inner.jti_markers.retain(|(r, _), _| r != &rid);
        }
        inner.jti_markers.retain(|_, expiry| *expiry > now_ms);
    }

    fn drop_room(inner: &mut Inner, rid: &str) {
        inner.rooms.remove(rid);
        inner.jti_markers.retain(|(r, _), _| r != rid);
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn create_empty(&self, rid: &RoomId) -> Result<(), StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let ttl = self.room_ttl_ms;
        inner
            .rooms
            .entry(rid.as_str().to_string())
            .and_modify(|room| room.expires_at_ms = now + ttl)
            .or_insert_with(|| RoomState {
                created_at_ms: now,
                members: HashSet::new(),
                jtis: HashSet::new(),
                expires_at_ms: now + ttl,
            });
        Ok(())
    }

    async fn create_with(&self, rid: &RoomId, conn: &ConnId) -> Result<(), StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let mut members = HashSet::new();
        members.insert(conn.as_str().to_string());
        inner.rooms.insert(
            rid.as_str().to_string(),
            RoomState {
                created_at_ms: now,
                members,
                jtis: HashSet::new(),
                expires_at_ms: now + self.room_ttl_ms,
            },
        );
        Ok(())
    }

    async fn try_join(&self, rid: &RoomId, conn: &ConnId) -> Result<JoinOutcome, StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let ttl = self.room_ttl_ms;
        let Some(room) = inner.rooms.get_mut(rid.as_str()) else {
            return Ok(JoinOutcome::NoRoom);
        };
        if room.members.contains(conn.as_str()) {
            room.expires_at_ms = now + ttl;
            return Ok(JoinOutcome::AlreadyMember {
                count: room.members.len() as u32,
            });
        }
        if room.members.len() as u32 >= self.max_participants {
            return Ok(JoinOutcome::Full);
        }
        room.members.insert(conn.as_str().to_string());
        room.expires_at_ms = now + ttl;
        Ok(JoinOutcome::Joined {
            count: room.members.len() as u32,
        })
    }

    async fn leave(&self, rid: &RoomId, conn: &ConnId) -> Result<u32, StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let ttl = self.room_ttl_ms;
        let Some(room) = inner.rooms.get_mut(rid.as_str()) else {
            return Ok(0);
        };
        if !room.members.remove(conn.as_str()) {
            return Ok(room.members.len() as u32);
        }
        let remaining = room.members.len() as u32;
        if remaining == 0 {
            Self::drop_room(&mut inner, rid.as_str());
        } else {
            room.expires_at_ms = now + ttl;
        }
        Ok(remaining)
    }

    async fn touch(&self, rid: &RoomId) -> Result<(), StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let ttl = self.room_ttl_ms;
        if let Some(room) = inner.rooms.get_mut(rid.as_str()) {
            room.expires_at_ms = now + ttl;
        }
        Ok(())
    }

    async fn mark_jti(&self, rid: &RoomId, jti: &Jti, ttl_ms: i64) -> Result<bool, StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        let key = (rid.as_str().to_string(), jti.as_str().to_string());
        if inner.jti_markers.contains_key(&key) {
            return Ok(false);
        }
        inner.jti_markers.insert(key, now + ttl_ms);
        if let Some(room) = inner.rooms.get_mut(rid.as_str()) {
            room.jtis.insert(jti.as_str().to_string());
        }
        Ok(true)
    }

    async fn exists(&self, rid: &RoomId) -> Result<bool, StoreError> {
        let now = self.clock.now_unix_millis();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, now);
        Ok(inner.rooms.contains_key(rid.as_str()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
