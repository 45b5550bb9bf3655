//! Redis RoomStore 実装
//!
//! ルームメンバーシップの正はこのストアにあります。容量チェックと
//! メンバー変更が他の接続と交錯しないよう、`try_join` / `leave` /
//! `mark_jti` はそれぞれ単一の Lua スクリプトとして実行します。
//!
//! ## キーレイアウト（すべて room_key_ttl_ms の TTL 付き）
//!
//! - `room:{rid}:meta`    — 作成時刻などのメタデータ（hash）
//! - `room:{rid}:members` — 接続 ID の集合（set）
//! - `room:{rid}:count`   — メンバー数のミラー（string int）
//! - `room:{rid}:jtis`    — 消費済みトークン ID の集合（set）
//! - `room:{rid}:jti:{jti}` — 消費済みマーカー（単発キー、独自 TTL）
//!
//! 最後のメンバーが退出したスクリプトの中で、メタ・メンバー・カウント・
//! jtis と全マーカーを削除します（部屋 0 人 = 痕跡ゼロ）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Script};

use crate::common::time::Clock;
use crate::domain::{ConnId, Jti, JoinOutcome, RoomId, RoomStore, StoreError};

static TRY_JOIN_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: meta, members, count, jtis
        -- ARGV: conn, max, ttl_ms
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return {"noroom", 0}
        end
        local ttl = tonumber(ARGV[3])
        if redis.call("SISMEMBER", KEYS[2], ARGV[1]) == 1 then
            local count = tonumber(redis.call("GET", KEYS[3]) or "0")
            for i = 1, 4 do
                redis.call("PEXPIRE", KEYS[i], ttl)
            end
            return {"already", count}
        end
        local count = tonumber(redis.call("GET", KEYS[3]) or "0")
        if count >= tonumber(ARGV[2]) then
            return {"full", count}
        end
        redis.call("SADD", KEYS[2], ARGV[1])
        count = redis.call("INCR", KEYS[3])
        for i = 1, 4 do
            redis.call("PEXPIRE", KEYS[i], ttl)
        end
        return {"joined", count}
    "#,
    )
});

static LEAVE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: meta, members, count, jtis
        -- ARGV: conn, ttl_ms, jti_key_prefix
        if redis.call("SREM", KEYS[2], ARGV[1]) == 0 then
            return tonumber(redis.call("GET", KEYS[3]) or "0")
        end
        local remaining = redis.call("DECR", KEYS[3])
        if remaining <= 0 then
            local jtis = redis.call("SMEMBERS", KEYS[4])
            for i = 1, #jtis do
                redis.call("DEL", ARGV[3] .. jtis[i])
            end
            redis.call("DEL", KEYS[1], KEYS[2], KEYS[3], KEYS[4])
            return 0
        end
        local ttl = tonumber(ARGV[2])
        for i = 1, 4 do
            redis.call("PEXPIRE", KEYS[i], ttl)
        end
        return remaining
    "#,
    )
});

static MARK_JTI_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: marker, jtis
        -- ARGV: jti, marker_ttl_ms, room_ttl_ms
        if redis.call("SET", KEYS[1], "1", "NX", "PX", tonumber(ARGV[2])) then
            redis.call("SADD", KEYS[2], ARGV[1])
            redis.call("PEXPIRE", KEYS[2], tonumber(ARGV[3]))
            return 1
        end
        return 0
    "#,
    )
});

static CREATE_WITH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: meta, members, count, jtis
        -- ARGV: conn, ttl_ms, created_ms
        redis.call("DEL", KEYS[2], KEYS[4])
        redis.call("HSET", KEYS[1], "created_at", ARGV[3])
        redis.call("SADD", KEYS[2], ARGV[1])
        redis.call("SET", KEYS[3], 1)
        local ttl = tonumber(ARGV[2])
        for i = 1, 4 do
            redis.call("PEXPIRE", KEYS[i], ttl)
        end
        return 1
    "#,
    )
});

static CREATE_EMPTY_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: meta, count
        -- ARGV: ttl_ms, created_ms
        -- idempotent: an existing room only gets its TTL refreshed
        redis.call("HSETNX", KEYS[1], "created_at", ARGV[2])
        redis.call("SETNX", KEYS[2], 0)
        redis.call("PEXPIRE", KEYS[1], tonumber(ARGV[1]))
        redis.call("PEXPIRE", KEYS[2], tonumber(ARGV[1]))
        return 1
    "#,
    )
});

static TOUCH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        -- KEYS: meta, members, count, jtis
        -- ARGV: ttl_ms
        local ttl = tonumber(ARGV[1])
        for i = 1, 4 do
            if redis.call("EXISTS", KEYS[i]) == 1 then
                redis.call("PEXPIRE", KEYS[i], ttl)
            end
        end
        return 1
    "#,
    )
});

/// Redis-backed room store.
pub struct RedisRoomStore {
    connection: ConnectionManager,
    max_participants: u32,
    room_ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl RedisRoomStore {
    /// Connect to the store.
    pub async fn connect(
        url: &str,
        connect_timeout_ms: u64,
        max_retries: usize,
        max_participants: u32,
        room_ttl_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(max_retries)
            .set_connection_timeout(Duration::from_millis(connect_timeout_ms));

        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            connection,
            max_participants,
            room_ttl_ms,
            clock,
        })
    }

    fn key_meta(rid: &RoomId) -> String {
        format!("room:{}:meta", rid.as_str())
    }

    fn key_members(rid: &RoomId) -> String {
        format!("room:{}:members", rid.as_str())
    }

    fn key_count(rid: &RoomId) -> String {
        format!("room:{}:count", rid.as_str())
    }

    fn key_jtis(rid: &RoomId) -> String {
        format!("room:{}:jtis", rid.as_str())
    }

    fn key_jti(rid: &RoomId, jti: &Jti) -> String {
        format!("room:{}:jti:{}", rid.as_str(), jti.as_str())
    }

    fn key_jti_prefix(rid: &RoomId) -> String {
        format!("room:{}:jti:", rid.as_str())
    }

    fn map_err(e: redis::RedisError) -> StoreError {
        if e.is_timeout() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Malformed(e.to_string())
        }
    }
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    async fn create_empty(&self, rid: &RoomId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = CREATE_EMPTY_SCRIPT
            .key(Self::key_meta(rid))
            .key(Self::key_count(rid))
            .arg(self.room_ttl_ms)
            .arg(self.clock.now_unix_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn create_with(&self, rid: &RoomId, conn_id: &ConnId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = CREATE_WITH_SCRIPT
            .key(Self::key_meta(rid))
            .key(Self::key_members(rid))
            .key(Self::key_count(rid))
            .key(Self::key_jtis(rid))
            .arg(conn_id.as_str())
            .arg(self.room_ttl_ms)
            .arg(self.clock.now_unix_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn try_join(&self, rid: &RoomId, conn_id: &ConnId) -> Result<JoinOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let (status, count): (String, i64) = TRY_JOIN_SCRIPT
            .key(Self::key_meta(rid))
            .key(Self::key_members(rid))
            .key(Self::key_count(rid))
            .key(Self::key_jtis(rid))
            .arg(conn_id.as_str())
            .arg(self.max_participants)
            .arg(self.room_ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match status.as_str() {
            "joined" => Ok(JoinOutcome::Joined {
                count: count as u32,
            }),
            "already" => Ok(JoinOutcome::AlreadyMember {
                count: count as u32,
            }),
            "full" => Ok(JoinOutcome::Full),
            "noroom" => Ok(JoinOutcome::NoRoom),
            other => Err(StoreError::Malformed(format!(
                "unexpected join status '{other}'"
            ))),
        }
    }

    async fn leave(&self, rid: &RoomId, conn_id: &ConnId) -> Result<u32, StoreError> {
        let mut conn = self.connection.clone();
        let remaining: i64 = LEAVE_SCRIPT
            .key(Self::key_meta(rid))
            .key(Self::key_members(rid))
            .key(Self::key_count(rid))
            .key(Self::key_jtis(rid))
            .arg(conn_id.as_str())
            .arg(self.room_ttl_ms)
            .arg(Self::key_jti_prefix(rid))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(remaining.max(0) as u32)
    }

    async fn touch(&self, rid: &RoomId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = TOUCH_SCRIPT
            .key(Self::key_meta(rid))
            .key(Self::key_members(rid))
            .key(Self::key_count(rid))
            .key(Self::key_jtis(rid))
            .arg(self.room_ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn mark_jti(&self, rid: &RoomId, jti: &Jti, ttl_ms: i64) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let fresh: i64 = MARK_JTI_SCRIPT
            .key(Self::key_jti(rid, jti))
            .key(Self::key_jtis(rid))
            .arg(jti.as_str())
            .arg(ttl_ms.max(1))
            .arg(self.room_ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(fresh == 1)
    }

    async fn exists(&self, rid: &RoomId) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(Self::key_meta(rid))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(found == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}
