//! 値オブジェクト定義
//!
//! 識別子はすべてサーバー側で生成されるランダム値です。クライアント入力から
//! 導出されることはなく、検証済みコンストラクタ経由でのみ生成されます。

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Validation failure for a value object constructor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidValue {
    #[error("invalid room id")]
    RoomId,
    #[error("invalid connection id")]
    ConnId,
    #[error("invalid token id")]
    Jti,
    #[error("invalid label")]
    Label,
}

fn is_base64url(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn random_id(num_bytes: usize) -> String {
    let mut buf = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

// ========================================
// RoomId
// ========================================

/// 128-bit random room identifier, URL-safe text (22 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Parse a room id received from a client.
    pub fn new(value: String) -> Result<Self, InvalidValue> {
        if value.len() == 22 && is_base64url(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidValue::RoomId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Factory generating fresh random room ids.
pub struct RoomIdFactory;

impl RoomIdFactory {
    pub fn generate() -> RoomId {
        RoomId(random_id(16))
    }
}

// ========================================
// ConnId
// ========================================

/// 96-bit random per-socket connection identifier (16 chars).
///
/// Never derived from client input and never exposed as identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnId(String);

impl ConnId {
    pub fn new(value: String) -> Result<Self, InvalidValue> {
        if value.len() == 16 && is_base64url(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidValue::ConnId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Factory generating fresh random connection ids.
pub struct ConnIdFactory;

impl ConnIdFactory {
    pub fn generate() -> ConnId {
        ConnId(random_id(12))
    }
}

// ========================================
// Jti
// ========================================

/// 128-bit random single-use token identifier (22 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jti(String);

impl Jti {
    pub fn new(value: String) -> Result<Self, InvalidValue> {
        if value.len() == 22 && is_base64url(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidValue::Jti)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Factory generating fresh random token ids.
pub struct JtiFactory;

impl JtiFactory {
    pub fn generate() -> Jti {
        Jti(random_id(16))
    }
}

// ========================================
// Label
// ========================================

/// Display label for a participant inside a room.
///
/// Either server-assigned (`P<n>`) or a client-supplied short string.
/// Assigned once on join and broadcast unchanged afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label(String);

impl Label {
    /// Validate a client-supplied label: 1..=32 printable characters.
    pub fn client(value: &str) -> Result<Self, InvalidValue> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || trimmed.chars().count() > 32
            || trimmed.chars().any(|c| c.is_control())
        {
            return Err(InvalidValue::Label);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Server-assigned positional label.
    pub fn participant(n: u32) -> Self {
        Self(format!("P{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// ========================================
// Fingerprint
// ========================================

/// Deterministic short hash of a room id shown to humans.
///
/// Not a secret and never used for access decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(rid: &RoomId) -> Self {
        let digest = Sha256::digest(rid.as_str().as_bytes());
        let head = hex::encode_upper(&digest[..4]);
        Self(format!("{}-{}", &head[..4], &head[4..]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_factory_generates_valid_ids() {
        // テスト項目: 生成された RoomId が自身の検証を通過する
        // given (前提条件):

        // when (操作):
        let rid = RoomIdFactory::generate();

        // then (期待する結果):
        assert_eq!(rid.as_str().len(), 22);
        assert!(RoomId::new(rid.as_str().to_string()).is_ok());
    }

    #[test]
    fn test_room_id_factory_generates_unique_ids() {
        // テスト項目: 連続生成された RoomId が衝突しない
        // given (前提条件):

        // when (操作):
        let a = RoomIdFactory::generate();
        let b = RoomIdFactory::generate();

        // then (期待する結果):
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_id_rejects_wrong_length() {
        // テスト項目: 長さが不正な RoomId が拒否される
        // given (前提条件):
        let value = "short".to_string();

        // when (操作):
        let result = RoomId::new(value);

        // then (期待する結果):
        assert_eq!(result, Err(InvalidValue::RoomId));
    }

    #[test]
    fn test_room_id_rejects_invalid_characters() {
        // テスト項目: URL-safe でない文字を含む RoomId が拒否される
        // given (前提条件):
        let value = "!!!!!!!!!!!!!!!!!!!!!!".to_string(); // 22 chars

        // when (操作):
        let result = RoomId::new(value);

        // then (期待する結果):
        assert_eq!(result, Err(InvalidValue::RoomId));
    }

    #[test]
    fn test_conn_id_factory_generates_valid_ids() {
        // テスト項目: 生成された ConnId が自身の検証を通過する
        // given (前提条件):

        // when (操作):
        let conn = ConnIdFactory::generate();

        // then (期待する結果):
        assert_eq!(conn.as_str().len(), 16);
        assert!(ConnId::new(conn.as_str().to_string()).is_ok());
    }

    #[test]
    fn test_label_client_accepts_short_string() {
        // テスト項目: 妥当なクライアント指定ラベルが受理される
        // given (前提条件):

        // when (操作):
        let label = Label::client("bob");

        // then (期待する結果):
        assert_eq!(label.unwrap().as_str(), "bob");
    }

    #[test]
    fn test_label_client_trims_whitespace() {
        // テスト項目: 前後の空白が除去される
        // given (前提条件):

        // when (操作):
        let label = Label::client("  bob  ").unwrap();

        // then (期待する結果):
        assert_eq!(label.as_str(), "bob");
    }

    #[test]
    fn test_label_client_rejects_empty_and_control() {
        // テスト項目: 空文字と制御文字を含むラベルが拒否される
        // given (前提条件):

        // when (操作):
        let empty = Label::client("   ");
        let control = Label::client("a\u{0007}b");
        let too_long = Label::client(&"x".repeat(33));

        // then (期待する結果):
        assert_eq!(empty, Err(InvalidValue::Label));
        assert_eq!(control, Err(InvalidValue::Label));
        assert_eq!(too_long, Err(InvalidValue::Label));
    }

    #[test]
    fn test_label_participant_format() {
        // テスト項目: サーバー付与ラベルが P<n> 形式になる
        // given (前提条件):

        // when (操作):
        let label = Label::participant(3);

        // then (期待する結果):
        assert_eq!(label.as_str(), "P3");
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        // テスト項目: 同じ RoomId から常に同じフィンガープリントが得られる
        // given (前提条件):
        let rid = RoomIdFactory::generate();

        // when (操作):
        let a = Fingerprint::of(&rid);
        let b = Fingerprint::of(&rid);

        // then (期待する結果):
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 9); // XXXX-XXXX
    }

    #[test]
    fn test_fingerprint_differs_between_rooms() {
        // テスト項目: 異なる RoomId のフィンガープリントは（ほぼ確実に）異なる
        // given (前提条件):
        let a = RoomIdFactory::generate();
        let b = RoomIdFactory::generate();

        // when (操作):
        let fa = Fingerprint::of(&a);
        let fb = Fingerprint::of(&b);

        // then (期待する結果):
        assert_ne!(fa, fb);
    }
}
