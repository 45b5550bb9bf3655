//! 参加許可トークンの発行と検証
//!
//! ## 責務
//!
//! - `{v, rid, exp, jti}` を canonical JSON として直列化し、プロセス共通の
//!   秘密鍵で HMAC-SHA256 署名する
//! - `base64url(payload).base64url(mac)` 形式のトークン文字列を発行する
//! - 受信トークンを定数時間比較で検証し、失敗種別を返す
//!
//! コーデックは状態を持たず、並行利用に対して安全です。ローテーション用
//! トークンと再接続用トークンは同じコーデックで発行され、有効期限だけが
//! 異なります。

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::{Jti, RoomId, TOKEN_VERSION, TokenClaims, TokenError};

type HmacSha256 = Hmac<Sha256>;

/// Secret shorter than the required minimum.
#[derive(Debug, Error)]
#[error("join token secret must be at least 32 bytes")]
pub struct SecretTooShort;

/// Mints and verifies MAC-signed capability tokens.
pub struct JoinTokenCodec {
    key: Vec<u8>,
}

impl JoinTokenCodec {
    pub fn new(secret: &[u8]) -> Result<Self, SecretTooShort> {
        if secret.len() < 32 {
            return Err(SecretTooShort);
        }
        Ok(Self {
            key: secret.to_vec(),
        })
    }

    /// Mint a token granting one join of `rid`, valid until `exp_ms`.
    pub fn mint(&self, rid: &RoomId, exp_ms: i64, jti: &Jti) -> String {
        let claims = TokenClaims {
            v: TOKEN_VERSION,
            rid: rid.as_str().to_string(),
            exp: exp_ms,
            jti: jti.as_str().to_string(),
        };
        let payload = serde_json::to_vec(&claims).expect("token claims serialize");
        let mac = self.mac(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac)
        )
    }

    /// Verify a token against the expected room and the current time.
    ///
    /// The MAC is checked before the payload is parsed, so nothing inside
    /// an unauthenticated token influences control flow beyond the split.
    pub fn verify(
        &self,
        token: &str,
        expected_rid: &RoomId,
        now_ms: i64,
    ) -> Result<TokenClaims, TokenError> {
        let (payload_b64, mac_b64) = token.split_once('.').ok_or(TokenError::Format)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Format)?;
        let mac = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| TokenError::Format)?;

        let mut verifier =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        verifier.update(&payload);
        verifier.verify_slice(&mac).map_err(|_| TokenError::Mac)?;

        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Format)?;
        if claims.v != TOKEN_VERSION {
            return Err(TokenError::Format);
        }
        if claims.rid != expected_rid.as_str() {
            return Err(TokenError::RoomMismatch);
        }
        if claims.exp <= now_ms {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JtiFactory, RoomIdFactory};

    const NOW: i64 = 1_700_000_000_000;

    fn codec() -> JoinTokenCodec {
        JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_secret_too_short_is_rejected() {
        // テスト項目: 32 バイト未満の秘密鍵が拒否される
        // given (前提条件):

        // when (操作):
        let result = JoinTokenCodec::new(b"short secret");

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_mint_then_verify_roundtrip() {
        // テスト項目: 発行したトークンが元のクレームに復元される
        // given (前提条件):
        let codec = codec();
        let rid = RoomIdFactory::generate();
        let jti = JtiFactory::generate();

        // when (操作):
        let token = codec.mint(&rid, NOW + 60_000, &jti);
        let claims = codec.verify(&token, &rid, NOW).unwrap();

        // then (期待する結果):
        assert_eq!(claims.v, TOKEN_VERSION);
        assert_eq!(claims.rid, rid.as_str());
        assert_eq!(claims.exp, NOW + 60_000);
        assert_eq!(claims.jti, jti.as_str());
    }

    #[test]
    fn test_bit_flip_in_payload_fails_verification() {
        // テスト項目: ペイロード側 1 ビット反転で MAC か形式エラーになる
        // given (前提条件):
        let codec = codec();
        let rid = RoomIdFactory::generate();
        let token = codec.mint(&rid, NOW + 60_000, &JtiFactory::generate());

        // when (操作): ペイロード先頭の 1 文字を別の base64url 文字に置換
        let mut chars: Vec<char> = token.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        let result = codec.verify(&tampered, &rid, NOW);

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(TokenError::Mac) | Err(TokenError::Format)
        ));
    }

    #[test]
    fn test_bit_flip_in_mac_fails_verification() {
        // テスト項目: MAC 側の改竄で検証が失敗する
        // given (前提条件):
        let codec = codec();
        let rid = RoomIdFactory::generate();
        let token = codec.mint(&rid, NOW + 60_000, &JtiFactory::generate());

        // when (操作):
        let dot = token.find('.').unwrap();
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(tampered.len() > dot);
        let result = codec.verify(&tampered, &rid, NOW);

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(TokenError::Mac) | Err(TokenError::Format)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // テスト項目: 期限切れトークンが TOKEN_EXPIRED になる
        // given (前提条件):
        let codec = codec();
        let rid = RoomIdFactory::generate();
        let token = codec.mint(&rid, NOW - 1, &JtiFactory::generate());

        // when (操作):
        let result = codec.verify(&token, &rid, NOW);

        // then (期待する結果):
        assert_eq!(result, Err(TokenError::Expired));
    }

    #[test]
    fn test_room_mismatch_is_rejected() {
        // テスト項目: 別ルーム向けトークンが TOKEN_ROOM_MISMATCH になる
        // given (前提条件):
        let codec = codec();
        let minted_for = RoomIdFactory::generate();
        let presented_to = RoomIdFactory::generate();
        let token = codec.mint(&minted_for, NOW + 60_000, &JtiFactory::generate());

        // when (操作):
        let result = codec.verify(&token, &presented_to, NOW);

        // then (期待する結果):
        assert_eq!(result, Err(TokenError::RoomMismatch));
    }

    #[test]
    fn test_missing_separator_is_format_error() {
        // テスト項目: 区切り文字のないトークンが TOKEN_FORMAT になる
        // given (前提条件):
        let codec = codec();
        let rid = RoomIdFactory::generate();

        // when (操作):
        let result = codec.verify("not-a-token", &rid, NOW);

        // then (期待する結果):
        assert_eq!(result, Err(TokenError::Format));
    }

    #[test]
    fn test_wrong_secret_fails_mac() {
        // テスト項目: 異なる秘密鍵で発行されたトークンが TOKEN_MAC になる
        // given (前提条件):
        let codec_a = codec();
        let codec_b =
            JoinTokenCodec::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        let rid = RoomIdFactory::generate();
        let token = codec_b.mint(&rid, NOW + 60_000, &JtiFactory::generate());

        // when (操作):
        let result = codec_a.verify(&token, &rid, NOW);

        // then (期待する結果):
        assert_eq!(result, Err(TokenError::Mac));
    }
}
