//! JSON-RPC wire envelopes and the error taxonomy surfaced to frontends.
//!
//! Frontends speak line-delimited JSON-RPC: `{method, params, id}` in,
//! `{result, error, id}` out. Error codes follow the bitcoind numeric
//! assignments so existing frontends can switch over unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// `invalid-request`: malformed JSON-RPC.
pub const ERR_INVALID_REQUEST: i32 = -32600;
/// `invalid-params`: well-formed request with rejected parameters.
pub const ERR_INVALID_PARAMS: i32 = -32602;
/// `internal`: programmer error or environmental failure.
pub const ERR_INTERNAL: i32 = -32603;
/// `invalid-parameter`: semantically rejected parameter value.
pub const ERR_INVALID_PARAMETER: i32 = -8;
/// `wallet`: generic key-store failure.
pub const ERR_WALLET: i32 = -4;
/// `invalid-account-name`: named account absent (or already present).
pub const ERR_WALLET_INVALID_ACCOUNT_NAME: i32 = -11;
/// `wallet-unlock-needed`: operation requires the decryption key.
pub const ERR_WALLET_UNLOCK_NEEDED: i32 = -13;
/// `wallet-passphrase-incorrect`: supplied passphrase did not decrypt.
pub const ERR_WALLET_PASSPHRASE_INCORRECT: i32 = -14;
/// `wrong-enc-state`: lock transition from an incompatible state.
pub const ERR_WALLET_WRONG_ENC_STATE: i32 = -16;

/// A parsed JSON-RPC request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: Value,
}

/// A JSON-RPC reply envelope. All three fields are always serialized,
/// with `null` standing in for an absent result or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub result: Value,
    pub error: Option<RpcError>,
    pub id: Value,
}

/// The error object carried in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request() -> Self {
        Self::new(ERR_INVALID_REQUEST, "invalid request")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, message)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMETER, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }

    pub fn wallet(message: impl Into<String>) -> Self {
        Self::new(ERR_WALLET, message)
    }

    pub fn invalid_account_name() -> Self {
        Self::new(ERR_WALLET_INVALID_ACCOUNT_NAME, "invalid account name")
    }

    pub fn unlock_needed() -> Self {
        Self::new(
            ERR_WALLET_UNLOCK_NEEDED,
            "enter the wallet passphrase with walletpassphrase first",
        )
    }

    pub fn passphrase_incorrect() -> Self {
        Self::new(
            ERR_WALLET_PASSPHRASE_INCORRECT,
            "the wallet passphrase entered was incorrect",
        )
    }

    pub fn wrong_enc_state() -> Self {
        Self::new(
            ERR_WALLET_WRONG_ENC_STATE,
            "command given in wrong wallet encryption state",
        )
    }
}

/// The reply channel of a connected frontend.
///
/// Sends never fail loudly: a closed or gone frontend silently drops the
/// message, which is how disconnection is absorbed throughout the daemon.
#[derive(Debug, Clone)]
pub struct FrontendChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl FrontendChannel {
    /// Create a channel pair; the receiver side is pumped to the frontend
    /// connection by the transport.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
            },
            rx,
        )
    }

    /// Queue a serialized message for the frontend. Returns whether the
    /// frontend was still listening.
    pub fn send(&self, msg: Vec<u8>) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Whether the frontend has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Marshal and send a success reply. Serialization failures are
    /// silently dropped.
    pub fn reply_success(&self, id: &Value, result: Value) {
        self.reply(Reply {
            result,
            error: None,
            id: id.clone(),
        });
    }

    /// Marshal and send an error reply. Serialization failures are
    /// silently dropped.
    pub fn reply_error(&self, id: &Value, error: RpcError) {
        self.reply(Reply {
            result: Value::Null,
            error: Some(error),
            id: id.clone(),
        });
    }

    fn reply(&self, reply: Reply) {
        if let Ok(bytes) = serde_json::to_vec(&reply) {
            self.send(bytes);
        }
    }
}

/// Positional-parameter accessors shared by the local handlers.
pub mod params {
    use super::RpcError;
    use serde_json::Value;

    pub fn string(params: &[Value], idx: usize, name: &str) -> Result<String, RpcError> {
        match params.get(idx) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(RpcError::invalid_params(format!("{name} must be a string"))),
        }
    }

    pub fn opt_string(params: &[Value], idx: usize, default: &str) -> Result<String, RpcError> {
        match params.get(idx) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(RpcError::invalid_params("expected a string parameter")),
        }
    }

    pub fn number(params: &[Value], idx: usize, name: &str) -> Result<f64, RpcError> {
        match params.get(idx).and_then(Value::as_f64) {
            Some(n) => Ok(n),
            None => Err(RpcError::invalid_params(format!("{name} must be a number"))),
        }
    }

    pub fn opt_number(params: &[Value], idx: usize, default: f64) -> Result<f64, RpcError> {
        match params.get(idx) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| RpcError::invalid_params("expected a numeric parameter")),
        }
    }

    pub fn opt_bool(params: &[Value], idx: usize, default: bool) -> Result<bool, RpcError> {
        match params.get(idx) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(RpcError::invalid_params("expected a boolean parameter")),
        }
    }

    /// Positive-or-zero confirmation depth; negative values are rejected
    /// with the distinguished parameter error.
    pub fn min_confirmations(params: &[Value], idx: usize) -> Result<u32, RpcError> {
        let raw = opt_number(params, idx, 1.0)?;
        if raw < 0.0 {
            return Err(RpcError::invalid_parameter("minconf must be positive"));
        }
        Ok(raw as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_serializes_all_fields() {
        let reply = Reply {
            result: Value::Null,
            error: None,
            id: json!(7),
        };
        let encoded = serde_json::to_string(&reply).unwrap();
        assert_eq!(encoded, r#"{"result":null,"error":null,"id":7}"#);
    }

    #[test]
    fn error_reply_carries_code_and_message() {
        let reply = Reply {
            result: Value::Null,
            error: Some(RpcError::invalid_account_name()),
            id: json!("x"),
        };
        let v: Value = serde_json::from_str(&serde_json::to_string(&reply).unwrap()).unwrap();
        assert_eq!(v["error"]["code"], json!(ERR_WALLET_INVALID_ACCOUNT_NAME));
        assert_eq!(v["error"]["message"], json!("invalid account name"));
    }

    #[test]
    fn request_defaults_missing_fields() {
        let req: Request = serde_json::from_str(r#"{"method":"getbalance"}"#).unwrap();
        assert_eq!(req.method, "getbalance");
        assert!(req.params.is_empty());
        assert_eq!(req.id, Value::Null);
    }

    #[test]
    fn min_confirmations_rejects_negative() {
        let err = params::min_confirmations(&[json!(-1)], 0).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMETER);
        assert_eq!(params::min_confirmations(&[json!(6)], 0).unwrap(), 6);
        assert_eq!(params::min_confirmations(&[], 0).unwrap(), 1);
    }

    #[test]
    fn frontend_channel_reports_closed_receiver() {
        let (frontend, rx) = FrontendChannel::new();
        drop(rx);
        assert!(frontend.is_closed());
        assert!(!frontend.send(b"gone".to_vec()));
    }
}
