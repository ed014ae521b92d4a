use anyhow::Result;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Signature;
use serde_json::{json, Value};

/// Sign an `/exchange` action together with its nonce
///
/// # Errors
/// Returns error if signing fails
pub async fn sign_action(wallet: &LocalWallet, action: &Value, nonce: u64) -> Result<Signature> {
    let message = json!({
        "action": action,
        "nonce": nonce,
    });

    let message_str = serde_json::to_string(&message)?;
    let signature = wallet.sign_message(message_str.as_bytes()).await?;

    Ok(signature)
}

/// Convert signature to hex string
#[must_use]
pub fn signature_to_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

/// Signature in the `{r, s, v}` form the exchange endpoint expects.
#[must_use]
pub fn signature_to_rsv(signature: &Signature) -> Value {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    signature.r.to_big_endian(&mut r);
    signature.s.to_big_endian(&mut s);
    json!({
        "r": format!("0x{}", hex::encode(r)),
        "s": format!("0x{}", hex::encode(s)),
        "v": signature.v,
    })
}

/// Full signed request body for `/exchange`.
///
/// # Errors
/// Returns error if signing fails
pub async fn signed_request(wallet: &LocalWallet, action: Value, nonce: u64) -> Result<Value> {
    let signature = sign_action(wallet, &action, nonce).await?;
    Ok(json!({
        "action": action,
        "nonce": nonce,
        "signature": signature_to_rsv(&signature),
    }))
}
