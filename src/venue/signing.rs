use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a query string with HMAC-SHA256 (Binance style). Returns a
/// hex-encoded signature appended to the request as `signature=...`.
pub fn sign_binance(query: &str, secret: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| format!("HMAC error: {}", e))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binance_sign() {
        let query = "symbol=BTCUSDT&side=BUY&type=LIMIT&timeInForce=GTC&quantity=0.001&price=50000&timestamp=1234567890000";
        let secret = "test_secret";
        let sig = sign_binance(query, secret).unwrap();
        assert!(!sig.is_empty());
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn test_binance_sign_deterministic() {
        let sig1 = sign_binance("a=1&b=2", "secret").unwrap();
        let sig2 = sign_binance("a=1&b=2", "secret").unwrap();
        assert_eq!(sig1, sig2);
    }
}
