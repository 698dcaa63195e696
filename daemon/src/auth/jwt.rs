use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const CHARS_LEN: usize = CHARS.len();

const ISSUER: &str = "SpigotFleet.Daemon";

pub fn generate_secret_string(length: usize) -> Result<String, ring::error::Unspecified> {
    let rng = SystemRandom::new();
    let mut s = String::with_capacity(length);

    for _ in 0..length {
        let idx = uniform_random_index(&rng, CHARS_LEN)?;
        s.push(CHARS[idx] as char);
    }

    Ok(s)
}

fn uniform_random_index(rng: &SystemRandom, max: usize) -> Result<usize, ring::error::Unspecified> {
    let byte_count = ((max as f64).log2() / 8.0).ceil() as usize;
    let mut buf = vec![0u8; byte_count];

    loop {
        rng.fill(&mut buf)?;
        let num = buf.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        if num <= (u64::MAX - (u64::MAX % max as u64)) {
            return Ok((num % max as u64) as usize);
        }
    }
}

/// Expiring sub-token claims; issuer and audience are pinned so tokens for
/// other services never validate here.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    iss: String,
    aud: String,
    pub exp: u64,
    pub jti: String,
}

impl JwtClaims {
    pub fn new(expires_secs: u64) -> Self {
        Self {
            exp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + expires_secs,
            iss: ISSUER.into(),
            aud: ISSUER.into(),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn decode(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        let mut validation = Validation::default();
        validation.set_audience(&[ISSUER.to_string()]);
        validation.set_issuer(&[ISSUER.to_string()]);
        validation.leeway = 0;

        decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
    }

    pub fn encode(&self, secret: &str) -> String {
        encode(
            &Header::default(),
            &self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn secrets_have_the_requested_length() {
        let secret = generate_secret_string(32).unwrap();
        assert_eq!(secret.len(), 32);
        assert!(secret.bytes().all(|b| CHARS.contains(&b)));
    }

    #[test]
    fn round_trip_with_the_right_secret() {
        let claims = JwtClaims::new(60);
        let token = claims.encode("secret-a");
        let decoded = JwtClaims::decode(&token, "secret-a").unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = JwtClaims::new(60).encode("secret-a");
        assert!(JwtClaims::decode(&token, "secret-b").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = JwtClaims::new(60);
        claims.exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            - 10;
        let token = claims.encode("secret-a");
        assert!(JwtClaims::decode(&token, "secret-a").is_err());
    }
}
