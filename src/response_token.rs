use crate::models::{InterestResponse, LeadCategory};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// Length of the hex token embedded in action links.
const TOKEN_LEN: usize = 32;

/// Derives the response token for a lead.
///
/// The token binds the lead id and category to a server-side secret, so the
/// interest endpoint can authenticate a click without any lookup.
pub fn response_token(secret: &str, category: LeadCategory, lead_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(category.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(lead_id.as_hyphenated().to_string().as_bytes());
    let mut token = hex::encode(hasher.finalize());
    token.truncate(TOKEN_LEN);
    token
}

pub fn verify_response_token(
    secret: &str,
    category: LeadCategory,
    lead_id: Uuid,
    token: &str,
) -> bool {
    constant_time_compare(&response_token(secret, category, lead_id), token.trim())
}

/// Constant-time string comparison
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Builds the one-click link for a response.
pub fn interest_link(
    public_base_url: &str,
    secret: &str,
    category: LeadCategory,
    lead_id: Uuid,
    response: InterestResponse,
) -> Result<String, url::ParseError> {
    let endpoint = format!("{}/api/v1/interest", public_base_url.trim_end_matches('/'));
    let id = lead_id.to_string();
    let token = response_token(secret, category, lead_id);

    let url = Url::parse_with_params(
        &endpoint,
        &[
            ("id", id.as_str()),
            ("response", response.as_str()),
            ("category", category.as_str()),
            ("token", token.as_str()),
        ],
    )?;

    Ok(url.into())
}
