use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid phone number '{0}'")]
pub struct InvalidPhone(pub String);

/// Normalize a phone number to E.164 (+31612345678).
///
/// Dutch numbers may be written nationally (`06 1234 5678`); anything else
/// needs a country code, written as `+`, `00`, or bare digits the way the
/// WhatsApp webhook delivers them (`31612345678`).
pub fn normalize_phone(raw: &str) -> Result<String, InvalidPhone> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return Err(InvalidPhone(raw.to_string()));
    }

    let candidate = match trimmed.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => trimmed.to_string(),
    };

    if let Some(formatted) = parse_valid(&candidate) {
        tracing::debug!("✓ Valid phone: {} → {}", raw, formatted);
        return Ok(formatted);
    }

    // Bare international digits, as sent by the messaging provider
    if candidate.chars().all(|c| c.is_ascii_digit()) {
        if let Some(formatted) = parse_valid(&format!("+{}", candidate)) {
            tracing::debug!("✓ Valid phone: {} → {}", raw, formatted);
            return Ok(formatted);
        }
    }

    tracing::warn!("❌ Invalid phone number: {}", raw);
    Err(InvalidPhone(raw.to_string()))
}

fn parse_valid(candidate: &str) -> Option<String> {
    let number = phonenumber::parse(Some(CountryId::NL), candidate).ok()?;
    if phonenumber::is_valid(&number) {
        Some(number.format().mode(Mode::E164).to_string())
    } else {
        None
    }
}
