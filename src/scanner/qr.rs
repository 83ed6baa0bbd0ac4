//! QR payload forms: a bare student id, or a JSON object carrying
//! `student_id` (or `id`) as a string or number.

use serde_json::Value;

/// Student id encoded in a QR payload, `None` when the payload is unusable.
#[must_use]
pub fn student_id_from_qr(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed).ok()?;
        let id = value.get("student_id").or_else(|| value.get("id"))?;
        return match id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
    }

    if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return None;
    }
    Some(trimmed.to_string())
}
