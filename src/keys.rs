use rand::Rng;

const KEY_BYTES: usize = 16;

pub const DEPLOYMENT_KEY_PREFIX: &str = "dk_";
pub const ACCESS_KEY_PREFIX: &str = "ck_";

/// Generates `prefix` + 32 hex chars from a cryptographically secure RNG.
#[must_use]
pub fn generate_key(prefix: &str) -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

#[must_use]
pub fn generate_deployment_key() -> String {
    generate_key(DEPLOYMENT_KEY_PREFIX)
}

#[must_use]
pub fn generate_access_key() -> String {
    generate_key(ACCESS_KEY_PREFIX)
}

/// Generates an opaque entity id.
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = generate_deployment_key();
        assert!(key.starts_with("dk_"));
        assert_eq!(key.len(), 3 + 32);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_access_key();
        let b = generate_access_key();
        assert!(a.starts_with("ck_"));
        assert_ne!(a, b);
    }
}
