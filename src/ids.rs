//! Identifier generation (component M): branch tokens, Call-IDs, tags.

use rand::Rng;

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

/// A Via `branch` parameter, RFC 3261-compliant (magic cookie + 16 hex chars).
pub fn generate_branch() -> String {
    format!("z9hG4bK{}", random_hex(8))
}

/// A Call-ID of the form `<16 hex chars>@<local_host>`.
pub fn generate_call_id(local_host: &str) -> String {
    format!("{}@{}", random_hex(8), local_host)
}

/// A From/To tag: 64 bits of entropy, hex-encoded (well above the 32-bit
/// invariant floor).
pub fn generate_tag() -> String {
    random_hex(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_has_magic_cookie_prefix() {
        let branch = generate_branch();
        assert!(branch.starts_with("z9hG4bK"));
        assert_eq!(branch.len(), "z9hG4bK".len() + 16);
    }

    #[test]
    fn call_id_contains_host() {
        let call_id = generate_call_id("pc33.atlanta.com");
        assert!(call_id.ends_with("@pc33.atlanta.com"));
    }

    #[test]
    fn tags_are_sufficiently_unique() {
        let a = generate_tag();
        let b = generate_tag();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }
}
