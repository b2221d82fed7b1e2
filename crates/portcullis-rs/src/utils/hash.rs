//! Hash functions used by the hashing load balancers.

/// 32-bit FNV-1a over a byte string.
///
/// Used for placing virtual nodes on the consistent-hash ring and for mapping
/// client keys onto it. Offset basis 0x811C9DC5, prime 0x01000193, wrapping
/// unsigned arithmetic.
pub fn fnv1a_32(data: &str) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for byte in data.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Rolling polynomial hash of a client key, wrapped to 32 bits.
///
/// Each character folds in as `h = (h << 5) - h + c`, i.e. `h * 31 + c` with
/// wraparound. The IP-hash balancer reduces this modulo the eligible backend
/// count, so identical keys always land on the same backend for a fixed set.
pub fn client_key_hash(key: &str) -> u32 {
    let mut hash: u32 = 0;
    for ch in key.chars() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(ch as u32);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_vectors() {
        // Reference values for the 32-bit FNV-1a parameters.
        assert_eq!(fnv1a_32(""), 0x811C_9DC5);
        assert_eq!(fnv1a_32("a"), 0xE40C_292C);
        assert_eq!(fnv1a_32("foobar"), 0xBF9C_F968);
    }

    #[test]
    fn client_key_hash_is_deterministic() {
        let a = client_key_hash("192.168.1.10");
        let b = client_key_hash("192.168.1.10");
        assert_eq!(a, b);
        assert_ne!(a, client_key_hash("192.168.1.11"));
    }

    #[test]
    fn client_key_hash_matches_rolling_definition() {
        // h("ab") = (h("a") * 31) + 'b' with h("a") = 'a'.
        let expected = ('a' as u32) * 31 + 'b' as u32;
        assert_eq!(client_key_hash("ab"), expected);
    }
}
