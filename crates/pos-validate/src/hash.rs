//! Snapshot content hashing for duplicate detection.
//!
//! `H(snapshot)` = SHA-256 over the positions sorted by
//! `(product_id, position_type)` and serialized one per line as
//! `product|quantity(plain)|price(plain)|currency|position_type`.
//! The hash is invariant under permutation of the input list.

use sha2::{Digest, Sha256};

use crate::normalizer::{micros_to_plain, NormalizedPosition};

/// Totals stored alongside the content hash; cheap sanity anchors for
/// support queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotDigest {
    pub position_count: i64,
    pub total_quantity_micros: i64,
    pub total_market_value_micros: i64,
}

/// Compute the canonical content hash (lowercase hex) plus totals.
pub fn content_hash(positions: &[NormalizedPosition]) -> (String, SnapshotDigest) {
    let mut sorted: Vec<&NormalizedPosition> = positions.iter().collect();
    sorted.sort_by(|a, b| {
        a.product_id
            .cmp(&b.product_id)
            .then_with(|| a.position_type.cmp(&b.position_type))
    });

    let mut hasher = Sha256::new();
    let mut total_quantity: i64 = 0;
    let mut total_market_value: i64 = 0;

    for p in &sorted {
        let line = format!(
            "{}|{}|{}|{}|{}\n",
            p.product_id,
            micros_to_plain(p.quantity_micros),
            micros_to_plain(p.price_micros),
            p.currency,
            p.position_type
        );
        hasher.update(line.as_bytes());
        total_quantity = total_quantity.saturating_add(p.quantity_micros);
        total_market_value = total_market_value.saturating_add(p.market_value_micros);
    }

    let hash = hex::encode(hasher.finalize());
    (
        hash,
        SnapshotDigest {
            position_count: positions.len() as i64,
            total_quantity_micros: total_quantity,
            total_market_value_micros: total_market_value,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(product: &str, ptype: &str, qty: i64, price: i64) -> NormalizedPosition {
        NormalizedPosition {
            product_id: product.to_string(),
            position_type: ptype.to_string(),
            quantity_micros: qty,
            price_micros: price,
            currency: "USD".to_string(),
            market_value_micros: 0,
            provided_market_value_micros: None,
            ticker: None,
        }
    }

    #[test]
    fn hash_invariant_under_permutation() {
        let a = pos("AAA", "SETTLED", 100_000_000, 150_250_000);
        let b = pos("BBB", "SETTLED", 50_000_000, 10_000_000);
        let c = pos("AAA", "TRADED", 25_000_000, 4_000_000_000);

        let (h1, _) = content_hash(&[a.clone(), b.clone(), c.clone()]);
        let (h2, _) = content_hash(&[c, a, b]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_sensitive_to_quantity() {
        let a = pos("AAA", "SETTLED", 100_000_000, 150_250_000);
        let mut a2 = a.clone();
        a2.quantity_micros += 1;
        let (h1, _) = content_hash(&[a]);
        let (h2, _) = content_hash(&[a2]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn digest_totals_accumulate() {
        let a = pos("AAA", "SETTLED", 100_000_000, 0);
        let b = pos("BBB", "SETTLED", -40_000_000, 0);
        let (_, d) = content_hash(&[a, b]);
        assert_eq!(d.position_count, 2);
        assert_eq!(d.total_quantity_micros, 60_000_000);
    }
}
