use std::cmp::Ordering;

use layer_protocol::DrawOrderOverride;

/// Orders draw elements within one pass. `None` leaves the pair in
/// registration order.
pub trait DrawOrderComparer: Send + Sync {
    fn compare(&self, lhs: &DrawOrderOverride, rhs: &DrawOrderOverride) -> Option<Ordering>;
}

/// Elements without tokens first, then lexicographically by token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOrderComparer;

impl DrawOrderComparer for TokenOrderComparer {
    fn compare(&self, lhs: &DrawOrderOverride, rhs: &DrawOrderOverride) -> Option<Ordering> {
        Some(lhs.as_slice().cmp(rhs.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use layer_protocol::DrawOrderToken;
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn untokened_elements_sort_first() {
        let comparer = TokenOrderComparer;
        let primary = DrawOrderOverride::new();
        let low: DrawOrderOverride = smallvec![DrawOrderToken(-4)];
        let high: DrawOrderOverride = smallvec![DrawOrderToken(2), DrawOrderToken(0)];
        assert_eq!(comparer.compare(&primary, &low), Some(Ordering::Less));
        assert_eq!(comparer.compare(&high, &low), Some(Ordering::Greater));
        assert_eq!(comparer.compare(&high, &high), Some(Ordering::Equal));
    }
}
