use orrery_types::PresenceToken;

/// Issues presence tokens
///
/// Tokens increase monotonically and wrap around; [`PresenceToken::FIRST`]
/// is skipped on wrap so it always denotes the entity's initial connection.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    next: u64,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self::starting_at(PresenceToken::FIRST.0.wrapping_add(1))
    }

    /// An issuer whose next token is `next` (or the one after, if `next`
    /// is the first-connection token)
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn issue(&mut self) -> PresenceToken {
        if self.next == PresenceToken::FIRST.0 {
            self.next = self.next.wrapping_add(1);
        }
        let token = PresenceToken(self.next);
        self.next = self.next.wrapping_add(1);
        token
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_after_first() {
        let mut issuer = TokenIssuer::new();
        assert_eq!(issuer.issue(), PresenceToken(1));
        assert_eq!(issuer.issue(), PresenceToken(2));
    }

    #[test]
    fn test_wrap_skips_first() {
        let mut issuer = TokenIssuer::starting_at(u64::MAX);
        assert_eq!(issuer.issue(), PresenceToken(u64::MAX));
        let wrapped = issuer.issue();
        assert!(!wrapped.is_first());
        assert_eq!(wrapped, PresenceToken(1));
    }
}
