//! Orthographic fallback for identifier-like tokens missing from the dictionary.

/// Decides whether a single token looks like a domain identifier.
///
/// Any `Fn(&str) -> bool` that is `Send + Sync` is a policy, so callers can
/// plug in their own rule without a new type.
pub trait CandidatePolicy: Send + Sync {
    fn is_candidate(&self, token: &str) -> bool;
}

impl<F> CandidatePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_candidate(&self, token: &str) -> bool {
        self(token)
    }
}

/// Default heuristic: letter-initial tokens mixing case and digits.
///
/// A token qualifies when its length (in chars) is within bounds and it either
/// holds both an uppercase letter and a digit (`BRCA1`, `Cdk2`) or has an
/// uppercase letter after a lowercase start (`mTOR`, `NFkB`).
#[derive(Clone, Copy, Debug)]
pub struct IdentifierShape {
    pub min_len: usize,
    pub max_len: usize,
}

impl IdentifierShape {
    pub const DEFAULT: IdentifierShape = IdentifierShape {
        min_len: 3,
        max_len: 16,
    };
}

impl Default for IdentifierShape {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl CandidatePolicy for IdentifierShape {
    fn is_candidate(&self, token: &str) -> bool {
        let len = token.chars().count();
        if !(self.min_len..=self.max_len).contains(&len) {
            return false;
        }
        let mut chars = token.chars();
        if !chars.next().is_some_and(char::is_alphabetic) {
            return false;
        }
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_upper = token.chars().any(char::is_uppercase);
        let has_lower = token.chars().any(char::is_lowercase);
        let inner_upper = chars.any(char::is_uppercase);
        (has_digit && has_upper) || (has_lower && inner_upper)
    }
}
