/// Crawl item state definitions for tracking a queue item through one pass
///
/// This state is advisory: it feeds progress reporting and is never used to
/// decide what the crawl does next.
use std::fmt;

/// Represents where a queue item is in the crawl lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlItemState {
    // ===== Initial State =====
    /// Nothing has been observed for this item yet
    Unknown,

    // ===== Active States =====
    /// A HEAD request is being made
    RequestHead,

    /// A GET request is being made
    RequestGet,

    /// The fetched response is being parsed
    Spidering,

    // ===== Terminal States =====
    /// Links and signals were extracted
    Spidered,

    /// The item was rejected by policy or gave up
    NotSpidered,

    /// The GET request failed
    RequestGetError,
}

impl CrawlItemState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Spidered | Self::NotSpidered | Self::RequestGetError
        )
    }

    /// Returns the states reachable from this one
    pub fn allowed_transitions(&self) -> &'static [CrawlItemState] {
        match self {
            Self::Unknown => &[Self::RequestHead, Self::Spidering, Self::NotSpidered],
            Self::RequestHead => &[Self::RequestGet, Self::NotSpidered],
            Self::RequestGet => &[Self::RequestGetError, Self::Spidering],
            Self::Spidering => &[Self::Spidered],
            Self::Spidered | Self::NotSpidered | Self::RequestGetError => &[],
        }
    }

    /// Returns true if moving from this state to `next` is a legal transition
    pub fn can_transition_to(&self, next: CrawlItemState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Stable lowercase name, used in logs and progress summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::RequestHead => "request_head",
            Self::RequestGet => "request_get",
            Self::Spidering => "spidering",
            Self::Spidered => "spidered",
            Self::NotSpidered => "not_spidered",
            Self::RequestGetError => "request_get_error",
        }
    }

    /// Returns all possible states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Unknown,
            Self::RequestHead,
            Self::RequestGet,
            Self::Spidering,
            Self::Spidered,
            Self::NotSpidered,
            Self::RequestGetError,
        ]
    }
}

impl fmt::Display for CrawlItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!CrawlItemState::Unknown.is_terminal());
        assert!(!CrawlItemState::RequestHead.is_terminal());
        assert!(!CrawlItemState::RequestGet.is_terminal());
        assert!(!CrawlItemState::Spidering.is_terminal());

        assert!(CrawlItemState::Spidered.is_terminal());
        assert!(CrawlItemState::NotSpidered.is_terminal());
        assert!(CrawlItemState::RequestGetError.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_transitions() {
        for state in CrawlItemState::all_states() {
            assert_eq!(
                state.is_terminal(),
                state.allowed_transitions().is_empty(),
                "{}",
                state
            );
        }
    }

    #[test]
    fn test_happy_path() {
        let path = [
            CrawlItemState::Unknown,
            CrawlItemState::RequestHead,
            CrawlItemState::RequestGet,
            CrawlItemState::Spidering,
            CrawlItemState::Spidered,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_reuse_path_skips_requests() {
        assert!(CrawlItemState::Unknown.can_transition_to(CrawlItemState::Spidering));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!CrawlItemState::Unknown.can_transition_to(CrawlItemState::RequestGet));
        assert!(!CrawlItemState::RequestGet.can_transition_to(CrawlItemState::NotSpidered));
        assert!(!CrawlItemState::Spidering.can_transition_to(CrawlItemState::NotSpidered));
        assert!(!CrawlItemState::Spidered.can_transition_to(CrawlItemState::Spidering));
    }

    #[test]
    fn test_display() {
        assert_eq!(CrawlItemState::RequestGetError.to_string(), "request_get_error");
        assert_eq!(CrawlItemState::NotSpidered.to_string(), "not_spidered");
    }
}
