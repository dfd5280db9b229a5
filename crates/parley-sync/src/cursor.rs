//! Cursor-based pagination over remote collections.
//!
//! The advance rule is deliberately pure -- no I/O, nothing but token
//! comparison -- so it can be unit tested on token values alone.

use serde::{Deserialize, Serialize};

/// A request for one page of a remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of items the remote should return.
    pub limit: usize,
    /// Opaque token of the page to fetch; `None` requests the first page.
    pub start: Option<String>,
}

impl PageRequest {
    /// Request the first page of a collection.
    pub fn first(limit: usize) -> Self {
        Self { limit, start: None }
    }

    /// Resume a walk at a previously returned token.
    pub fn starting_at(limit: usize, token: impl Into<String>) -> Self {
        Self { limit, start: Some(token.into()) }
    }

    /// Advance the cursor after a page response.
    ///
    /// Returns `None` -- terminating the walk -- when the server reported no
    /// further data, or when the server's next token equals the token this
    /// request was already positioned at (the no-progress guard against a
    /// misbehaving or single-page remote looping forever).
    pub fn advance(&self, next: Option<&str>) -> Option<PageRequest> {
        let next = next?;
        if self.start.as_deref() == Some(next) {
            return None;
        }
        Some(PageRequest {
            limit: self.limit,
            start: Some(next.to_string()),
        })
    }
}

/// One page of a remote collection: the items plus the opaque token of the
/// page after it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A terminal page carrying no continuation token.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_token_terminates() {
        let req = PageRequest::first(50);
        assert_eq!(req.advance(None), None);
    }

    #[test]
    fn fresh_token_advances() {
        let req = PageRequest::first(50);
        let next = req.advance(Some("t1")).unwrap();
        assert_eq!(next.start.as_deref(), Some("t1"));
        assert_eq!(next.limit, 50);
    }

    #[test]
    fn repeated_token_terminates() {
        let req = PageRequest::starting_at(50, "t1");
        assert_eq!(req.advance(Some("t1")), None);
    }

    #[test]
    fn walk_over_cycling_tokens_is_finite() {
        // Page tokens: None -> t1 -> t2 -> t2 (repeat).  The walk must stop
        // after the third advance attempt.
        let mut req = Some(PageRequest::first(10));
        let tokens = [Some("t1"), Some("t2"), Some("t2"), Some("t3")];
        let mut fetches = 0;

        for next in tokens {
            let Some(current) = req else { break };
            fetches += 1;
            req = current.advance(next);
        }

        assert_eq!(fetches, 3);
    }
}
