use crate::error::FeedError;
use serde::Serialize;

/// Who is asking. Threaded explicitly through every service call instead of
/// being read from ambient request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RequestorIdentity {
    #[default]
    Anonymous,
    User(i64),
}

impl RequestorIdentity {
    pub fn user(id: i64) -> Self {
        RequestorIdentity::User(id)
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            RequestorIdentity::Anonymous => None,
            RequestorIdentity::User(id) => Some(*id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// The authenticated user id, or `Unauthorized`.
    pub fn require(&self) -> Result<i64, FeedError> {
        self.user_id().ok_or(FeedError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_requests_are_rejected_where_identity_is_required() {
        assert!(matches!(
            RequestorIdentity::Anonymous.require(),
            Err(FeedError::Unauthorized)
        ));
        assert_eq!(RequestorIdentity::user(4).require().unwrap(), 4);
    }
}
