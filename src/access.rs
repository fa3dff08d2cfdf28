use crate::models::UserId;

/// Only the owner of a resource may delete it.
pub fn can_delete(requester: UserId, owner: UserId) -> bool {
    requester == owner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_may_delete() {
        assert!(can_delete(UserId(7), UserId(7)));
    }

    #[test]
    fn test_other_user_may_not_delete() {
        assert!(!can_delete(UserId(7), UserId(8)));
        assert!(!can_delete(UserId(8), UserId(7)));
    }
}
