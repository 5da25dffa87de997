//! Store-side access policy
//!
//! | Operation | Own scope        | Other subject's scope |
//! |-----------|------------------|-----------------------|
//! | Read      | allowed          | privileged only       |
//! | Create    | allowed          | denied                |
//! | Correct   | privileged only  | privileged only       |
//! | Delete    | privileged only  | privileged only       |

use kitaba_common::SubjectId;

use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Correct,
    Delete,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Correct => "correct",
            Operation::Delete => "delete",
        }
    }
}

pub struct AccessPolicy;

impl AccessPolicy {
    /// Whether `actor` may perform `operation` on `owner`'s collection
    pub fn allows(
        operation: Operation,
        actor: &SubjectId,
        owner: &SubjectId,
        actor_privileged: bool,
    ) -> bool {
        let own_scope = actor == owner;
        match operation {
            Operation::Read => own_scope || actor_privileged,
            Operation::Create => own_scope,
            Operation::Correct | Operation::Delete => actor_privileged,
        }
    }

    pub fn check(
        operation: Operation,
        actor: &SubjectId,
        owner: &SubjectId,
        actor_privileged: bool,
    ) -> Result<(), StoreError> {
        if Self::allows(operation, actor, owner, actor_privileged) {
            Ok(())
        } else {
            tracing::warn!(
                actor = %actor,
                owner = %owner,
                operation = operation.as_str(),
                "Access denied"
            );
            Err(StoreError::PermissionDenied(format!(
                "{} may not {} records of {}",
                actor,
                operation.as_str(),
                owner
            )))
        }
    }
}
