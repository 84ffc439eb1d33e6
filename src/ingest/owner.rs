use super::PersistError;
use crate::feed::Author;
use crate::storage::{Database, User};

/// Who owns an entry whose author matches no user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerPolicy {
    /// Fail the entry with [`PersistError::UnresolvedOwner`].
    #[default]
    Strict,
    /// Assign it to this existing user.
    Fallback(String),
}

/// Maps an entry author to a local user.
///
/// An email matching exactly one user wins over a username match, so an
/// author is attributed correctly even when their display name happens to be
/// someone else's username. A shared email is ambiguous and falls through to
/// the name.
pub async fn resolve_owner(
    db: &Database,
    author: Option<&Author>,
    policy: &OwnerPolicy,
) -> Result<User, PersistError> {
    if let Some(author) = author {
        if let Some(email) = author.email.as_deref().filter(|e| !e.is_empty()) {
            let mut matches = db.find_users_by_email(email).await?;
            if matches.len() == 1 {
                return Ok(matches.remove(0));
            }
            if matches.len() > 1 {
                tracing::debug!(
                    email = %email,
                    candidates = matches.len(),
                    "Author email is shared, matching by name instead"
                );
            }
        }

        if !author.name.is_empty() {
            if let Some(user) = db.find_user_by_username(&author.name).await? {
                return Ok(user);
            }
        }
    }

    match policy {
        OwnerPolicy::Strict => Err(PersistError::UnresolvedOwner {
            name: author.map(|a| a.name.clone()).unwrap_or_default(),
            email: author.and_then(|a| a.email.clone()),
        }),
        OwnerPolicy::Fallback(username) => {
            let user = db
                .find_user_by_username(username)
                .await?
                .ok_or_else(|| PersistError::MissingFallbackOwner(username.clone()))?;
            tracing::info!(
                author = author.map(|a| a.name.as_str()).unwrap_or(""),
                owner = %user.username,
                "Author unknown, assigning fallback owner"
            );
            Ok(user)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn author(name: &str, email: Option<&str>) -> Author {
        Author {
            name: name.to_string(),
            email: email.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_username_match() {
        let db = test_db().await;
        let tatkins = db.create_user("tatkins", None).await.unwrap();

        let owner = resolve_owner(&db, Some(&author("tatkins", None)), &OwnerPolicy::Strict)
            .await
            .unwrap();
        assert_eq!(owner, tatkins);
    }

    #[tokio::test]
    async fn test_email_beats_username() {
        let db = test_db().await;
        db.create_user("tatkins", None).await.unwrap();
        let tommy = db
            .create_user("tommy", Some("tatkins@example.test"))
            .await
            .unwrap();

        let owner = resolve_owner(
            &db,
            Some(&author("tatkins", Some("tatkins@example.test"))),
            &OwnerPolicy::Strict,
        )
        .await
        .unwrap();
        assert_eq!(owner, tommy);
    }

    #[tokio::test]
    async fn test_shared_email_falls_back_to_name() {
        let db = test_db().await;
        let alice = db.create_user("alice", Some("lab@example.test")).await.unwrap();
        db.create_user("bob", Some("lab@example.test")).await.unwrap();

        let owner = resolve_owner(
            &db,
            Some(&author("alice", Some("lab@example.test"))),
            &OwnerPolicy::Strict,
        )
        .await
        .unwrap();
        assert_eq!(owner, alice);
    }

    #[tokio::test]
    async fn test_unresolved_owner() {
        let db = test_db().await;
        let err = resolve_owner(
            &db,
            Some(&author("stranger", Some("stranger@example.test"))),
            &OwnerPolicy::Strict,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PersistError::UnresolvedOwner { name, email }
                if name == "stranger" && email.as_deref() == Some("stranger@example.test")
        ));

        let err = resolve_owner(&db, None, &OwnerPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::UnresolvedOwner { .. }));
    }

    #[tokio::test]
    async fn test_fallback_owner() {
        let db = test_db().await;
        let admin = db.create_user("admin", None).await.unwrap();
        let policy = OwnerPolicy::Fallback("admin".to_string());

        let owner = resolve_owner(&db, Some(&author("stranger", None)), &policy)
            .await
            .unwrap();
        assert_eq!(owner, admin);
    }

    #[tokio::test]
    async fn test_missing_fallback_owner() {
        let db = test_db().await;
        let policy = OwnerPolicy::Fallback("admin".to_string());

        let err = resolve_owner(&db, Some(&author("stranger", None)), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::MissingFallbackOwner(name) if name == "admin"));
    }
}
