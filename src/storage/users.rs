use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, User};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user. Usernames are unique; emails are not.
    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<User, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            "INSERT INTO users (username, email, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(username)
        .bind(email)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((id,)) => Ok(User {
                id,
                username: username.to_string(),
                email: email.map(str::to_string),
            }),
            Err(e) if is_unique_violation(&e) => Err(DatabaseError::DuplicateUser(username.to_string())),
            Err(e) => Err(DatabaseError::from_sqlx(e)),
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT id, username, email FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// All users whose email equals `email` exactly.
    pub async fn find_users_by_email(&self, email: &str) -> Result<Vec<User>, DatabaseError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, email FROM users WHERE email = ? ORDER BY id",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let users = sqlx::query_as::<_, User>("SELECT id, username, email FROM users ORDER BY username")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find_by_username() {
        let db = test_db().await;
        let created = db.create_user("tatkins", None).await.unwrap();
        assert!(created.id > 0);

        let found = db.find_user_by_username("tatkins").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(found.email.is_none());

        assert!(db.find_user_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let db = test_db().await;
        db.create_user("tatkins", None).await.unwrap();
        let err = db.create_user("tatkins", Some("x@example.test")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateUser(name) if name == "tatkins"));
    }

    #[tokio::test]
    async fn test_find_users_by_email() {
        let db = test_db().await;
        db.create_user("tatkins", None).await.unwrap();
        let tommy = db
            .create_user("tommy", Some("tatkins@example.test"))
            .await
            .unwrap();

        let users = db.find_users_by_email("tatkins@example.test").await.unwrap();
        assert_eq!(users, vec![tommy]);

        assert!(db
            .find_users_by_email("nobody@example.test")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_shared_email_returns_all_matches() {
        let db = test_db().await;
        db.create_user("a", Some("lab@example.test")).await.unwrap();
        db.create_user("b", Some("lab@example.test")).await.unwrap();

        let users = db.find_users_by_email("lab@example.test").await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_list_users_sorted() {
        let db = test_db().await;
        db.create_user("zed", None).await.unwrap();
        db.create_user("amy", None).await.unwrap();

        let names: Vec<String> = db
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["amy", "zed"]);
    }
}
