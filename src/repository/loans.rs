//! Loans repository for database operations
//!
//! Borrow and return run inside a transaction owned by the lending service,
//! so the mutating queries here take the caller's [`Transaction`] rather
//! than the pool. Read-only queries go straight to the pool.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult, ConflictKind, Entity},
    models::loan::{Loan, LoanDetails},
};

const DETAILS_SELECT: &str = r#"
    SELECT l.id, l.user_id, u.username, l.book_id, b.title AS book_title,
           l.borrowed_at, l.returned_at, l.returned
    FROM loans l
    JOIN users u ON l.user_id = u.id
    JOIN books b ON l.book_id = b.id
"#;

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Loan(id)))
    }

    /// Get loan with borrower and book details
    pub async fn get_details_by_id(&self, id: i32) -> AppResult<LoanDetails> {
        sqlx::query_as::<_, LoanDetails>(&format!("{} WHERE l.id = $1", DETAILS_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Loan(id)))
    }

    /// All loans for a user (open and closed), most recent first
    pub async fn find_by_user(&self, user_id: i32) -> AppResult<Vec<LoanDetails>> {
        let loans = sqlx::query_as::<_, LoanDetails>(&format!(
            "{} WHERE l.user_id = $1 ORDER BY l.borrowed_at DESC, l.id DESC",
            DETAILS_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    /// All loans, most recent first
    pub async fn find_all(&self) -> AppResult<Vec<LoanDetails>> {
        let loans = sqlx::query_as::<_, LoanDetails>(&format!(
            "{} ORDER BY l.borrowed_at DESC, l.id DESC",
            DETAILS_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    /// Load a loan row with a row-level lock, inside the caller's
    /// transaction. Serializes concurrent returns of the same loan.
    pub async fn get_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(AppError::NotFound(Entity::Loan(id)))
    }

    /// The duplicate-borrow check. Must run inside the same transaction as
    /// the stock decrement, after the book row is locked, so two borrows of
    /// the same (user, book) pair cannot both pass it.
    pub async fn find_open_by_user_and_book(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i32,
        book_id: i32,
    ) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 AND book_id = $2 AND NOT returned",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(loan)
    }

    /// Create an open loan inside the caller's transaction
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i32,
        book_id: i32,
        borrowed_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, book_id, borrowed_at, returned)
            VALUES ($1, $2, $3, FALSE)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(borrowed_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| match &err {
            // Partial unique index on open (user_id, book_id) pairs; only
            // reachable if a caller skipped the in-transaction check.
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AppError::Conflict(ConflictKind::AlreadyBorrowed)
            }
            _ => AppError::Database(err),
        })?;

        Ok(loan)
    }

    /// Close an open loan inside the caller's transaction
    pub async fn close(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
        returned_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET returned = TRUE, returned_at = $2
            WHERE id = $1 AND NOT returned
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(returned_at)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::Conflict(ConflictKind::AlreadyReturned))
    }

    /// Count open loans referencing a book
    pub async fn count_open_by_book(&self, book_id: i32) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1 AND NOT returned")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Count open loans held by a user
    pub async fn count_open_by_user(&self, user_id: i32) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE user_id = $1 AND NOT returned")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
