//! Loan model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Loan model from database.
///
/// A loan is created open by a successful borrow and closed exactly once by
/// a return; it is never deleted. At most one open loan exists per
/// (user, book) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub borrowed_at: DateTime<Utc>,
    /// Set when the loan is closed; absent while open
    pub returned_at: Option<DateTime<Utc>>,
    pub returned: bool,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        !self.returned
    }
}

/// Loan joined with borrower and book display fields
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub book_id: i32,
    pub book_title: String,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub returned: bool,
}
