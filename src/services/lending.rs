//! Lending engine: the borrow/return state machine.
//!
//! Every stock mutation runs inside one transaction that also holds a
//! row-level lock on the book, so operations on the same book serialize
//! while different books proceed in parallel. The duplicate-borrow check
//! and the stock decrement share that transaction; there is no
//! check-then-act gap. A rollback (including caller cancellation, which
//! drops the transaction) undoes the stock change and the loan row
//! together.

use chrono::Utc;

use crate::{
    error::{AppError, AppResult, ConflictKind},
    models::loan::{Loan, LoanDetails},
    repository::Repository,
};

/// Bound on internal retries after storage-level contention (deadlock or
/// serialization failure). Business rejections are never retried.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct LendingService {
    repository: Repository,
}

impl LendingService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Borrow a book for a user, creating an open loan.
    ///
    /// Fails with `NotFound` for an unknown user or book, and with
    /// `Conflict` when the user already holds an open loan on the book,
    /// no copy is available, or contention outlasts the retry bound.
    pub async fn borrow(&self, user_id: i32, book_id: i32) -> AppResult<Loan> {
        // Referential precondition; not retried
        self.repository.users.get_by_id(user_id).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_borrow(user_id, book_id).await {
                Err(err) if err.is_transient() => {
                    if attempt >= MAX_ATTEMPTS {
                        tracing::warn!(
                            "Borrow retries exhausted for user {} on book {}",
                            user_id,
                            book_id
                        );
                        return Err(AppError::Conflict(ConflictKind::RetryExhausted));
                    }
                    tracing::debug!(
                        "Transient conflict borrowing book {} (attempt {}), retrying",
                        book_id,
                        attempt
                    );
                }
                other => return other,
            }
        }
    }

    /// One borrow attempt, as a single atomic unit of work
    async fn try_borrow(&self, user_id: i32, book_id: i32) -> AppResult<Loan> {
        let mut tx = self.repository.pool.begin().await?;

        // Lock the book row first: the per-book serialization point
        let book = self.repository.books.get_for_update(&mut tx, book_id).await?;

        if self
            .repository
            .loans
            .find_open_by_user_and_book(&mut tx, user_id, book_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(ConflictKind::AlreadyBorrowed));
        }

        if book.stock <= 0 {
            return Err(AppError::Conflict(ConflictKind::OutOfStock));
        }

        self.repository.books.adjust_stock(&mut tx, book_id, -1).await?;
        let loan = self
            .repository
            .loans
            .create(&mut tx, user_id, book_id, Utc::now())
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Loan {} created: user {} borrowed book {}",
            loan.id,
            user_id,
            book_id
        );
        Ok(loan)
    }

    /// Return a borrowed book, closing the loan and releasing its copy.
    ///
    /// Idempotency guard: a second return of the same loan fails with
    /// `Conflict` instead of incrementing stock again.
    pub async fn return_loan(&self, loan_id: i32) -> AppResult<Loan> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_return(loan_id).await {
                Err(err) if err.is_transient() => {
                    if attempt >= MAX_ATTEMPTS {
                        tracing::warn!("Return retries exhausted for loan {}", loan_id);
                        return Err(AppError::Conflict(ConflictKind::RetryExhausted));
                    }
                    tracing::debug!(
                        "Transient conflict returning loan {} (attempt {}), retrying",
                        loan_id,
                        attempt
                    );
                }
                other => return other,
            }
        }
    }

    /// One return attempt: the status flip and the stock increment commit
    /// together or not at all.
    async fn try_return(&self, loan_id: i32) -> AppResult<Loan> {
        let mut tx = self.repository.pool.begin().await?;

        let loan = self.repository.loans.get_for_update(&mut tx, loan_id).await?;
        if loan.returned {
            return Err(AppError::Conflict(ConflictKind::AlreadyReturned));
        }

        // Same lock order as borrow: the book row guards the counter
        self.repository.books.get_for_update(&mut tx, loan.book_id).await?;

        let closed = self.repository.loans.close(&mut tx, loan_id, Utc::now()).await?;
        self.repository.books.adjust_stock(&mut tx, loan.book_id, 1).await?;

        tx.commit().await?;

        tracing::info!(
            "Loan {} closed: book {} returned by user {}",
            loan_id,
            loan.book_id,
            loan.user_id
        );
        Ok(closed)
    }

    /// All loans for a user (open and closed), most recent first
    pub async fn loans_for_user(&self, user_id: i32) -> AppResult<Vec<LoanDetails>> {
        self.repository.users.get_by_id(user_id).await?;
        self.repository.loans.find_by_user(user_id).await
    }

    /// Get a single loan with details
    pub async fn find_by_id(&self, loan_id: i32) -> AppResult<LoanDetails> {
        self.repository.loans.get_details_by_id(loan_id).await
    }

    /// All loans in the ledger, most recent first
    pub async fn find_all(&self) -> AppResult<Vec<LoanDetails>> {
        self.repository.loans.find_all().await
    }
}
