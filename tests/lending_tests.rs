//! Lending engine concurrency and consistency tests
//!
//! Run with: cargo test -- --ignored
//! Requires DATABASE_URL pointing at a migratable Postgres database.

use libris_server::{
    error::{AppError, ConflictKind},
    models::{
        book::CreateBook,
        loan::Loan,
        user::Role,
    },
    repository::Repository,
    services::lending::LendingService,
};
use sqlx::postgres::PgPoolOptions;

fn unique(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!("{}_{}", prefix, nanos)
}

async fn setup() -> Repository {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Repository::new(pool)
}

async fn seed_user(repository: &Repository, prefix: &str) -> i32 {
    repository
        .users
        .create(&unique(prefix), "unused-hash", Role::Member)
        .await
        .expect("Failed to seed user")
        .id
}

async fn seed_book(repository: &Repository, stock: i32) -> i32 {
    repository
        .books
        .create(&CreateBook {
            title: unique("book"),
            author: None,
            isbn: None,
            description: None,
            stock: Some(stock),
            price: None,
            category_id: None,
        })
        .await
        .expect("Failed to seed book")
        .id
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn concurrent_borrows_never_oversell() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let copies = 3;
    let contenders = 8;
    let book_id = seed_book(&repository, copies).await;

    let mut users = Vec::new();
    for _ in 0..contenders {
        users.push(seed_user(&repository, "contender").await);
    }

    let mut handles = Vec::new();
    for user_id in users {
        let lending = lending.clone();
        handles.push(tokio::spawn(
            async move { lending.borrow(user_id, book_id).await },
        ));
    }

    let mut successes: Vec<Loan> = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await.expect("borrow task panicked") {
            Ok(loan) => successes.push(loan),
            Err(err) => failures.push(err),
        }
    }

    assert_eq!(successes.len(), copies as usize);
    assert_eq!(failures.len(), (contenders - copies) as usize);
    for err in &failures {
        assert!(
            matches!(err, AppError::Conflict(ConflictKind::OutOfStock)),
            "unexpected failure: {err}"
        );
    }

    let book = repository.books.get_by_id(book_id).await.unwrap();
    assert_eq!(book.stock, 0);

    let open = repository.loans.count_open_by_book(book_id).await.unwrap();
    assert_eq!(open, copies as i64);
}

#[tokio::test]
#[ignore]
async fn concurrent_duplicate_pair_borrows_once() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let book_id = seed_book(&repository, 5).await;
    let user_id = seed_user(&repository, "eager").await;

    let first = {
        let lending = lending.clone();
        tokio::spawn(async move { lending.borrow(user_id, book_id).await })
    };
    let second = {
        let lending = lending.clone();
        tokio::spawn(async move { lending.borrow(user_id, book_id).await })
    };

    let results = [
        first.await.expect("borrow task panicked"),
        second.await.expect("borrow task panicked"),
    ];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let duplicate = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one attempt must fail");
    assert!(matches!(
        duplicate,
        AppError::Conflict(ConflictKind::AlreadyBorrowed)
    ));

    // Exactly one copy left the shelf
    let book = repository.books.get_by_id(book_id).await.unwrap();
    assert_eq!(book.stock, 4);
}

#[tokio::test]
#[ignore]
async fn double_return_increments_stock_once() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let book_id = seed_book(&repository, 2).await;
    let user_id = seed_user(&repository, "returner").await;

    let loan = lending.borrow(user_id, book_id).await.unwrap();
    assert_eq!(repository.books.get_by_id(book_id).await.unwrap().stock, 1);

    let closed = lending.return_loan(loan.id).await.unwrap();
    assert!(closed.returned);
    assert_eq!(repository.books.get_by_id(book_id).await.unwrap().stock, 2);

    let again = lending.return_loan(loan.id).await;
    assert!(matches!(
        again,
        Err(AppError::Conflict(ConflictKind::AlreadyReturned))
    ));
    // Stock unchanged by the rejected second return
    assert_eq!(repository.books.get_by_id(book_id).await.unwrap().stock, 2);
}

#[tokio::test]
#[ignore]
async fn borrow_return_round_trip() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let book_id = seed_book(&repository, 1).await;
    let user_id = seed_user(&repository, "traveler").await;

    let before = repository.books.get_by_id(book_id).await.unwrap().stock;

    let loan = lending.borrow(user_id, book_id).await.unwrap();
    assert!(loan.is_open());
    assert!(loan.returned_at.is_none());

    let closed = lending.return_loan(loan.id).await.unwrap();
    assert!(!closed.is_open());
    let returned_at = closed.returned_at.expect("closed loan must have a return time");
    assert!(returned_at >= closed.borrowed_at);

    let after = repository.books.get_by_id(book_id).await.unwrap().stock;
    assert_eq!(after, before);
}

#[tokio::test]
#[ignore]
async fn single_copy_scenario() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let book_id = seed_book(&repository, 1).await;
    let martin = seed_user(&repository, "martin").await;
    let nora = seed_user(&repository, "nora").await;

    let loan = lending.borrow(martin, book_id).await.unwrap();
    assert_eq!(repository.books.get_by_id(book_id).await.unwrap().stock, 0);

    let rejected = lending.borrow(nora, book_id).await;
    assert!(matches!(
        rejected,
        Err(AppError::Conflict(ConflictKind::OutOfStock))
    ));

    lending.return_loan(loan.id).await.unwrap();
    assert_eq!(repository.books.get_by_id(book_id).await.unwrap().stock, 1);

    assert!(lending.borrow(nora, book_id).await.is_ok());
}

#[tokio::test]
#[ignore]
async fn referential_failures_are_not_found() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let user_id = seed_user(&repository, "lost").await;

    let missing_book = lending.borrow(user_id, 99_999_999).await;
    assert!(matches!(missing_book, Err(AppError::NotFound(_))));

    let missing_user = lending.borrow(99_999_999, seed_book(&repository, 1).await).await;
    assert!(matches!(missing_user, Err(AppError::NotFound(_))));

    let missing_loan = lending.return_loan(99_999_999).await;
    assert!(matches!(missing_loan, Err(AppError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn loans_for_user_most_recent_first() {
    let repository = setup().await;
    let lending = LendingService::new(repository.clone());

    let user_id = seed_user(&repository, "chrono").await;
    let first_book = seed_book(&repository, 1).await;
    let second_book = seed_book(&repository, 1).await;

    lending.borrow(user_id, first_book).await.unwrap();
    lending.borrow(user_id, second_book).await.unwrap();

    let loans = lending.loans_for_user(user_id).await.unwrap();
    assert_eq!(loans.len(), 2);
    assert_eq!(loans[0].book_id, second_book);
    assert_eq!(loans[1].book_id, first_book);
}

#[tokio::test]
#[ignore]
async fn adjust_stock_refuses_negative_result() {
    let repository = setup().await;

    let book_id = seed_book(&repository, 0).await;

    let mut tx = repository.pool.begin().await.unwrap();
    let result = repository.books.adjust_stock(&mut tx, book_id, -1).await;
    assert!(matches!(result, Err(AppError::Invariant(_))));
}
