//! API integration tests
//!
//! Run with: cargo test -- --ignored
//! Requires a running server on a freshly migrated database (the first
//! registered account becomes the admin).

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn unique(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!("{}_{}", prefix, nanos)
}

/// Register an account (tolerating an existing one) and log in
async fn register_and_login(client: &Client, username: &str, password: &str) -> String {
    let _ = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Failed to send register request");

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Failed to send login request");

    let body: Value = response.json().await.expect("Failed to parse login response");
    body["token"].as_str().expect("No token in response").to_string()
}

/// The admin account: first registration on a fresh database
async fn admin_token(client: &Client) -> String {
    register_and_login(client, "admin", "admin").await
}

async fn create_book(client: &Client, token: &str, title: &str, stock: i32) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "title": title, "author": "Test Author", "stock": stock }))
        .send()
        .await
        .expect("Failed to send create book request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse book response");
    body["id"].as_i64().expect("No book ID")
}

async fn get_stock(client: &Client, token: &str, book_id: i64) -> i64 {
    let response = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send get book request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse book response");
    body["stock"].as_i64().expect("No stock field")
}

async fn borrow(client: &Client, token: &str, book_id: i64) -> reqwest::Response {
    client
        .post(format!("{}/loans", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send borrow request")
}

async fn return_loan(client: &Client, token: &str, loan_id: i64) -> reqwest::Response {
    client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send return request")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_register_and_login() {
    let client = Client::new();
    let username = unique("reader");

    let response = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({ "username": username, "password": "secret" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({ "username": username, "password": "secret" }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();
    let username = unique("reader");
    register_and_login(&client, &username, "secret").await;

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({ "username": username, "password": "wrong" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_get_current_user() {
    let client = Client::new();
    let username = unique("reader");
    let token = register_and_login(&client, &username, "secret").await;

    let response = client
        .get(format!("{}/auth/me", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["username"], username.as_str());
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .get(format!("{}/books", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_borrow_lifecycle() {
    let client = Client::new();
    let admin = admin_token(&client).await;

    let martin = register_and_login(&client, &unique("martin"), "secret").await;
    let nora = register_and_login(&client, &unique("nora"), "secret").await;

    let book_id = create_book(&client, &admin, &unique("Single Copy"), 1).await;

    // First borrower takes the only copy
    let response = borrow(&client, &martin, book_id).await;
    assert_eq!(response.status(), 201);
    let loan: Value = response.json().await.expect("Failed to parse loan");
    let loan_id = loan["id"].as_i64().expect("No loan ID");
    assert_eq!(get_stock(&client, &admin, book_id).await, 0);

    // Second borrower is rejected: out of stock
    let response = borrow(&client, &nora, book_id).await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "OutOfStock");

    // First borrower cannot borrow the same book twice
    let response = borrow(&client, &martin, book_id).await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "AlreadyBorrowed");

    // Return frees the copy
    let response = return_loan(&client, &martin, loan_id).await;
    assert_eq!(response.status(), 200);
    let closed: Value = response.json().await.expect("Failed to parse loan");
    assert_eq!(closed["returned"], true);
    assert!(closed["returned_at"].is_string());
    assert_eq!(get_stock(&client, &admin, book_id).await, 1);

    // A second return of the same loan is rejected
    let response = return_loan(&client, &martin, loan_id).await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "AlreadyReturned");
    assert_eq!(get_stock(&client, &admin, book_id).await, 1);

    // Now the second borrower succeeds
    let response = borrow(&client, &nora, book_id).await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
#[ignore]
async fn test_borrow_unknown_book() {
    let client = Client::new();
    let token = register_and_login(&client, &unique("reader"), "secret").await;

    let response = borrow(&client, &token, 99_999_999).await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "NoSuchBook");
}

#[tokio::test]
#[ignore]
async fn test_return_unknown_loan() {
    let client = Client::new();
    let token = register_and_login(&client, &unique("reader"), "secret").await;

    let response = return_loan(&client, &token, 99_999_999).await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "NoSuchLoan");
}

#[tokio::test]
#[ignore]
async fn test_member_cannot_return_anothers_loan() {
    let client = Client::new();
    let admin = admin_token(&client).await;

    let owner = register_and_login(&client, &unique("owner"), "secret").await;
    let other = register_and_login(&client, &unique("other"), "secret").await;

    let book_id = create_book(&client, &admin, &unique("Guarded"), 2).await;

    let response = borrow(&client, &owner, book_id).await;
    assert_eq!(response.status(), 201);
    let loan: Value = response.json().await.expect("Failed to parse loan");
    let loan_id = loan["id"].as_i64().expect("No loan ID");

    // Another member is rejected, the owner is not
    let response = return_loan(&client, &other, loan_id).await;
    assert_eq!(response.status(), 403);

    let response = return_loan(&client, &owner, loan_id).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
#[ignore]
async fn test_user_loans_ordering() {
    let client = Client::new();
    let admin = admin_token(&client).await;
    let token = register_and_login(&client, &unique("reader"), "secret").await;

    let first = create_book(&client, &admin, &unique("First"), 1).await;
    let second = create_book(&client, &admin, &unique("Second"), 1).await;

    assert_eq!(borrow(&client, &token, first).await.status(), 201);
    assert_eq!(borrow(&client, &token, second).await.status(), 201);

    let me: Value = client
        .get(format!("{}/auth/me", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let user_id = me["id"].as_i64().expect("No user ID");

    let response = client
        .get(format!("{}/users/{}/loans", BASE_URL, user_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let loans: Value = response.json().await.expect("Failed to parse loans");
    let loans = loans.as_array().expect("Expected an array");
    assert_eq!(loans.len(), 2);
    // Most recent borrow first
    assert_eq!(loans[0]["book_id"].as_i64(), Some(second));
    assert_eq!(loans[1]["book_id"].as_i64(), Some(first));
}

#[tokio::test]
#[ignore]
async fn test_category_crud() {
    let client = Client::new();
    let admin = admin_token(&client).await;
    let name = unique("Fiction");

    let response = client
        .post(format!("{}/categories", BASE_URL))
        .header("Authorization", format!("Bearer {}", admin))
        .json(&json!({ "name": name, "description": "Novels and stories" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    let category_id = body["id"].as_i64().expect("No category ID");

    // Duplicate name is rejected
    let response = client
        .post(format!("{}/categories", BASE_URL))
        .header("Authorization", format!("Bearer {}", admin))
        .json(&json!({ "name": name }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 409);

    let response = client
        .delete(format!("{}/categories/{}", BASE_URL, category_id))
        .header("Authorization", format!("Bearer {}", admin))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 204);
}

#[tokio::test]
#[ignore]
async fn test_member_cannot_create_books() {
    let client = Client::new();
    let token = register_and_login(&client, &unique("reader"), "secret").await;

    let response = client
        .post(format!("{}/books", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "title": "Not Allowed", "stock": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}
