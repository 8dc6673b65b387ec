//! Books repository for database operations

use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult, Entity},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound(Entity::Book(id)))
    }

    /// Load a book row with a row-level lock, inside the caller's
    /// transaction. This is the serialization point for all stock
    /// mutations on the book.
    pub async fn get_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(AppError::NotFound(Entity::Book(id)))
    }

    /// Apply `delta` to the available-copy count inside the caller's
    /// transaction. The schema-level CHECK keeps stock non-negative; a
    /// violation here means a caller bypassed the stock precondition and is
    /// reported as an invariant failure.
    pub async fn adjust_stock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
        delta: i32,
    ) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            "UPDATE books SET stock = stock + $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23514") => {
                AppError::Invariant(format!("stock for book {} would become negative", id))
            }
            _ => AppError::Database(err),
        })?
        .ok_or(AppError::NotFound(Entity::Book(id)))
    }

    /// List books, optionally filtered by title keyword and category
    pub async fn list(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let title_pattern = query.title.as_ref().map(|t| format!("%{}%", t));

        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE ($1::text IS NULL OR title ILIKE $1)
              AND ($2::int IS NULL OR category_id = $2)
            ORDER BY title
            "#,
        )
        .bind(title_pattern)
        .bind(query.category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    /// Create a new book
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, author, isbn, description, stock, price, category_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.stock.unwrap_or(0))
        .bind(book.price)
        .bind(book.category_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// Update bibliographic fields of an existing book. Stock is not
    /// touched here; it belongs to the lending engine.
    pub async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            UPDATE books
            SET title = COALESCE($2, title),
                author = COALESCE($3, author),
                isbn = COALESCE($4, isbn),
                description = COALESCE($5, description),
                price = COALESCE($6, price),
                category_id = COALESCE($7, category_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.price)
        .bind(book.category_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound(Entity::Book(id)))
    }

    /// Delete a book
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(Entity::Book(id)));
        }
        Ok(())
    }

    /// Count books referencing a category
    pub async fn count_in_category(&self, category_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE category_id = $1")
            .bind(category_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
