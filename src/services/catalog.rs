//! Catalog management service: books and categories

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, CreateBook, UpdateBook},
        category::{Category, CreateCategory, UpdateCategory},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// List books with filters
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        self.repository.books.list(query).await
    }

    /// Get book by ID
    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Create a new book
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        if let Some(category_id) = book.category_id {
            self.repository.categories.get_by_id(category_id).await?;
        }
        self.repository.books.create(&book).await
    }

    /// Update an existing book
    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await?;
        if let Some(category_id) = book.category_id {
            self.repository.categories.get_by_id(category_id).await?;
        }
        self.repository.books.update(id, &book).await
    }

    /// Delete a book. Refused while open loans reference it, since that
    /// would orphan the ledger entries.
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        self.repository.books.get_by_id(id).await?;

        let open = self.repository.loans.count_open_by_book(id).await?;
        if open > 0 {
            return Err(AppError::BusinessRule(format!(
                "Book has {} open loan(s) and cannot be deleted",
                open
            )));
        }

        self.repository.books.delete(id).await
    }

    /// List all categories
    pub async fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.repository.categories.list().await
    }

    /// Get category by ID
    pub async fn get_category(&self, id: i32) -> AppResult<Category> {
        self.repository.categories.get_by_id(id).await
    }

    /// Create a new category with a unique name
    pub async fn create_category(&self, category: CreateCategory) -> AppResult<Category> {
        if self.repository.categories.name_exists(&category.name, None).await? {
            return Err(AppError::Duplicate("Category name already exists".to_string()));
        }
        self.repository.categories.create(&category).await
    }

    /// Update an existing category
    pub async fn update_category(&self, id: i32, category: UpdateCategory) -> AppResult<Category> {
        self.repository.categories.get_by_id(id).await?;

        if let Some(ref name) = category.name {
            if self.repository.categories.name_exists(name, Some(id)).await? {
                return Err(AppError::Duplicate("Category name already exists".to_string()));
            }
        }

        self.repository.categories.update(id, &category).await
    }

    /// Delete a category. Refused while books reference it.
    pub async fn delete_category(&self, id: i32) -> AppResult<()> {
        self.repository.categories.get_by_id(id).await?;

        let books = self.repository.books.count_in_category(id).await?;
        if books > 0 {
            return Err(AppError::BusinessRule(format!(
                "Category has {} book(s) and cannot be deleted",
                books
            )));
        }

        self.repository.categories.delete(id).await
    }
}
