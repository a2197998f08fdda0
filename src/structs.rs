use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub pwd_hash: String,
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Brand {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: Option<i64>,
    pub brand_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Inventory {
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct ProductImage {
    pub id: i64,
    #[serde(skip_serializing)]
    pub product_id: i64,
    pub image_url: String,
    pub is_main: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BrandSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl From<&Brand> for BrandSummary {
    fn from(brand: &Brand) -> Self {
        BrandSummary {
            id: brand.id,
            name: brand.name.clone(),
            description: brand.description.clone(),
        }
    }
}

/// A product with its category, brand, stock and images resolved.
#[derive(Serialize, Debug, Clone)]
pub struct ProductView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub stock: i64,
    pub category: Option<Category>,
    pub brand: BrandSummary,
    pub images: Vec<ProductImage>,
}

impl ProductView {
    pub fn main_image(&self) -> Option<&ProductImage> {
        self.images.iter().find(|img| img.is_main)
    }
}

/// Listing shape used for a seller's own catalogue.
#[derive(Serialize, Debug, Clone)]
pub struct BrandProduct {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub brand: BrandSummary,
    pub images: Vec<ProductImage>,
}

impl From<ProductView> for BrandProduct {
    fn from(view: ProductView) -> Self {
        BrandProduct {
            id: view.id,
            name: view.name,
            description: view.description,
            price: view.price,
            stock: view.stock,
            brand: view.brand,
            images: view.images,
        }
    }
}

pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: Option<i64>,
    pub brand_id: i64,
    pub stock: i64,
    pub main_image_url: String,
}
