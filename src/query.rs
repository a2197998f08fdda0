//! Product listing queries.
//!
//! Turns untrusted query-string parameters into a filtered, sorted and paginated
//! SELECT over `products`, then loads each page's relations in batches.
//!
//! Sorting only ever references columns from a fixed allow-list; caller-supplied
//! text never reaches the SQL string, only bound parameters.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    config::PageLimits,
    errors::AppError,
    structs::{Brand, BrandSummary, Category, Inventory, Product, ProductImage, ProductView},
    utils::escape_like,
};

const PRODUCT_COLUMNS: &str =
    "p.id, p.name, p.description, p.price, p.category_id, p.brand_id, p.created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Name,
    Price,
    CreatedAt,
    Stock,
}

impl SortColumn {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "name" => Some(SortColumn::Name),
            "price" => Some(SortColumn::Price),
            "created_at" => Some(SortColumn::CreatedAt),
            "stock" => Some(SortColumn::Stock),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortColumn::Name => "p.name",
            SortColumn::Price => "p.price",
            SortColumn::CreatedAt => "p.created_at",
            SortColumn::Stock => "i.quantity",
        }
    }

    fn needs_inventory(self) -> bool {
        matches!(self, SortColumn::Stock)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `asc` sorts descending.
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Raw query-string parameters of the product listing.
///
/// Every field is kept as text so that a malformed number falls back to its
/// default instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub category_id: Option<String>,
    pub brand_id: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn parse_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

fn parse_price(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

pub fn clamp_per_page(requested: Option<i64>, limits: PageLimits) -> i64 {
    requested
        .unwrap_or(limits.default_page_size)
        .clamp(1, limits.max_page_size)
}

/// Parses `sort_by`/`sort_order` into ordered sort keys.
///
/// A single order is broadcast over every column; any other count mismatch
/// and any column outside the allow-list is rejected.
pub fn parse_sort(
    sort_by: &str,
    sort_order: &str,
) -> Result<Vec<(SortColumn, SortOrder)>, AppError> {
    let columns: Vec<&str> = sort_by.split(',').map(str::trim).collect();
    let mut orders: Vec<&str> = sort_order.split(',').map(str::trim).collect();

    if columns.len() != orders.len() {
        if orders.len() == 1 {
            orders = vec![orders[0]; columns.len()];
        } else {
            return Err(AppError::BadRequest(
                "sort_by and sort_order counts do not match".to_owned(),
            ));
        }
    }

    columns
        .iter()
        .zip(orders.iter())
        .map(|(column, order)| {
            SortColumn::parse(column)
                .map(|col| (col, SortOrder::parse(order)))
                .ok_or_else(|| AppError::BadRequest(format!("invalid sort column '{}'", column)))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ProductQuery {
    pub page: i64,
    pub per_page: i64,
    pub category_id: Option<i64>,
    pub brand_id: Option<i64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub search: Option<String>,
    pub sort: Vec<(SortColumn, SortOrder)>,
}

#[derive(Debug, Serialize)]
pub struct ProductPage {
    pub products: Vec<ProductView>,
    pub total_items: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub per_page: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl ProductQuery {
    pub fn from_params(params: &ListParams, limits: PageLimits) -> Result<Self, AppError> {
        let sort = parse_sort(
            params.sort_by.as_deref().unwrap_or("created_at"),
            params.sort_order.as_deref().unwrap_or("desc"),
        )?;

        Ok(ProductQuery {
            page: parse_int(params.page.as_deref()).unwrap_or(1).max(1),
            per_page: clamp_per_page(parse_int(params.per_page.as_deref()), limits),
            // id 0 never exists, treat it like an absent filter
            category_id: parse_int(params.category_id.as_deref()).filter(|id| *id != 0),
            brand_id: parse_int(params.brand_id.as_deref()).filter(|id| *id != 0),
            min_price: parse_price(params.min_price.as_deref()),
            max_price: parse_price(params.max_price.as_deref()),
            search: params
                .search
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
            sort,
        })
    }

    pub fn joins_inventory(&self) -> bool {
        self.sort.iter().any(|(col, _)| col.needs_inventory())
    }

    fn push_from_and_filters(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        qb.push(" FROM products p");
        if self.joins_inventory() {
            qb.push(" JOIN inventory i ON i.product_id = p.id");
        }
        qb.push(" WHERE 1 = 1");

        if let Some(category_id) = self.category_id {
            qb.push(" AND p.category_id = ").push_bind(category_id);
        }
        if let Some(brand_id) = self.brand_id {
            qb.push(" AND p.brand_id = ").push_bind(brand_id);
        }
        if let Some(min_price) = self.min_price {
            qb.push(" AND p.price >= ").push_bind(min_price);
        }
        if let Some(max_price) = self.max_price {
            qb.push(" AND p.price <= ").push_bind(max_price);
        }
        if let Some(search) = &self.search {
            // SQLite's lower() only folds ASCII, so fold the term the same way
            let pattern = format!("%{}%", escape_like(&search.to_ascii_lowercase()));
            qb.push(" AND (lower(p.name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(p.description) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }

    pub fn count_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*)");
        self.push_from_and_filters(&mut qb);
        qb
    }

    pub fn page_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT {}", PRODUCT_COLUMNS));
        self.push_from_and_filters(&mut qb);

        qb.push(" ORDER BY ");
        for (col, order) in &self.sort {
            qb.push(col.sql()).push(" ").push(order.sql()).push(", ");
        }
        // tied sort keys still page deterministically
        qb.push("p.id ASC");

        qb.push(" LIMIT ")
            .push_bind(self.per_page)
            .push(" OFFSET ")
            .push_bind((self.page - 1).saturating_mul(self.per_page));
        qb
    }

    pub async fn fetch(&self, pool: &SqlitePool) -> Result<ProductPage, AppError> {
        let total_items: i64 = self
            .count_query()
            .build_query_scalar::<i64>()
            .fetch_one(pool)
            .await?;

        let mut page_query = self.page_query();
        let rows: Vec<Product> = page_query.build_query_as::<Product>().fetch_all(pool).await?;
        log::debug!(
            "Product page {} ({} per page): {} of {} rows",
            self.page,
            self.per_page,
            rows.len(),
            total_items
        );

        let products = eager_load(pool, rows).await?;
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + self.per_page - 1) / self.per_page
        };

        Ok(ProductPage {
            products,
            total_items,
            total_pages,
            current_page: self.page,
            per_page: self.per_page,
            has_next: self.page < total_pages,
            has_prev: self.page > 1,
        })
    }
}

fn id_list_query(prefix: &str, ids: &[i64], suffix: &str) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(prefix);
    qb.push(" (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
    qb.push(suffix);
    qb
}

/// Resolves category, brand, stock and images for `rows` with one query per relation.
pub async fn eager_load(
    pool: &SqlitePool,
    rows: Vec<Product>,
) -> Result<Vec<ProductView>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let product_ids: Vec<i64> = rows.iter().map(|p| p.id).collect();
    let brand_ids: Vec<i64> = rows
        .iter()
        .map(|p| p.brand_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let category_ids: Vec<i64> = rows
        .iter()
        .filter_map(|p| p.category_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let brands: HashMap<i64, Brand> = id_list_query(
        "SELECT id, name, description, owner_id, created_at FROM brands WHERE id IN",
        &brand_ids,
        "",
    )
    .build_query_as::<Brand>()
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|b| (b.id, b))
    .collect();

    let categories: HashMap<i64, Category> = if category_ids.is_empty() {
        HashMap::new()
    } else {
        id_list_query("SELECT id, name FROM categories WHERE id IN", &category_ids, "")
            .build_query_as::<Category>()
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect()
    };

    let stock: HashMap<i64, i64> = id_list_query(
        "SELECT product_id, quantity FROM inventory WHERE product_id IN",
        &product_ids,
        "",
    )
    .build_query_as::<Inventory>()
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|inv| (inv.product_id, inv.quantity))
    .collect();

    let mut images: HashMap<i64, Vec<ProductImage>> = HashMap::new();
    for image in id_list_query(
        "SELECT id, product_id, image_url, is_main FROM product_images WHERE product_id IN",
        &product_ids,
        " ORDER BY is_main DESC, id ASC",
    )
    .build_query_as::<ProductImage>()
    .fetch_all(pool)
    .await?
    {
        images.entry(image.product_id).or_default().push(image);
    }

    rows.into_iter()
        .map(|product| {
            let brand = brands.get(&product.brand_id).ok_or_else(|| {
                AppError::Internal(format!(
                    "product {} references missing brand {}",
                    product.id, product.brand_id
                ))
            })?;
            Ok(ProductView {
                id: product.id,
                stock: stock.get(&product.id).copied().unwrap_or(0),
                category: product.category_id.and_then(|id| categories.get(&id).cloned()),
                brand: BrandSummary::from(brand),
                images: images.remove(&product.id).unwrap_or_default(),
                name: product.name,
                description: product.description,
                price: product.price,
                created_at: product.created_at,
            })
        })
        .collect()
}
