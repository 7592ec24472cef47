//! Stand-in product catalogue served behind the rate limiter.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct Product {
    id: u32,
    name: &'static str,
    price_cents: u64,
}

static CATALOGUE: &[Product] = &[
    Product {
        id: 1,
        name: "Widget",
        price_cents: 1_999,
    },
    Product {
        id: 2,
        name: "Gadget",
        price_cents: 4_950,
    },
    Product {
        id: 3,
        name: "Gizmo",
        price_cents: 12_500,
    },
];

/// Routes under `/products`.
pub fn routes() -> Router {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
}

async fn list_products() -> Json<&'static [Product]> {
    Json(CATALOGUE)
}

async fn get_product(Path(id): Path<u32>) -> Result<Json<&'static Product>, StatusCode> {
    CATALOGUE
        .iter()
        .find(|product| product.id == id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
