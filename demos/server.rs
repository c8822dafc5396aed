// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP API server for the cashback ledger.
//!
//! Run with: `cargo run --example server`
//!
//! # Example requests
//!
//! ```bash
//! # Register a user
//! curl -X POST http://localhost:3000/users \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 1, "phone_number": "09171234567"}'
//!
//! # Convert a product link
//! curl -X POST http://localhost:3000/users/1/links \
//!   -H "Content-Type: application/json" \
//!   -d '{"url": "https://shopee.ph/product/123/456"}'
//!
//! # Follow the tracking URL
//! curl -i http://localhost:3000/track/1
//!
//! # Submit a purchase
//! curl -X POST http://localhost:3000/users/1/transactions \
//!   -H "Content-Type: application/json" \
//!   -d '{"link_id": 1, "product_name": "Headphones", "product_price": "1000.00"}'
//!
//! # Approve it
//! curl -X POST http://localhost:3000/admin/transactions/review \
//!   -H "Content-Type: application/json" \
//!   -d '{"action": "approve", "ids": [1]}'
//!
//! # Dashboard
//! curl http://localhost:3000/users/1/dashboard
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cashback_ledger_rs::{
    AccountSummary, AdminOverview, AffiliateLink, Dashboard, Engine, LedgerError, LinkId,
    PaymentMethod, ReviewSummary, Settings, Transaction, TransactionId, UserId, Withdrawal,
    WithdrawalHistory, WithdrawalId, WithdrawalRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: u32,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub url: String,
}

/// Request body for submitting a purchase.
///
/// ```json
/// {"link_id": 1, "product_name": "Headphones", "product_price": "1000.00"}
/// ```
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub link_id: Option<u64>,
    pub product_name: String,
    pub product_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_details: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Bulk review request, applied row by row.
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub action: ReviewAction,
    pub ids: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct FailedRow {
    pub id: u64,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub applied: Vec<u64>,
    pub unchanged: Vec<u64>,
    pub failed: Vec<FailedRow>,
}

impl ReviewResponse {
    fn from_summary<I: Copy>(summary: ReviewSummary<I>, raw: impl Fn(I) -> u64) -> Self {
        Self {
            applied: summary.applied.into_iter().map(&raw).collect(),
            unchanged: summary.unchanged.into_iter().map(&raw).collect(),
            failed: summary
                .failed
                .into_iter()
                .map(|(id, e)| FailedRow {
                    id: raw(id),
                    error: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the cashback engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidMerchantUrl => (StatusCode::BAD_REQUEST, "INVALID_MERCHANT_URL"),
            LedgerError::InvalidPrice => (StatusCode::BAD_REQUEST, "INVALID_PRICE"),
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::InvalidProductName => (StatusCode::BAD_REQUEST, "INVALID_PRODUCT_NAME"),
            LedgerError::InvalidPaymentDetails => {
                (StatusCode::BAD_REQUEST, "INVALID_PAYMENT_DETAILS")
            }
            LedgerError::InvalidPhoneNumber => (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER"),
            LedgerError::BelowMinimumWithdrawal { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "BELOW_MINIMUM_WITHDRAWAL")
            }
            LedgerError::BalanceBelowMinimum { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "BALANCE_BELOW_MINIMUM")
            }
            LedgerError::InsufficientBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::OwnerMismatch => (StatusCode::BAD_REQUEST, "OWNER_MISMATCH"),
            LedgerError::AccountNotFound => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            LedgerError::DuplicateAccount => (StatusCode::CONFLICT, "DUPLICATE_ACCOUNT"),
            LedgerError::LinkNotFound => (StatusCode::NOT_FOUND, "LINK_NOT_FOUND"),
            LedgerError::TransactionNotFound => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
            LedgerError::WithdrawalNotFound => (StatusCode::NOT_FOUND, "WITHDRAWAL_NOT_FOUND"),
            LedgerError::AlreadyReviewed => (StatusCode::CONFLICT, "ALREADY_REVIEWED"),
            LedgerError::DuplicateEntry => (StatusCode::CONFLICT, "DUPLICATE_ENTRY"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /users - Register a user.
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .register(UserId(request.user_id), request.phone_number)?;
    Ok(StatusCode::CREATED)
}

/// GET /users/{id} - Profile and balance.
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<AccountSummary>, AppError> {
    Ok(Json(state.engine.summary(UserId(id))?))
}

async fn dashboard(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(state.engine.dashboard(UserId(id))?))
}

/// POST /users/{id}/links - Convert a merchant link.
async fn convert_link(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<LinkRequest>,
) -> Result<(StatusCode, Json<AffiliateLink>), AppError> {
    let link = state.engine.convert_link(UserId(id), &request.url)?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Vec<AffiliateLink>>, AppError> {
    Ok(Json(state.engine.links_for(UserId(id))?))
}

/// GET /track/{id} - Count the click and redirect to the merchant.
async fn track(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Response, AppError> {
    let target = state.engine.track_click(LinkId(id))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, target)]).into_response())
}

/// POST /users/{id}/transactions - Submit a purchase for review.
async fn submit_transaction(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = state.engine.submit_transaction(
        UserId(id),
        request.link_id.map(LinkId),
        &request.product_name,
        request.product_price,
    )?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.engine.transactions_for(UserId(id))?))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path((id, tx)): Path<(u32, u64)>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(
        state
            .engine
            .transaction_detail(UserId(id), TransactionId(tx))?,
    ))
}

/// DELETE /users/{id}/transactions/{tx} - Delete, reversing approved cashback.
async fn delete_transaction(
    State(state): State<AppState>,
    Path((id, tx)): Path<(u32, u64)>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(
        state
            .engine
            .delete_transaction(UserId(id), TransactionId(tx))?,
    ))
}

/// POST /users/{id}/withdrawals - Request a payout.
async fn request_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    let withdrawal = state.engine.request_withdrawal(
        UserId(id),
        WithdrawalRequest {
            amount: request.amount,
            payment_method: request.payment_method,
            payment_details: request.payment_details,
        },
    )?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

async fn withdrawal_history(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<WithdrawalHistory>, AppError> {
    Ok(Json(state.engine.withdrawal_history(UserId(id))?))
}

/// POST /admin/transactions/review - Bulk approve or reject.
async fn review_transactions(
    State(state): State<AppState>,
    Json(request): Json<ReviewRequest>,
) -> Json<ReviewResponse> {
    let ids: Vec<TransactionId> = request.ids.into_iter().map(TransactionId).collect();
    let summary = match request.action {
        ReviewAction::Approve => state.engine.approve_transactions(&ids),
        ReviewAction::Reject => state.engine.reject_transactions(&ids),
    };
    Json(ReviewResponse::from_summary(summary, |id| id.0))
}

/// POST /admin/withdrawals/review - Bulk approve or reject.
async fn review_withdrawals(
    State(state): State<AppState>,
    Json(request): Json<ReviewRequest>,
) -> Json<ReviewResponse> {
    let ids: Vec<WithdrawalId> = request.ids.into_iter().map(WithdrawalId).collect();
    let summary = match request.action {
        ReviewAction::Approve => state.engine.approve_withdrawals(&ids),
        ReviewAction::Reject => state.engine.reject_withdrawals(&ids),
    };
    Json(ReviewResponse::from_summary(summary, |id| id.0))
}

async fn admin_overview(State(state): State<AppState>) -> Json<AdminOverview> {
    Json(state.engine.admin_overview())
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(register))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/dashboard", get(dashboard))
        .route("/users/{id}/links", post(convert_link).get(list_links))
        .route(
            "/users/{id}/transactions",
            post(submit_transaction).get(list_transactions),
        )
        .route(
            "/users/{id}/transactions/{tx}",
            get(get_transaction).delete(delete_transaction),
        )
        .route(
            "/users/{id}/withdrawals",
            post(request_withdrawal).get(withdrawal_history),
        )
        .route("/track/{id}", get(track))
        .route("/admin/transactions/review", post(review_transactions))
        .route("/admin/withdrawals/review", post(review_withdrawals))
        .route("/admin/overview", get(admin_overview))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Tracking URLs must point back at this server's /track route.
    let settings = Settings {
        tracking_base_url: "http://127.0.0.1:3000/track".to_string(),
        ..Settings::default()
    };
    let state = AppState {
        engine: Arc::new(Engine::with_settings(settings)),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!("Cashback API server running on http://127.0.0.1:3000");
    info!("  POST /users                          - Register a user");
    info!("  POST /users/:id/links                - Convert a merchant link");
    info!("  GET  /track/:id                      - Follow a tracking URL");
    info!("  POST /users/:id/transactions         - Submit a purchase");
    info!("  POST /users/:id/withdrawals          - Request a payout");
    info!("  POST /admin/transactions/review      - Bulk review purchases");
    info!("  POST /admin/withdrawals/review       - Bulk review payouts");
    info!("  GET  /admin/overview                 - Admin overview");

    axum::serve(listener, app).await.unwrap();
}
