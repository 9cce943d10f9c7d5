use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use shared::{MachineLine, PaymentStatus, ProgressStatus};
use uuid::Uuid;

use crate::auth::Actor;
use crate::catalog;
use crate::error::AppError;
use crate::handlers::{OrderFulfillment, OrderInput};
use crate::models::{
    Order, OrderHeaderChangeset, OrderStatusChangeset, OrderView, Serial,
};
use crate::schema::{countries, orders, serials};
use crate::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub skip_unknown_machines: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub machine_lines: Vec<MachineLine>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub progress_status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderWithSerials {
    pub order: OrderView,
    pub serials: Vec<Serial>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route(
            "/orders/:id",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/orders/:id/status", patch(update_order_status))
        .route("/orders/:id/serials", get(list_order_serials))
        .route(
            "/machines",
            post(catalog::create_machine).get(catalog::list_machines),
        )
        .route("/machines/:id", get(catalog::get_machine))
        .route(
            "/panels",
            post(catalog::create_panel).get(catalog::list_panels),
        )
        .route(
            "/countries",
            post(catalog::create_country).get(catalog::list_countries),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderWithSerials>), AppError> {
    let fulfillment = OrderFulfillment::new(state.pool.clone(), state.skip_unknown_machines);
    let input = OrderInput {
        customer_name: req.customer_name,
        shipping_location: req.shipping_location,
        country_id: req.country_id,
        quote_number: req.quote_number,
        invoice_number: req.invoice_number,
        due_date: req.due_date,
        machine_lines: req.machine_lines,
    };

    let (order, minted) = fulfillment.create_order(input, actor.id).await?;
    let view = OrderView::try_from(order)?;
    Ok((
        StatusCode::CREATED,
        Json(OrderWithSerials {
            order: view,
            serials: minted,
        }),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    _actor: Actor,
) -> Result<Json<Vec<OrderView>>, AppError> {
    let mut conn = state.pool.get().await?;
    let all = orders::table
        .order(orders::created_at.desc())
        .load::<Order>(&mut conn)
        .await?;
    let views = all
        .into_iter()
        .map(OrderView::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

pub async fn get_order(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithSerials>, AppError> {
    let mut conn = state.pool.get().await?;
    let order = orders::table
        .find(id)
        .first::<Order>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    let minted = serials::table
        .filter(serials::order_id.eq(id))
        .order((serials::issued_at.asc(), serials::serial_number.asc()))
        .load::<Serial>(&mut conn)
        .await?;
    Ok(Json(OrderWithSerials {
        order: OrderView::try_from(order)?,
        serials: minted,
    }))
}

pub async fn update_order(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<OrderView>, AppError> {
    if req.customer_name.trim().is_empty() {
        return Err(AppError::Validation(
            "customer name must not be empty".to_string(),
        ));
    }

    let mut conn = state.pool.get().await?;
    let country: Option<Uuid> = countries::table
        .find(req.country_id)
        .select(countries::id)
        .first(&mut conn)
        .await
        .optional()?;
    if country.is_none() {
        return Err(AppError::Validation(format!(
            "unknown country id {}",
            req.country_id
        )));
    }

    let changeset = OrderHeaderChangeset {
        customer_name: req.customer_name,
        shipping_location: req.shipping_location,
        country_id: req.country_id,
        quote_number: req.quote_number,
        invoice_number: req.invoice_number,
        due_date: req.due_date,
    };

    let updated = diesel::update(orders::table.find(id))
        .set(&changeset)
        .get_result::<Order>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;

    Ok(Json(OrderView::try_from(updated)?))
}

/// Either status may move to any value at any time. No workflow is
/// enforced between progress and payment.
pub async fn update_order_status(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderView>, AppError> {
    if req.progress_status.is_none() && req.payment_status.is_none() {
        return Err(AppError::Validation(
            "at least one of progress_status or payment_status is required".to_string(),
        ));
    }

    let progress = req
        .progress_status
        .as_deref()
        .map(|s| {
            ProgressStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown progress status: {s}")))
        })
        .transpose()?;
    let payment = req
        .payment_status
        .as_deref()
        .map(|s| {
            PaymentStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown payment status: {s}")))
        })
        .transpose()?;

    let changeset = OrderStatusChangeset {
        progress_status: progress.map(|s| s.as_str().to_string()),
        payment_status: payment.map(|s| s.as_str().to_string()),
    };

    let mut conn = state.pool.get().await?;
    let updated = diesel::update(orders::table.find(id))
        .set(&changeset)
        .get_result::<Order>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;

    Ok(Json(OrderView::try_from(updated)?))
}

pub async fn delete_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    actor.require_admin()?;
    let mut conn = state.pool.get().await?;
    // Serials go with the order via cascade; their counter rows stay,
    // so freed suffixes are never reissued.
    let deleted = diesel::delete(orders::table.find(id))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("order {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_order_serials(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Serial>>, AppError> {
    let mut conn = state.pool.get().await?;
    let order: Option<Uuid> = orders::table
        .find(id)
        .select(orders::id)
        .first(&mut conn)
        .await
        .optional()?;
    if order.is_none() {
        return Err(AppError::NotFound(format!("order {id}")));
    }
    let minted = serials::table
        .filter(serials::order_id.eq(id))
        .order((serials::issued_at.asc(), serials::serial_number.asc()))
        .load::<Serial>(&mut conn)
        .await?;
    Ok(Json(minted))
}

pub async fn health_check() -> &'static str {
    "OK"
}
