//! Product catalog: machines, their attached panels, and countries.
//! Mutation requires the admin capability; product codes are reserved
//! in a shared registry so machine and panel codes can never collide.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use shared::is_valid_product_code;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::Actor;
use crate::error::AppError;
use crate::models::{Country, Machine, NewCountry, NewMachine, NewPanel, Panel};
use crate::schema::{countries, machines, panels, product_codes};

#[derive(Debug, Deserialize)]
pub struct CreateMachineRequest {
    pub name: String,
    pub product_code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePanelRequest {
    pub name: String,
    pub panel_code: String,
    pub parent_machine_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateCountryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PanelListQuery {
    pub machine_id: Option<Uuid>,
}

pub async fn create_machine(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CreateMachineRequest>,
) -> Result<Json<Machine>, AppError> {
    actor.require_admin()?;
    validate_name_and_code(&req.name, &req.product_code)?;

    let mut conn = state.pool.get().await?;
    let new_machine = NewMachine {
        id: Uuid::new_v4(),
        name: req.name,
        product_code: req.product_code.clone(),
        created_by: actor.id,
    };

    let machine = conn
        .transaction::<Machine, AppError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(product_codes::table)
                    .values(product_codes::code.eq(&new_machine.product_code))
                    .execute(conn)
                    .await?;
                let machine: Machine = diesel::insert_into(machines::table)
                    .values(&new_machine)
                    .get_result(conn)
                    .await?;
                Ok(machine)
            })
        })
        .await
        .map_err(|e| code_conflict(e, &req.product_code))?;

    info!(machine_id = %machine.id, product_code = %machine.product_code, "machine created");
    Ok(Json(machine))
}

pub async fn list_machines(State(state): State<AppState>) -> Result<Json<Vec<Machine>>, AppError> {
    let mut conn = state.pool.get().await?;
    let all = machines::table
        .order(machines::created_at.asc())
        .load::<Machine>(&mut conn)
        .await?;
    Ok(Json(all))
}

pub async fn get_machine(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Machine>, AppError> {
    let mut conn = state.pool.get().await?;
    let machine = machines::table
        .find(id)
        .first::<Machine>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("machine {id}")))?;
    Ok(Json(machine))
}

pub async fn create_panel(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CreatePanelRequest>,
) -> Result<Json<Panel>, AppError> {
    actor.require_admin()?;
    validate_name_and_code(&req.name, &req.panel_code)?;

    let mut conn = state.pool.get().await?;
    let parent: Option<Uuid> = machines::table
        .find(req.parent_machine_id)
        .select(machines::id)
        .first(&mut conn)
        .await
        .optional()?;
    if parent.is_none() {
        return Err(AppError::Validation(format!(
            "unknown machine id {}",
            req.parent_machine_id
        )));
    }

    let new_panel = NewPanel {
        id: Uuid::new_v4(),
        name: req.name,
        panel_code: req.panel_code.clone(),
        parent_machine_id: req.parent_machine_id,
        created_by: actor.id,
    };

    let panel = conn
        .transaction::<Panel, AppError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(product_codes::table)
                    .values(product_codes::code.eq(&new_panel.panel_code))
                    .execute(conn)
                    .await?;
                let panel: Panel = diesel::insert_into(panels::table)
                    .values(&new_panel)
                    .get_result(conn)
                    .await?;
                Ok(panel)
            })
        })
        .await
        .map_err(|e| code_conflict(e, &req.panel_code))?;

    info!(panel_id = %panel.id, panel_code = %panel.panel_code, "panel created");
    Ok(Json(panel))
}

pub async fn list_panels(
    State(state): State<AppState>,
    Query(query): Query<PanelListQuery>,
) -> Result<Json<Vec<Panel>>, AppError> {
    let mut conn = state.pool.get().await?;
    let found = match query.machine_id {
        Some(machine_id) => {
            panels::table
                .filter(panels::parent_machine_id.eq(machine_id))
                .order(panels::created_at.asc())
                .load::<Panel>(&mut conn)
                .await?
        }
        None => {
            panels::table
                .order(panels::created_at.asc())
                .load::<Panel>(&mut conn)
                .await?
        }
    };
    Ok(Json(found))
}

pub async fn create_country(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CreateCountryRequest>,
) -> Result<Json<Country>, AppError> {
    actor.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let country: Country = diesel::insert_into(countries::table)
        .values(&NewCountry {
            id: Uuid::new_v4(),
            name: req.name,
        })
        .get_result(&mut conn)
        .await?;
    Ok(Json(country))
}

pub async fn list_countries(State(state): State<AppState>) -> Result<Json<Vec<Country>>, AppError> {
    let mut conn = state.pool.get().await?;
    let all = countries::table
        .order(countries::name.asc())
        .load::<Country>(&mut conn)
        .await?;
    Ok(Json(all))
}

fn validate_name_and_code(name: &str, code: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    if !is_valid_product_code(code) {
        return Err(AppError::Validation(format!(
            "product code {code:?} must be non-empty ASCII alphanumeric"
        )));
    }
    Ok(())
}

fn code_conflict(e: AppError, code: &str) -> AppError {
    match e {
        AppError::Conflict(_) => AppError::Conflict(format!("product code {code} already in use")),
        other => other,
    }
}
