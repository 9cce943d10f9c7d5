//! Order fulfillment. Expands an order's machine lines into the full
//! set of serials to mint (one per machine unit, one per unit for each
//! attached panel) and persists the order row plus every serial in a
//! single transaction.

use std::collections::HashMap;

use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    format_serial, plan_allocations, AllocationGroup, MachineLine, PaymentStatus, ProgressStatus,
    SerialTarget,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Machine, NewOrder, NewSerial, Order, Panel, Serial};
use crate::schema::{countries, machines, orders, panels, serials};
use crate::serials::reserve_numbers;
use crate::DbPool;

/// Whole-batch retries after a serial collision before giving up.
const MAX_SERIAL_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct OrderInput {
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub machine_lines: Vec<MachineLine>,
}

pub struct OrderFulfillment {
    pool: DbPool,
    skip_unknown_machines: bool,
}

impl OrderFulfillment {
    pub fn new(pool: DbPool, skip_unknown_machines: bool) -> Self {
        Self {
            pool,
            skip_unknown_machines,
        }
    }

    /// Creates the order and mints its serials. All-or-nothing: a
    /// failure after the order row is staged rolls everything back.
    pub async fn create_order(
        &self,
        input: OrderInput,
        actor: Uuid,
    ) -> Result<(Order, Vec<Serial>), AppError> {
        validate_input(&input)?;

        let mut conn = self.pool.get().await?;

        let country: Option<Uuid> = countries::table
            .find(input.country_id)
            .select(countries::id)
            .first(&mut conn)
            .await
            .optional()?;
        if country.is_none() {
            return Err(AppError::Validation(format!(
                "unknown country id {}",
                input.country_id
            )));
        }

        let mut wanted: Vec<Uuid> = input.machine_lines.iter().map(|l| l.machine_id).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let found: Vec<Machine> = machines::table
            .filter(machines::id.eq_any(&wanted))
            .load(&mut conn)
            .await?;
        let machine_codes: HashMap<Uuid, String> = found
            .iter()
            .map(|m| (m.id, m.product_code.clone()))
            .collect();

        let missing: Vec<Uuid> = wanted
            .iter()
            .copied()
            .filter(|id| !machine_codes.contains_key(id))
            .collect();
        if !missing.is_empty() {
            if self.skip_unknown_machines {
                warn!(?missing, "dropping order lines for unknown machines");
            } else {
                return Err(AppError::Validation(format!(
                    "unknown machine ids: {missing:?}"
                )));
            }
        }

        let known: Vec<Uuid> = machine_codes.keys().copied().collect();
        let attached: Vec<Panel> = panels::table
            .filter(panels::parent_machine_id.eq_any(&known))
            .order(panels::created_at.asc())
            .load(&mut conn)
            .await?;
        let mut panels_by_machine: HashMap<Uuid, Vec<(Uuid, String)>> = HashMap::new();
        for panel in &attached {
            panels_by_machine
                .entry(panel.parent_machine_id)
                .or_default()
                .push((panel.id, panel.panel_code.clone()));
        }

        let plan = plan_allocations(&input.machine_lines, &machine_codes, &panels_by_machine);

        let new_order = NewOrder {
            id: Uuid::new_v4(),
            customer_name: input.customer_name,
            shipping_location: input.shipping_location,
            country_id: input.country_id,
            quote_number: input.quote_number,
            invoice_number: input.invoice_number,
            due_date: input.due_date,
            progress_status: ProgressStatus::Pending.as_str().to_string(),
            payment_status: PaymentStatus::Pending.as_str().to_string(),
            machine_lines: serde_json::to_value(&input.machine_lines)
                .map_err(|e| AppError::Storage(e.to_string()))?,
            created_by: actor,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match mint(&mut conn, new_order.clone(), &plan, actor, attempt > 1).await {
                Err(AppError::Conflict(reason)) if attempt < MAX_SERIAL_RETRIES => {
                    warn!(attempt, %reason, "serial collision, retrying allocation batch");
                }
                Ok((order, minted)) => {
                    info!(order_id = %order.id, serials = minted.len(), "order created");
                    return Ok((order, minted));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn validate_input(input: &OrderInput) -> Result<(), AppError> {
    if input.machine_lines.is_empty() {
        return Err(AppError::Validation(
            "order must contain at least one machine line".to_string(),
        ));
    }
    if let Some(line) = input.machine_lines.iter().find(|l| l.quantity < 1) {
        return Err(AppError::Validation(format!(
            "machine {} ordered with quantity {}, must be at least 1",
            line.machine_id, line.quantity
        )));
    }
    if input.customer_name.trim().is_empty() {
        return Err(AppError::Validation(
            "customer name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// One attempt: order row, counter reservations and the serial batch
/// in a single transaction. Serial numbers per product code come out
/// strictly increasing because every reservation bumps the same locked
/// counter row.
async fn mint(
    conn: &mut AsyncPgConnection,
    new_order: NewOrder,
    plan: &[AllocationGroup],
    actor: Uuid,
    reconcile: bool,
) -> Result<(Order, Vec<Serial>), AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        Box::pin(async move {
            let order: Order = diesel::insert_into(orders::table)
                .values(&new_order)
                .get_result(conn)
                .await?;

            let mut rows: Vec<NewSerial> = Vec::new();
            for group in plan {
                let first = reserve_numbers(conn, &group.prefix, group.count, reconcile).await?;
                for offset in 0..group.count {
                    let (machine_id, panel_id) = match group.target {
                        SerialTarget::Machine(id) => (Some(id), None),
                        SerialTarget::Panel(id) => (None, Some(id)),
                    };
                    rows.push(NewSerial {
                        id: Uuid::new_v4(),
                        order_id: order.id,
                        machine_id,
                        panel_id,
                        serial_number: format_serial(&group.prefix, first + offset),
                        issued_by: actor,
                    });
                }
            }

            let minted: Vec<Serial> = if rows.is_empty() {
                Vec::new()
            } else {
                diesel::insert_into(serials::table)
                    .values(&rows)
                    .get_results(conn)
                    .await?
            };

            Ok((order, minted))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(lines: Vec<MachineLine>) -> OrderInput {
        OrderInput {
            customer_name: "Acme Tooling".to_string(),
            shipping_location: "Rotterdam".to_string(),
            country_id: Uuid::new_v4(),
            quote_number: None,
            invoice_number: None,
            due_date: None,
            machine_lines: lines,
        }
    }

    #[test]
    fn rejects_empty_machine_lines() {
        let err = validate_input(&input(vec![])).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let lines = vec![MachineLine {
            machine_id: Uuid::new_v4(),
            quantity: 0,
        }];
        let err = validate_input(&input(lines)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_blank_customer_name() {
        let mut order = input(vec![MachineLine {
            machine_id: Uuid::new_v4(),
            quantity: 1,
        }]);
        order.customer_name = "  ".to_string();
        let err = validate_input(&order).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn accepts_minimal_valid_input() {
        let lines = vec![MachineLine {
            machine_id: Uuid::new_v4(),
            quantity: 1,
        }];
        assert!(validate_input(&input(lines)).is_ok());
    }
}
