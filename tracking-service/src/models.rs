use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{MachineLine, PaymentStatus, ProgressStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::countries)]
pub struct Country {
    pub id: Uuid,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::countries)]
pub struct NewCountry {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::machines)]
pub struct Machine {
    pub id: Uuid,
    pub name: String,
    pub product_code: String,
    pub created_by: Uuid,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::machines)]
pub struct NewMachine {
    pub id: Uuid,
    pub name: String,
    pub product_code: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::panels)]
pub struct Panel {
    pub id: Uuid,
    pub name: String,
    pub panel_code: String,
    pub parent_machine_id: Uuid,
    pub created_by: Uuid,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::panels)]
pub struct NewPanel {
    pub id: Uuid,
    pub name: String,
    pub panel_code: String,
    pub parent_machine_id: Uuid,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub progress_status: String,
    pub payment_status: String,
    pub machine_lines: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub progress_status: String,
    pub payment_status: String,
    pub machine_lines: serde_json::Value,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(treat_none_as_null = true)]
pub struct OrderHeaderChangeset {
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
}

// None means "leave untouched"; both columns are NOT NULL.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderStatusChangeset {
    pub progress_status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::serials)]
pub struct Serial {
    pub id: Uuid,
    pub order_id: Uuid,
    pub machine_id: Option<Uuid>,
    pub panel_id: Option<Uuid>,
    pub serial_number: String,
    pub issued_by: Uuid,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::serials)]
pub struct NewSerial {
    pub id: Uuid,
    pub order_id: Uuid,
    pub machine_id: Option<Uuid>,
    pub panel_id: Option<Uuid>,
    pub serial_number: String,
    pub issued_by: Uuid,
}

/// API-facing order with its embedded lines and statuses decoded.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub customer_name: String,
    pub shipping_location: String,
    pub country_id: Uuid,
    pub quote_number: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub progress_status: ProgressStatus,
    pub payment_status: PaymentStatus,
    pub machine_lines: Vec<MachineLine>,
    pub created_by: Uuid,
    pub created_at: Option<DateTime<Utc>>,
}

impl TryFrom<Order> for OrderView {
    type Error = anyhow::Error;

    fn try_from(order: Order) -> Result<Self, Self::Error> {
        let machine_lines: Vec<MachineLine> = serde_json::from_value(order.machine_lines)?;
        let progress_status = ProgressStatus::parse(&order.progress_status)
            .ok_or_else(|| anyhow::anyhow!("unknown progress status: {}", order.progress_status))?;
        let payment_status = PaymentStatus::parse(&order.payment_status)
            .ok_or_else(|| anyhow::anyhow!("unknown payment status: {}", order.payment_status))?;

        Ok(Self {
            id: order.id,
            customer_name: order.customer_name,
            shipping_location: order.shipping_location,
            country_id: order.country_id,
            quote_number: order.quote_number,
            invoice_number: order.invoice_number,
            due_date: order.due_date,
            progress_status,
            payment_status,
            machine_lines,
            created_by: order.created_by,
            created_at: order.created_at,
        })
    }
}
