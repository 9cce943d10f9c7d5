use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Minimum width of the numeric suffix in a serial number. Once a
/// sequence passes 999 the suffix simply grows wider.
pub const SERIAL_SUFFIX_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProgressStatus::Pending),
            "in_progress" => Some(ProgressStatus::InProgress),
            "completed" => Some(ProgressStatus::Completed),
            "confirmed" => Some(ProgressStatus::Confirmed),
            _ => None,
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// One {machine, quantity} entry of an order. Embedded in the order row
/// as structured data; it has no lifecycle of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineLine {
    pub machine_id: Uuid,
    pub quantity: i32,
}

/// What a minted serial is attached to. Exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialTarget {
    Machine(Uuid),
    Panel(Uuid),
}

/// A contiguous run of serial numbers to reserve for one product code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationGroup {
    pub prefix: String,
    pub target: SerialTarget,
    pub count: i64,
}

/// Expands order lines into allocation groups, preserving input order:
/// for each line, first the machine itself, then every attached panel.
/// A line of quantity Q with P panels yields Q machine serials and Q
/// serials per panel.
///
/// Lines whose machine id is missing from `machine_codes` are dropped
/// entirely, panels included. Callers that want to reject such lines
/// must do so before planning.
pub fn plan_allocations(
    lines: &[MachineLine],
    machine_codes: &HashMap<Uuid, String>,
    panels_by_machine: &HashMap<Uuid, Vec<(Uuid, String)>>,
) -> Vec<AllocationGroup> {
    let mut groups = Vec::new();
    for line in lines {
        let code = match machine_codes.get(&line.machine_id) {
            Some(code) => code,
            None => continue,
        };
        let count = i64::from(line.quantity);
        groups.push(AllocationGroup {
            prefix: code.clone(),
            target: SerialTarget::Machine(line.machine_id),
            count,
        });
        if let Some(panels) = panels_by_machine.get(&line.machine_id) {
            for (panel_id, panel_code) in panels {
                groups.push(AllocationGroup {
                    prefix: panel_code.clone(),
                    target: SerialTarget::Panel(*panel_id),
                    count,
                });
            }
        }
    }
    groups
}

/// Formats `<prefix><number>` with the suffix zero-padded to at least
/// `SERIAL_SUFFIX_WIDTH` digits.
pub fn format_serial(prefix: &str, number: i64) -> String {
    format!("{prefix}{number:0width$}", width = SERIAL_SUFFIX_WIDTH)
}

/// Parses the numeric suffix of a serial issued for `prefix`. Returns
/// None unless the remainder after the prefix is one or more digits,
/// so serials of a product whose code merely starts with `prefix` and
/// continues with letters are not miscounted.
pub fn numeric_suffix(serial: &str, prefix: &str) -> Option<i64> {
    let rest = serial.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Highest numeric suffix among already-issued serials for `prefix`,
/// or 0 when none match. Tolerates out-of-order insertion since it
/// inspects every candidate rather than the most recent row.
pub fn max_numeric_suffix<'a>(serials: impl IntoIterator<Item = &'a str>, prefix: &str) -> i64 {
    serials
        .into_iter()
        .filter_map(|s| numeric_suffix(s, prefix))
        .max()
        .unwrap_or(0)
}

/// Product codes double as serial prefixes and must stay plain ASCII
/// alphanumeric so prefix scans cannot be confused by pattern
/// metacharacters.
pub fn is_valid_product_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_alphanumeric())
}
