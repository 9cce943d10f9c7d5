//! Serial number allocation. Each product code owns a monotonically
//! increasing counter row; a reservation bumps it atomically and the
//! row lock serializes every other allocation for that prefix until
//! the surrounding transaction commits.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::schema::{serial_counters, serials};

/// Reserves `count` consecutive numbers for `prefix` and returns the
/// first of the block. Must run inside the order's transaction so the
/// counter row stays locked for the full allocation batch.
///
/// With `reconcile` set (used on retry after a collision) the counter
/// is first re-based on a fresh scan of issued serials, so a counter
/// that fell behind the store cannot produce the same collision twice.
pub async fn reserve_numbers(
    conn: &mut AsyncPgConnection,
    prefix: &str,
    count: i64,
    reconcile: bool,
) -> Result<i64, AppError> {
    if reconcile {
        if let Some(first) = reconcile_and_reserve(conn, prefix, count).await? {
            return Ok(first);
        }
        // no counter row yet, the cold-start path below seeds one
    }

    loop {
        let bumped: Option<i64> = diesel::update(
            serial_counters::table.filter(serial_counters::prefix.eq(prefix)),
        )
        .set(serial_counters::last_number.eq(serial_counters::last_number + count))
        .returning(serial_counters::last_number)
        .get_result(conn)
        .await
        .optional()?;

        if let Some(last) = bumped {
            return Ok(last - count + 1);
        }

        if let Some(first) = seed_counter(conn, prefix, count).await? {
            return Ok(first);
        }
        // lost the seeding race; the counter row exists now, bump it
    }
}

/// Highest suffix among issued serials for `prefix`. Inspects every
/// candidate rather than the latest insert, so out-of-order inserts
/// and deletions cannot hide the true maximum.
async fn max_issued_suffix(conn: &mut AsyncPgConnection, prefix: &str) -> Result<i64, AppError> {
    let issued: Vec<String> = serials::table
        .filter(serials::serial_number.like(format!("{prefix}%")))
        .select(serials::serial_number)
        .load(conn)
        .await?;
    Ok(shared::max_numeric_suffix(
        issued.iter().map(String::as_str),
        prefix,
    ))
}

/// Cold start: no counter row for `prefix` yet. Derives the current
/// maximum from issued serials and seeds the counter with the block
/// already applied.
async fn seed_counter(
    conn: &mut AsyncPgConnection,
    prefix: &str,
    count: i64,
) -> Result<Option<i64>, AppError> {
    let max = max_issued_suffix(conn, prefix).await?;

    let inserted = diesel::insert_into(serial_counters::table)
        .values((
            serial_counters::prefix.eq(prefix),
            serial_counters::last_number.eq(max + count),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    if inserted == 1 {
        debug!(prefix, max, "seeded serial counter");
        Ok(Some(max + 1))
    } else {
        Ok(None)
    }
}

/// Locks the counter row, re-bases it on the issued maximum and takes
/// the block from there. Returns None when no counter row exists.
async fn reconcile_and_reserve(
    conn: &mut AsyncPgConnection,
    prefix: &str,
    count: i64,
) -> Result<Option<i64>, AppError> {
    let current: Option<i64> = serial_counters::table
        .filter(serial_counters::prefix.eq(prefix))
        .select(serial_counters::last_number)
        .for_update()
        .first(conn)
        .await
        .optional()?;

    let Some(current) = current else {
        return Ok(None);
    };

    let issued = max_issued_suffix(conn, prefix).await?;
    let base = current.max(issued);
    if issued > current {
        warn!(prefix, current, issued, "serial counter behind issued serials, re-basing");
    }

    diesel::update(serial_counters::table.filter(serial_counters::prefix.eq(prefix)))
        .set(serial_counters::last_number.eq(base + count))
        .execute(conn)
        .await?;

    Ok(Some(base + 1))
}
