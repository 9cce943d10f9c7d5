//! End-to-end tests against a live PostgreSQL. Point TEST_DATABASE_URL
//! at a scratch database and run with `cargo test -- --ignored`.
//! Every test seeds its own catalog under freshly generated product
//! codes, so the suite can share a database across runs.

use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::MigrationHarness;
use shared::{format_serial, numeric_suffix, MachineLine};
use uuid::Uuid;

use tracking_service::error::AppError;
use tracking_service::handlers::{OrderFulfillment, OrderInput};
use tracking_service::models::{NewCountry, NewMachine, NewPanel, Serial};
use tracking_service::schema::{countries, machines, orders, panels, product_codes, serial_counters, serials};
use tracking_service::{DbPool, MIGRATIONS};

fn database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a PostgreSQL database")
}

async fn setup_pool() -> DbPool {
    let url = database_url();
    let mut conn = PgConnection::establish(&url).expect("connect for migrations");
    conn.run_pending_migrations(MIGRATIONS).expect("run migrations");
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&url);
    Pool::builder().build(config).await.expect("build pool")
}

/// Fresh product code per test run.
fn code(stem: &str) -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("{stem}{}", tail[..8].to_uppercase())
}

async fn seed_country(conn: &mut AsyncPgConnection) -> Uuid {
    let id = Uuid::new_v4();
    diesel::insert_into(countries::table)
        .values(&NewCountry {
            id,
            name: format!("Country {id}"),
        })
        .execute(conn)
        .await
        .unwrap();
    id
}

async fn seed_machine(conn: &mut AsyncPgConnection, product_code: &str, actor: Uuid) -> Uuid {
    diesel::insert_into(product_codes::table)
        .values(product_codes::code.eq(product_code))
        .execute(conn)
        .await
        .unwrap();
    let id = Uuid::new_v4();
    diesel::insert_into(machines::table)
        .values(&NewMachine {
            id,
            name: "CNC mill".to_string(),
            product_code: product_code.to_string(),
            created_by: actor,
        })
        .execute(conn)
        .await
        .unwrap();
    id
}

async fn seed_panel(
    conn: &mut AsyncPgConnection,
    panel_code: &str,
    machine_id: Uuid,
    actor: Uuid,
) -> Uuid {
    diesel::insert_into(product_codes::table)
        .values(product_codes::code.eq(panel_code))
        .execute(conn)
        .await
        .unwrap();
    let id = Uuid::new_v4();
    diesel::insert_into(panels::table)
        .values(&NewPanel {
            id,
            name: "Control panel".to_string(),
            panel_code: panel_code.to_string(),
            parent_machine_id: machine_id,
            created_by: actor,
        })
        .execute(conn)
        .await
        .unwrap();
    id
}

fn order_input(country_id: Uuid, lines: Vec<MachineLine>) -> OrderInput {
    OrderInput {
        customer_name: "Acme Tooling".to_string(),
        shipping_location: "Rotterdam".to_string(),
        country_id,
        quote_number: Some("Q-100".to_string()),
        invoice_number: None,
        due_date: None,
        machine_lines: lines,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn order_fans_out_machine_and_panel_serials() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("CNC");
    let panel_code = code("CP");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;
    let panel = seed_panel(&mut conn, &panel_code, machine, actor).await;
    drop(conn);

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    let (order, minted) = fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 2 }]),
            actor,
        )
        .await
        .unwrap();

    // Q machine serials plus Q serials for the one attached panel
    assert_eq!(minted.len(), 4);
    assert!(minted.iter().all(|s| s.order_id == order.id));
    assert!(minted.iter().all(|s| s.issued_by == actor));

    let machine_serials: Vec<&Serial> =
        minted.iter().filter(|s| s.machine_id == Some(machine)).collect();
    let panel_serials: Vec<&Serial> =
        minted.iter().filter(|s| s.panel_id == Some(panel)).collect();
    assert_eq!(machine_serials.len(), 2);
    assert_eq!(panel_serials.len(), 2);

    let machine_numbers: Vec<String> =
        machine_serials.iter().map(|s| s.serial_number.clone()).collect();
    assert_eq!(
        machine_numbers,
        vec![format_serial(&machine_code, 1), format_serial(&machine_code, 2)]
    );
    let panel_numbers: Vec<String> =
        panel_serials.iter().map(|s| s.serial_number.clone()).collect();
    assert_eq!(
        panel_numbers,
        vec![format_serial(&panel_code, 1), format_serial(&panel_code, 2)]
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn serial_numbers_stay_monotonic_across_orders() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("LTH");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;
    drop(conn);

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    let mut seen = Vec::new();
    for _ in 0..3 {
        let (_, minted) = fulfillment
            .create_order(
                order_input(country, vec![MachineLine { machine_id: machine, quantity: 1 }]),
                actor,
            )
            .await
            .unwrap();
        seen.push(numeric_suffix(&minted[0].serial_number, &machine_code).unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn concurrent_orders_never_share_a_serial() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("MC");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;
    drop(conn);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let fulfillment = OrderFulfillment::new(pool.clone(), false);
            let line = MachineLine { machine_id: machine, quantity: 1 };
            let input = order_input(country, vec![line]);
            tokio::spawn(async move { fulfillment.create_order(input, actor).await })
        })
        .collect();

    let mut suffixes = Vec::new();
    for task in futures::future::join_all(tasks).await {
        let (_, minted) = task.unwrap().unwrap();
        suffixes.push(numeric_suffix(&minted[0].serial_number, &machine_code).unwrap());
    }
    suffixes.sort_unstable();
    assert_eq!(suffixes, vec![1, 2, 3, 4]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn rejected_order_persists_nothing() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let country = seed_country(&mut conn).await;
    let unknown_machine = Uuid::new_v4();

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    let customer = format!("Ghost Customer {}", Uuid::new_v4());
    let mut input =
        order_input(country, vec![MachineLine { machine_id: unknown_machine, quantity: 1 }]);
    input.customer_name = customer.clone();

    let err = fulfillment.create_order(input, actor).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let stored: i64 = orders::table
        .filter(orders::customer_name.eq(&customer))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(stored, 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn deleted_orders_never_free_their_serial_numbers() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("GRN");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    let (first_order, minted) = fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 2 }]),
            actor,
        )
        .await
        .unwrap();
    assert_eq!(minted.len(), 2);

    let removed = diesel::delete(orders::table.find(first_order.id))
        .execute(&mut conn)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let orphans: i64 = serials::table
        .filter(serials::order_id.eq(first_order.id))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(orphans, 0, "cascade should remove the order's serials");

    let (_, reminted) = fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 1 }]),
            actor,
        )
        .await
        .unwrap();
    // the freed 001 and 002 stay burned
    assert_eq!(reminted[0].serial_number, format_serial(&machine_code, 3));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn cold_start_recovers_high_water_mark_from_issued_serials() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("HW");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 2 }]),
            actor,
        )
        .await
        .unwrap();

    // Simulate a store that predates the counter table.
    diesel::delete(serial_counters::table.filter(serial_counters::prefix.eq(&machine_code)))
        .execute(&mut conn)
        .await
        .unwrap();

    let (_, minted) = fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 1 }]),
            actor,
        )
        .await
        .unwrap();
    assert_eq!(minted[0].serial_number, format_serial(&machine_code, 3));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn stale_counter_collision_rolls_back_and_retries() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("ST");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 2 }]),
            actor,
        )
        .await
        .unwrap();

    // Wind the counter back behind the issued serials. The next
    // allocation computes an already-taken number, hits the unique
    // index, rolls the whole attempt back and re-bases on retry.
    diesel::update(serial_counters::table.filter(serial_counters::prefix.eq(&machine_code)))
        .set(serial_counters::last_number.eq(1_i64))
        .execute(&mut conn)
        .await
        .unwrap();

    let customer = format!("Retry Customer {}", Uuid::new_v4());
    let mut input =
        order_input(country, vec![MachineLine { machine_id: machine, quantity: 1 }]);
    input.customer_name = customer.clone();

    let (order, minted) = fulfillment.create_order(input, actor).await.unwrap();
    assert_eq!(minted[0].serial_number, format_serial(&machine_code, 3));

    // the aborted first attempt left no order row behind
    let stored: i64 = orders::table
        .filter(orders::customer_name.eq(&customer))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(stored, 1);
    let minted_count: i64 = serials::table
        .filter(serials::order_id.eq(order.id))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(minted_count, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set TEST_DATABASE_URL)"]
async fn suffix_width_grows_past_three_digits() {
    let pool = setup_pool().await;
    let mut conn = pool.get().await.unwrap();
    let actor = Uuid::new_v4();

    let machine_code = code("BIG");
    let country = seed_country(&mut conn).await;
    let machine = seed_machine(&mut conn, &machine_code, actor).await;

    diesel::insert_into(serial_counters::table)
        .values((
            serial_counters::prefix.eq(&machine_code),
            serial_counters::last_number.eq(999_i64),
        ))
        .execute(&mut conn)
        .await
        .unwrap();

    let fulfillment = OrderFulfillment::new(pool.clone(), false);
    let (_, minted) = fulfillment
        .create_order(
            order_input(country, vec![MachineLine { machine_id: machine, quantity: 1 }]),
            actor,
        )
        .await
        .unwrap();
    assert_eq!(minted[0].serial_number, format!("{machine_code}1000"));
}
