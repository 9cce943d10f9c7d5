diesel::table! {
    countries (id) {
        id -> Uuid,
        name -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    product_codes (code) {
        code -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    machines (id) {
        id -> Uuid,
        name -> Varchar,
        product_code -> Varchar,
        created_by -> Uuid,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    panels (id) {
        id -> Uuid,
        name -> Varchar,
        panel_code -> Varchar,
        parent_machine_id -> Uuid,
        created_by -> Uuid,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        customer_name -> Varchar,
        shipping_location -> Varchar,
        country_id -> Uuid,
        quote_number -> Nullable<Varchar>,
        invoice_number -> Nullable<Varchar>,
        due_date -> Nullable<Date>,
        progress_status -> Varchar,
        payment_status -> Varchar,
        machine_lines -> Jsonb,
        created_by -> Uuid,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    serials (id) {
        id -> Uuid,
        order_id -> Uuid,
        machine_id -> Nullable<Uuid>,
        panel_id -> Nullable<Uuid>,
        serial_number -> Varchar,
        issued_by -> Uuid,
        issued_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    serial_counters (prefix) {
        prefix -> Varchar,
        last_number -> Int8,
    }
}

diesel::joinable!(panels -> machines (parent_machine_id));
diesel::joinable!(orders -> countries (country_id));
diesel::joinable!(serials -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    countries,
    product_codes,
    machines,
    panels,
    orders,
    serials,
    serial_counters,
);
