diesel::table! {
    orders (id) {
        id -> Uuid,
        #[max_length = 320]
        customer_email -> Varchar,
        #[max_length = 16]
        status -> Varchar,
        total_amount -> Numeric,
        #[max_length = 255]
        idempotency_key -> Varchar,
        hold_id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        session_id -> Uuid,
        ticket_type_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        order_id -> Uuid,
        #[max_length = 16]
        status -> Varchar,
        amount -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        #[max_length = 64]
        event_type -> Varchar,
        payload -> Jsonb,
        published -> Bool,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(payments -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    payments,
    outbox_events,
);
