diesel::table! {
    events (id) {
        id -> Uuid,
        #[max_length = 255]
        name -> Varchar,
        description -> Text,
        #[max_length = 255]
        location -> Varchar,
        #[max_length = 500]
        image_url -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sessions (id) {
        id -> Uuid,
        event_id -> Uuid,
        starts_at -> Timestamptz,
        ends_at -> Timestamptz,
        total_capacity -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_types (id) {
        id -> Uuid,
        session_id -> Uuid,
        #[max_length = 100]
        name -> Varchar,
        price -> Numeric,
        quantity -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    holds (id) {
        id -> Uuid,
        session_id -> Uuid,
        ticket_type_id -> Uuid,
        quantity -> Int4,
        #[max_length = 320]
        customer_email -> Varchar,
        #[max_length = 16]
        status -> Varchar,
        expires_at -> Timestamptz,
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

diesel::joinable!(sessions -> events (event_id));
diesel::joinable!(ticket_types -> sessions (session_id));

diesel::allow_tables_to_appear_in_same_query!(
    events,
    sessions,
    ticket_types,
    holds,
    outbox_events,
);
