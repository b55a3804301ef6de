diesel::table! {
    inventory_items (id) {
        id -> Uuid,
        session_id -> Uuid,
        ticket_type_id -> Uuid,
        total_quantity -> Int4,
        available_quantity -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_holds (id) {
        id -> Uuid,
        inventory_item_id -> Uuid,
        quantity -> Int4,
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

diesel::table! {
    consumed_events (event_id) {
        event_id -> Uuid,
        #[max_length = 64]
        event_type -> Varchar,
        consumed_at -> Timestamptz,
    }
}

diesel::joinable!(inventory_holds -> inventory_items (inventory_item_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory_items,
    inventory_holds,
    outbox_events,
    consumed_events,
);
