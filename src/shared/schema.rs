diesel::table! {
    users (id) {
        id -> Int8,
        username -> Nullable<Varchar>,
        first_name -> Nullable<Varchar>,
        last_name -> Nullable<Varchar>,
        language_code -> Nullable<Varchar>,
        created_at -> Timestamptz,
        last_activity -> Timestamptz,
    }
}

diesel::table! {
    support_tickets (id) {
        id -> Int4,
        user_id -> Int8,
        email -> Nullable<Varchar>,
        status -> Varchar,
        thread_id -> Nullable<Int8>,
        initial_message_id -> Nullable<Int8>,
        closed_at -> Nullable<Timestamptz>,
        last_user_message_at -> Timestamptz,
        last_staff_response_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    support_responses (id) {
        id -> Int4,
        ticket_id -> Int4,
        author_id -> Int8,
        role -> Int4,
        message_text -> Nullable<Text>,
        attachment_file_id -> Nullable<Varchar>,
        kind -> Varchar,
        thread_message_id -> Nullable<Int8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    feedback (id) {
        id -> Int4,
        user_id -> Int8,
        category -> Nullable<Varchar>,
        rating -> Int4,
        comment -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(support_responses -> support_tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(users, support_tickets, support_responses, feedback);
