diesel::table! {
    users (id) {
        id -> Int4,
    }
}

diesel::table! {
    user_library (user_id, catalog_id) {
        user_id -> Int4,
        catalog_id -> Int4,
    }
}

diesel::table! {
    catalog (id) {
        id -> Int4,
        external_id -> Uuid,
        slug -> Varchar,
        title -> Varchar,
        author -> Nullable<Varchar>,
        status -> Nullable<Varchar>,
        description -> Nullable<Text>,
        cover -> Nullable<Varchar>,
        total_chapters -> Int4,
        last_synced_at -> Nullable<Timestamptz>,
        last_chapter_check -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    chapters (id) {
        id -> Int8,
        catalog_id -> Int4,
        external_id -> Uuid,
        chapter_number -> Numeric,
        title -> Nullable<Varchar>,
        volume -> Nullable<Varchar>,
        pages -> Nullable<Int4>,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sync_state (sync_type) {
        sync_type -> Varchar,
        last_run_at -> Nullable<Timestamptz>,
        last_success_at -> Nullable<Timestamptz>,
        last_cursor -> Nullable<Varchar>,
        status -> Varchar,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    notifications (id) {
        id -> Int8,
        user_id -> Int4,
        notification_type -> Varchar,
        catalog_id -> Int4,
        title -> Varchar,
        message -> Text,
        read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    user_progress (user_id, catalog_id) {
        user_id -> Int4,
        catalog_id -> Int4,
        current_chapter -> Int4,
        status -> Varchar,
        page -> Nullable<Int4>,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(chapters -> catalog (catalog_id));
diesel::joinable!(user_library -> catalog (catalog_id));
diesel::joinable!(notifications -> catalog (catalog_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    user_library,
    catalog,
    chapters,
    sync_state,
    notifications,
    user_progress,
);
