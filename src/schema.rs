// Diesel table definitions. Kept in sync by hand with
// `DieselDbContext::init_schema`.

diesel::table! {
    cards (id) {
        id -> Text,
        filename -> Text,
        source_image_path -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    card_fields (card_id, field) {
        card_id -> Text,
        field -> Text,
        status -> Text,
        value -> Nullable<Text>,
        claimed_by -> Nullable<Text>,
        claimed_at -> Nullable<Text>,
        attempts -> Integer,
        last_error -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::joinable!(card_fields -> cards (card_id));

diesel::allow_tables_to_appear_in_same_query!(cards, card_fields);
