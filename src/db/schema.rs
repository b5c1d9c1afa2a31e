diesel::table! {
    streamers (source_id) {
        source_id -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    streamer_destinations (id) {
        id -> BigInt,
        source_id -> Text,
        position -> Integer,
        community_id -> Text,
        channel_id -> Text,
        thread_id -> Nullable<Text>,
        live_channel_name -> Nullable<Text>,
        offline_channel_name -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(streamers, streamer_destinations);
