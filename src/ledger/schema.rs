// Hand-written schema; migrations in connection.rs keep it in step.

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
diesel::table! {
    authors (author_id) {
        author_id -> BigInt,
        collection_name -> Text,
        collection_address -> Nullable<Text>,
        collection_status -> Text,
        is_testnet -> Bool,
        created_at -> Timestamp,
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
diesel::table! {
    transactions (id) {
        id -> Nullable<BigInt>,
        hash -> Text,
        source_address -> Text,
        destination_address -> Text,
        amount -> BigInt,
        status -> Text,
        is_testnet -> Bool,
        created_at -> Timestamp,
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
diesel::table! {
    operations (id) {
        id -> Nullable<BigInt>,
        kind -> Text,
        status -> Text,
        author_id -> Nullable<BigInt>,
        collection_address -> Nullable<Text>,
        nft_address -> Nullable<Text>,
        dest_wallet -> Nullable<Text>,
        item_meta -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
diesel::allow_tables_to_appear_in_same_query!(authors, transactions, operations);
