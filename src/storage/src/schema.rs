#![allow(unused_import_braces, unreachable_pub)]

table! {
    jobs (id) {
        id -> Text,
        source_type -> Text,
        source_path -> Nullable<Text>,
        source_url -> Nullable<Text>,
        name -> Text,
        status -> Text,
        current_step -> Nullable<Text>,
        data -> Text,
        config -> Text,
        tags -> Text,
        priority -> Integer,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        updated_at -> Timestamp,
        error_message -> Nullable<Text>,
    }
}

table! {
    step_results (id) {
        id -> Text,
        job_id -> Text,
        step_name -> Text,
        status -> Text,
        started_at -> Nullable<Timestamp>,
        ended_at -> Nullable<Timestamp>,
        output_data -> Text,
        error_message -> Nullable<Text>,
        error_traceback -> Nullable<Text>,
        awaiting_input_since -> Nullable<Timestamp>,
        user_input -> Nullable<Text>,
        reverted_at -> Nullable<Timestamp>,
        artifacts -> Text,
        revert_error -> Nullable<Text>,
        position -> Integer,
    }
}

table! {
    artifacts (id) {
        id -> Text,
        job_id -> Nullable<Text>,
        step_result_id -> Nullable<Text>,
        artifact_type -> Text,
        target -> Text,
        before_state -> Nullable<Text>,
        after_state -> Nullable<Text>,
        metadata -> Text,
        status -> Text,
        reversibility -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        error_message -> Nullable<Text>,
    }
}

joinable!(step_results -> jobs (job_id));

allow_tables_to_appear_in_same_query!(jobs, step_results, artifacts);
